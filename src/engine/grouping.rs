// ==========================================
// 称重汇总系统 - 称重事件分组
// ==========================================
// 职责: 按分组键把待汇总事件切分为组,保持首次出现顺序
// ==========================================

use crate::domain::grouping_key::GroupingKey;
use crate::domain::scale_event::ScaleEvent;
use std::collections::HashMap;

// ==========================================
// EventGroup - 同一分组键下的事件
// ==========================================
#[derive(Debug, Clone)]
pub struct EventGroup {
    pub key: GroupingKey,
    pub events: Vec<ScaleEvent>,
}

impl EventGroup {
    /// 代表事件 (组内第一条,新明细的描述字段取自它)
    pub fn representative(&self) -> &ScaleEvent {
        &self.events[0]
    }

    pub fn event_ids(&self) -> Vec<i64> {
        self.events.iter().map(|e| e.id).collect()
    }

    pub fn min_event_id(&self) -> i64 {
        self.events.iter().map(|e| e.id).min().unwrap_or_default()
    }

    pub fn max_event_id(&self) -> i64 {
        self.events.iter().map(|e| e.id).max().unwrap_or_default()
    }

    pub fn total_raw_weight(&self) -> f64 {
        self.events.iter().map(|e| e.raw_weight).sum()
    }
}

/// 按分组键切分事件
///
/// 组的顺序为键首次出现的顺序; 组内事件保持输入顺序 (调用方按 id 升序读取)
pub fn partition(events: Vec<ScaleEvent>) -> Vec<EventGroup> {
    let mut index: HashMap<GroupingKey, usize> = HashMap::new();
    let mut groups: Vec<EventGroup> = Vec::new();

    for event in events {
        let key = event.grouping_key();
        match index.get(&key) {
            Some(&pos) => groups[pos].events.push(event),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(EventGroup {
                    key,
                    events: vec![event],
                });
            }
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(id: i64, order: &str, plant: Option<&str>, lot: Option<&str>) -> ScaleEvent {
        ScaleEvent {
            id,
            scale_device_id: None,
            production_order_number: order.to_string(),
            plant_code: plant.map(str::to_string),
            material_code: "M1".to_string(),
            material_unit: None,
            raw_weight: id as f64,
            converted_weight: None,
            measurement_rule_applied: None,
            production_group: None,
            production_shift: None,
            packing_group: None,
            packing_shift: None,
            production_lot: lot.map(str::to_string),
            production_location: None,
            storage_location: None,
            storage_location_target: None,
            transaction_type: None,
            is_summarized: false,
            summary_batch_id: None,
            created_at: Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_partition_keeps_discovery_order() {
        let groups = partition(vec![
            event(1, "PO2", Some("P1"), None),
            event(2, "PO1", Some("P1"), None),
            event(3, "PO2", Some("P1"), None),
            event(4, "PO2", Some("P1"), Some("L1")),
        ]);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].event_ids(), vec![1, 3]);
        assert_eq!(groups[1].event_ids(), vec![2]);
        assert_eq!(groups[2].event_ids(), vec![4]);
        assert_eq!(groups[0].total_raw_weight(), 4.0);
        assert_eq!(groups[0].max_event_id(), 3);
    }

    #[test]
    fn test_missing_plant_is_its_own_group() {
        let groups = partition(vec![
            event(1, "PO1", Some("P1"), None),
            event(2, "PO1", None, None),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].representative().plant_code, None);
    }

    #[test]
    fn test_empty_input() {
        assert!(partition(Vec::new()).is_empty());
    }
}
