// ==========================================
// 称重汇总系统 - 汇总批次/明细领域模型
// ==========================================
// 职责: 批次 (按生产订单明细) 与批次明细 (按分组键) 的实体定义
// 红线: 同一未删除批次内,未删除明细的 ItemKey 不得重复
// ==========================================

use crate::domain::grouping_key::{normalize_field, ItemKey};
use crate::domain::types::{ItemStatus, TransmissionStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// Batch - 汇总批次
// ==========================================
// 对齐: weight_summary_batch 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: i64,
    pub batch_code: String,                   // SUM<工厂><YYYYMMDD><4位流水>
    pub production_order_detail_id: i64,
    pub material_code: String,
    pub production_order_number: String,
    pub scale_event_id_from: i64,             // 信息性边界,单调扩展
    pub scale_event_id_to: i64,
    pub transmission_status: TransmissionStatus,
    pub is_deleted: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// BatchItem - 批次明细
// ==========================================
// 对齐: weight_summary_batch_item 表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: i64,
    pub batch_id: i64,
    pub material_code: String,
    pub production_order_number: String,
    pub material_unit: Option<String>,

    // ===== 明细键 =====
    pub plant_code: Option<String>,
    pub transaction_type: Option<String>,
    pub production_group: Option<String>,
    pub production_shift: Option<String>,
    pub packing_group: Option<String>,
    pub packing_shift: Option<String>,
    pub production_lot: Option<String>,
    pub production_location: Option<String>,
    pub storage_location: Option<String>,
    pub storage_location_target: Option<String>,

    // ===== 累计重量 =====
    pub total_raw_weight: f64,
    pub total_converted_weight: f64,

    // ===== 状态 =====
    pub item_status: ItemStatus,
    pub material_document_ref: Option<String>, // SAP 物料凭证号 (成功后写入)
    pub is_deleted: bool,
    pub revision: i64, // 乐观锁版本
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BatchItem {
    pub fn item_key(&self) -> ItemKey {
        ItemKey {
            plant_code: self.plant_code.clone(),
            transaction_type: self.transaction_type.clone(),
            production_group: self.production_group.clone(),
            production_shift: self.production_shift.clone(),
            packing_group: self.packing_group.clone(),
            packing_shift: self.packing_shift.clone(),
            production_lot: self.production_lot.clone(),
            production_location: self.production_location.clone(),
            storage_location: self.storage_location.clone(),
            storage_location_target: self.storage_location_target.clone(),
        }
    }

    /// 把 ItemKey 写回明细描述字段
    pub fn set_item_key(&mut self, key: ItemKey) {
        self.plant_code = key.plant_code;
        self.transaction_type = key.transaction_type;
        self.production_group = key.production_group;
        self.production_shift = key.production_shift;
        self.packing_group = key.packing_group;
        self.packing_shift = key.packing_shift;
        self.production_lot = key.production_lot;
        self.production_location = key.production_location;
        self.storage_location = key.storage_location;
        self.storage_location_target = key.storage_location_target;
    }

    /// 应用非数值字段变更 (重量字段由修改引擎单独处理)
    pub fn apply_field_changes(&mut self, changes: &ItemChanges) {
        fn apply(target: &mut Option<String>, change: &Option<String>) {
            if let Some(v) = change {
                *target = normalize_field(Some(v.clone()));
            }
        }

        apply(&mut self.material_unit, &changes.material_unit);
        apply(&mut self.plant_code, &changes.plant_code);
        apply(&mut self.transaction_type, &changes.transaction_type);
        apply(&mut self.production_group, &changes.production_group);
        apply(&mut self.production_shift, &changes.production_shift);
        apply(&mut self.packing_group, &changes.packing_group);
        apply(&mut self.packing_shift, &changes.packing_shift);
        apply(&mut self.production_lot, &changes.production_lot);
        apply(&mut self.production_location, &changes.production_location);
        apply(&mut self.storage_location, &changes.storage_location);
        apply(&mut self.storage_location_target, &changes.storage_location_target);
    }

    /// 序列化为审计快照
    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

// ==========================================
// NewBatchItem - 待插入明细
// ==========================================
#[derive(Debug, Clone)]
pub struct NewBatchItem {
    pub batch_id: i64,
    pub material_code: String,
    pub production_order_number: String,
    pub material_unit: Option<String>,
    pub key: ItemKey,
    pub total_raw_weight: f64,
    pub total_converted_weight: f64,
    pub item_status: ItemStatus,
}

impl NewBatchItem {
    /// 以既有明细为模板 (拆分/失败重建)
    pub fn from_template(
        template: &BatchItem,
        total_raw_weight: f64,
        total_converted_weight: f64,
        item_status: ItemStatus,
    ) -> Self {
        Self {
            batch_id: template.batch_id,
            material_code: template.material_code.clone(),
            production_order_number: template.production_order_number.clone(),
            material_unit: template.material_unit.clone(),
            key: template.item_key(),
            total_raw_weight,
            total_converted_weight,
            item_status,
        }
    }
}

// ==========================================
// ItemChanges - 明细修改参数
// ==========================================
// None: 不修改; Some(""): 清空; Some(v): 设置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemChanges {
    pub total_weight: Option<f64>,
    pub material_unit: Option<String>,
    pub plant_code: Option<String>,
    pub transaction_type: Option<String>,
    pub production_group: Option<String>,
    pub production_shift: Option<String>,
    pub packing_group: Option<String>,
    pub packing_shift: Option<String>,
    pub production_lot: Option<String>,
    pub production_location: Option<String>,
    pub storage_location: Option<String>,
    pub storage_location_target: Option<String>,
}

impl ItemChanges {
    /// 是否包含非重量字段变更
    pub fn has_field_changes(&self) -> bool {
        self.material_unit.is_some()
            || self.plant_code.is_some()
            || self.transaction_type.is_some()
            || self.production_group.is_some()
            || self.production_shift.is_some()
            || self.packing_group.is_some()
            || self.packing_shift.is_some()
            || self.production_lot.is_some()
            || self.production_location.is_some()
            || self.storage_location.is_some()
            || self.storage_location_target.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_item() -> BatchItem {
        let now = Utc::now().naive_utc();
        BatchItem {
            id: 1,
            batch_id: 1,
            material_code: "M1".to_string(),
            production_order_number: "PO1".to_string(),
            material_unit: Some("KG".to_string()),
            plant_code: Some("P1".to_string()),
            transaction_type: None,
            production_group: Some("G1".to_string()),
            production_shift: None,
            packing_group: None,
            packing_shift: None,
            production_lot: None,
            production_location: None,
            storage_location: Some("S1".to_string()),
            storage_location_target: None,
            total_raw_weight: 10.0,
            total_converted_weight: 10.0,
            item_status: ItemStatus::Pending,
            material_document_ref: None,
            is_deleted: false,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_apply_field_changes_sets_and_clears() {
        let mut item = make_item();
        let changes = ItemChanges {
            storage_location: Some("S2".to_string()),
            production_group: Some("".to_string()),
            ..Default::default()
        };

        item.apply_field_changes(&changes);

        assert_eq!(item.storage_location.as_deref(), Some("S2"));
        assert_eq!(item.production_group, None);
        assert_eq!(item.plant_code.as_deref(), Some("P1"));
        assert!(changes.has_field_changes());
    }

    #[test]
    fn test_weight_only_changes_have_no_field_changes() {
        let changes = ItemChanges {
            total_weight: Some(3.0),
            ..Default::default()
        };
        assert!(!changes.has_field_changes());
    }

    #[test]
    fn test_set_item_key_round_trip() {
        let mut item = make_item();
        let mut key = item.item_key();
        key.production_lot = Some("LOT9".to_string());
        item.set_item_key(key.clone());
        assert_eq!(item.item_key(), key);
    }
}
