// ==========================================
// 称重汇总系统 - 分组键
// ==========================================
// 职责: 以显式类型表达分组维度,提供确定性序列化
// 红线: 字段顺序即序列化顺序,改名/增删字段必须同步修改 render
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// 空值在序列化键中的占位符
pub const NULL_TOKEN: &str = "null";

// ==========================================
// ItemKey - 批次内明细键
// ==========================================
// 批次已经限定了物料与生产订单,明细在批次内按以下 10 个维度区分
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
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

impl ItemKey {
    /// 按固定顺序列出 (字段名, 值)
    pub fn fields(&self) -> [(&'static str, Option<&str>); 10] {
        [
            ("plant_code", self.plant_code.as_deref()),
            ("transaction_type", self.transaction_type.as_deref()),
            ("production_group", self.production_group.as_deref()),
            ("production_shift", self.production_shift.as_deref()),
            ("packing_group", self.packing_group.as_deref()),
            ("packing_shift", self.packing_shift.as_deref()),
            ("production_lot", self.production_lot.as_deref()),
            ("production_location", self.production_location.as_deref()),
            ("storage_location", self.storage_location.as_deref()),
            ("storage_location_target", self.storage_location_target.as_deref()),
        ]
    }

    /// 确定性序列化: `field:value|field:value|...`,缺失值写 `null`
    pub fn render(&self) -> String {
        render_fields(&self.fields())
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

// ==========================================
// GroupingKey - 称重事件分组键
// ==========================================
// 物料 + 生产订单 + 明细键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupingKey {
    pub material_code: String,
    pub production_order_number: String,
    pub item: ItemKey,
}

impl GroupingKey {
    pub fn new(material_code: &str, production_order_number: &str, item: ItemKey) -> Self {
        Self {
            material_code: material_code.to_string(),
            production_order_number: production_order_number.to_string(),
            item,
        }
    }

    pub fn render(&self) -> String {
        let head = render_fields(&[
            ("material_code", Some(self.material_code.as_str())),
            (
                "production_order_number",
                Some(self.production_order_number.as_str()),
            ),
        ]);
        format!("{}|{}", head, self.item.render())
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

fn render_fields(fields: &[(&'static str, Option<&str>)]) -> String {
    fields
        .iter()
        .map(|(name, value)| format!("{}:{}", name, value.unwrap_or(NULL_TOKEN)))
        .collect::<Vec<_>>()
        .join("|")
}

/// 空白字符串统一视为缺失
pub fn normalize_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_uses_null_token() {
        let key = ItemKey {
            plant_code: Some("P1".to_string()),
            ..Default::default()
        };
        let rendered = key.render();
        assert!(rendered.starts_with("plant_code:P1|transaction_type:null|"));
        assert!(rendered.ends_with("storage_location_target:null"));
        assert_eq!(rendered.matches('|').count(), 9);
    }

    #[test]
    fn test_grouping_key_render_is_stable() {
        let a = GroupingKey::new("M1", "PO1", ItemKey::default());
        let b = GroupingKey::new("M1", "PO1", ItemKey::default());
        assert_eq!(a.render(), b.render());
        assert!(a
            .render()
            .starts_with("material_code:M1|production_order_number:PO1|plant_code:null"));
    }

    #[test]
    fn test_distinct_values_yield_distinct_keys() {
        let a = ItemKey {
            production_lot: Some("L1".to_string()),
            ..Default::default()
        };
        let b = ItemKey {
            production_location: Some("L1".to_string()),
            ..Default::default()
        };
        assert_ne!(a.render(), b.render());
        assert_ne!(a, b);
    }

    #[test]
    fn test_normalize_field() {
        assert_eq!(normalize_field(Some("  ".to_string())), None);
        assert_eq!(normalize_field(Some(" A ".to_string())), Some("A".to_string()));
        assert_eq!(normalize_field(None), None);
    }
}
