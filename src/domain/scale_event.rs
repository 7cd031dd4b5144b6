// ==========================================
// 称重汇总系统 - 称重事件领域模型
// ==========================================
// 职责: 一次物理称重的记录
// 红线: 事件只追加不删除; 汇总引擎仅回写一次折算结果与汇总标记
// ==========================================

use crate::domain::grouping_key::{normalize_field, GroupingKey, ItemKey};
use crate::domain::types::MeasurementRule;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// ScaleEvent - 称重事件
// ==========================================
// 对齐: scale_event 表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleEvent {
    pub id: i64,                          // 自增ID (单调递增)
    pub scale_device_id: Option<String>,  // 秤设备
    pub production_order_number: String,  // 生产订单号
    pub plant_code: Option<String>,       // 工厂
    pub material_code: String,            // 物料
    pub material_unit: Option<String>,    // 计量单位
    pub raw_weight: f64,                  // 实称重量
    pub converted_weight: Option<f64>,    // 折算重量 (汇总前为空)
    pub measurement_rule_applied: Option<MeasurementRule>,

    // ===== 分组维度 =====
    pub production_group: Option<String>,
    pub production_shift: Option<String>,
    pub packing_group: Option<String>,
    pub packing_shift: Option<String>,
    pub production_lot: Option<String>,
    pub production_location: Option<String>,
    pub storage_location: Option<String>,
    pub storage_location_target: Option<String>,
    pub transaction_type: Option<String>,

    // ===== 汇总标记 =====
    pub is_summarized: bool,
    pub summary_batch_id: Option<i64>, // 事务内写入的归属批次
    pub created_at: NaiveDateTime,
}

impl ScaleEvent {
    /// 批次内明细键 (空白维度按 NULL 处理)
    pub fn item_key(&self) -> ItemKey {
        let field = |value: &Option<String>| normalize_field(value.clone());
        ItemKey {
            plant_code: field(&self.plant_code),
            transaction_type: field(&self.transaction_type),
            production_group: field(&self.production_group),
            production_shift: field(&self.production_shift),
            packing_group: field(&self.packing_group),
            packing_shift: field(&self.packing_shift),
            production_lot: field(&self.production_lot),
            production_location: field(&self.production_location),
            storage_location: field(&self.storage_location),
            storage_location_target: field(&self.storage_location_target),
        }
    }

    /// 事件分组键
    pub fn grouping_key(&self) -> GroupingKey {
        GroupingKey::new(
            &self.material_code,
            &self.production_order_number,
            self.item_key(),
        )
    }
}

// ==========================================
// NewScaleEvent - 采集侧写入参数
// ==========================================
// 采集链路 (秤协议读数) 不在本系统范围内,此结构是它写入事件队列的入口
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewScaleEvent {
    pub scale_device_id: Option<String>,
    pub production_order_number: String,
    pub plant_code: Option<String>,
    pub material_code: String,
    pub material_unit: Option<String>,
    pub raw_weight: f64,
    pub production_group: Option<String>,
    pub production_shift: Option<String>,
    pub packing_group: Option<String>,
    pub packing_shift: Option<String>,
    pub production_lot: Option<String>,
    pub production_location: Option<String>,
    pub storage_location: Option<String>,
    pub storage_location_target: Option<String>,
    pub transaction_type: Option<String>,
}

impl NewScaleEvent {
    pub fn new(production_order_number: &str, material_code: &str, raw_weight: f64) -> Self {
        Self {
            production_order_number: production_order_number.to_string(),
            material_code: material_code.to_string(),
            raw_weight,
            ..Default::default()
        }
    }

    pub fn with_plant(mut self, plant_code: &str) -> Self {
        self.plant_code = Some(plant_code.to_string());
        self
    }
}
