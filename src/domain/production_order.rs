// ==========================================
// 称重汇总系统 - 主数据 (生产订单/物料)
// ==========================================
// 说明: 主数据由外部系统维护,本地表为只读镜像;
//       生产订单明细上的累计称重字段由汇总引擎负责重算
// ==========================================

use crate::domain::types::MeasurementRule;
use serde::{Deserialize, Serialize};

/// 生产订单
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionOrder {
    pub id: i64,
    pub order_number: String,
    pub plant_code: Option<String>,
}

/// 生产订单明细 (订单 × 物料)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionOrderDetail {
    pub id: i64,
    pub production_order_id: i64,
    pub material_code: String,

    // ===== 累计称重 (汇总引擎维护) =====
    pub total_weighed: f64,
    pub total_weighed_good_receive: f64,
    pub weighing_count: i64,
}

/// 物料计量规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub material_code: String,
    pub measurement_rule: Option<MeasurementRule>, // 未配置/无法识别时为空
    pub fixed_value: Option<f64>,                  // standard 规则下的单件折算重量
    pub unit_code: Option<String>,
}

/// 重算后的累计值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetailRollup {
    pub production_order_detail_id: i64,
    pub total_weighed: f64,
    pub total_weighed_good_receive: f64,
    pub weighing_count: i64,
}
