// ==========================================
// 称重汇总系统 - 计量规则 (折算重量)
// ==========================================
// actual:   折算重量 = 实称重量
// standard: 折算重量 = 物料固定单重,逐条事件计 (总折算 = 事件数 × 单重)
// 其它/物料缺失: 沿用事件已有折算重量,否则取实称重量
// ==========================================

use crate::domain::production_order::Material;
use crate::domain::scale_event::ScaleEvent;
use crate::domain::types::MeasurementRule;

/// 单条事件的折算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub converted_weight: f64,
    pub rule_applied: Option<MeasurementRule>,
}

/// 计算单条事件的折算重量
pub fn convert(event: &ScaleEvent, material: Option<&Material>) -> Conversion {
    let rule = material.and_then(|m| m.measurement_rule);

    match (rule, material.and_then(|m| m.fixed_value)) {
        (Some(MeasurementRule::Actual), _) => Conversion {
            converted_weight: event.raw_weight,
            rule_applied: Some(MeasurementRule::Actual),
        },
        (Some(MeasurementRule::Standard), Some(fixed)) => Conversion {
            converted_weight: fixed,
            rule_applied: Some(MeasurementRule::Standard),
        },
        // standard 但未配置单重: 无法折算,按未知规则回退
        _ => Conversion {
            converted_weight: event.converted_weight.unwrap_or(event.raw_weight),
            rule_applied: None,
        },
    }
}
