// ==========================================
// 称重汇总系统 - 领域类型定义
// ==========================================
// 职责: 状态枚举、计量规则、修改操作类型
// 序列化格式: 小写 snake_case (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 批次传输状态 (Transmission Status)
// ==========================================
// 状态流: pending → processed → sending → {success, failed}
//         failed → processed (人工重开)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmissionStatus {
    Pending,   // 汇总中,可继续追加
    Processed, // 已确认,允许明细修改/发起传输
    Sending,   // 传输中
    Failed,    // 传输失败
    Success,   // 全部过账成功
}

impl TransmissionStatus {
    /// 转换为数据库存储字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmissionStatus::Pending => "pending",
            TransmissionStatus::Processed => "processed",
            TransmissionStatus::Sending => "sending",
            TransmissionStatus::Failed => "failed",
            TransmissionStatus::Success => "success",
        }
    }

    /// 从数据库字符串解析
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(TransmissionStatus::Pending),
            "processed" => Some(TransmissionStatus::Processed),
            "sending" => Some(TransmissionStatus::Sending),
            "failed" => Some(TransmissionStatus::Failed),
            "success" => Some(TransmissionStatus::Success),
            _ => None,
        }
    }

    /// 状态迁移表
    ///
    /// - pending → processed: 人工确认
    /// - processed → sending: 发起传输
    /// - sending → success / failed / processed: 传输结果回写
    /// - failed → processed: 人工重开
    /// - processed → success: 外部系统逐条回写全部成功
    pub fn can_transition_to(&self, next: TransmissionStatus) -> bool {
        use TransmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Processed)
                | (Processed, Sending)
                | (Processed, Success)
                | (Sending, Success)
                | (Sending, Failed)
                | (Sending, Processed)
                | (Failed, Processed)
        )
    }

    /// 是否计入收货重量 (good receive)
    pub fn counts_as_good_receive(&self) -> bool {
        matches!(self, TransmissionStatus::Sending | TransmissionStatus::Success)
    }
}

impl fmt::Display for TransmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 明细状态 (Item Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Success,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Success => "success",
            ItemStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "pending" => Some(ItemStatus::Pending),
            "success" => Some(ItemStatus::Success),
            "failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 计量规则 (Measurement Rule)
// ==========================================
// actual: 折算重量 = 实称重量
// standard: 折算重量 = 物料固定单重 (逐条事件计)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementRule {
    Actual,
    Standard,
}

impl MeasurementRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeasurementRule::Actual => "actual",
            MeasurementRule::Standard => "standard",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "actual" => Some(MeasurementRule::Actual),
            "standard" => Some(MeasurementRule::Standard),
            _ => None,
        }
    }
}

impl fmt::Display for MeasurementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 明细修改操作 (Mutation Operation)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOperation {
    Edit,
    Split,
    Merge,
    CreateFromFailed,
}

impl MutationOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOperation::Edit => "edit",
            MutationOperation::Split => "split",
            MutationOperation::Merge => "merge",
            MutationOperation::CreateFromFailed => "create_from_failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim() {
            "edit" => Some(MutationOperation::Edit),
            "split" => Some(MutationOperation::Split),
            "merge" => Some(MutationOperation::Merge),
            "create_from_failed" => Some(MutationOperation::CreateFromFailed),
            _ => None,
        }
    }
}

impl fmt::Display for MutationOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmission_transitions() {
        use TransmissionStatus::*;

        assert!(Pending.can_transition_to(Processed));
        assert!(Processed.can_transition_to(Sending));
        assert!(Sending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Processed));

        assert!(!Pending.can_transition_to(Sending));
        assert!(!Success.can_transition_to(Processed));
        assert!(!Failed.can_transition_to(Sending));
        assert!(!Processed.can_transition_to(Pending));
    }

    #[test]
    fn test_status_round_trip_strings() {
        for s in ["pending", "processed", "sending", "failed", "success"] {
            assert_eq!(TransmissionStatus::from_str(s).unwrap().as_str(), s);
        }
        assert_eq!(ItemStatus::from_str("failed"), Some(ItemStatus::Failed));
        assert_eq!(ItemStatus::from_str("unknown"), None);
        assert_eq!(MeasurementRule::from_str("STANDARD"), Some(MeasurementRule::Standard));
        assert_eq!(
            MutationOperation::from_str("create_from_failed"),
            Some(MutationOperation::CreateFromFailed)
        );
    }

    #[test]
    fn test_good_receive_statuses() {
        assert!(TransmissionStatus::Sending.counts_as_good_receive());
        assert!(TransmissionStatus::Success.counts_as_good_receive());
        assert!(!TransmissionStatus::Processed.counts_as_good_receive());
    }
}
