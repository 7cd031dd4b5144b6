// ==========================================
// 称重汇总系统 - 引擎层错误类型
// ==========================================
// 分类:
// - NotFound: 主数据缺失,汇总时按分组跳过
// - StateConflict / InvalidStateTransition: 批次状态不允许该操作
// - ConsistencyViolation: 修改后批次内出现重复明细键,整体回滚
// - ExternalFailure: SAP 不可达或非 2xx
// - AllocationRace: 批次号重试耗尽
// ==========================================

use crate::domain::types::TransmissionStatus;
use crate::repository::error::RepositoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("主数据未找到: {entity} {key}")]
    NotFound { entity: String, key: String },

    #[error("批次状态冲突: batch_id={batch_id}, status={status}, 需要 {required}")]
    StateConflict {
        batch_id: i64,
        status: TransmissionStatus,
        required: TransmissionStatus,
    },

    #[error("无效的状态转换: batch_id={batch_id}, from={from} to={to}")]
    InvalidStateTransition {
        batch_id: i64,
        from: TransmissionStatus,
        to: TransmissionStatus,
    },

    #[error("一致性违反: {0}")]
    ConsistencyViolation(String),

    #[error("外部系统失败: {0}")]
    ExternalFailure(String),

    #[error("批次号分配冲突: prefix={prefix}, attempts={attempts}")]
    AllocationRace { prefix: String, attempts: u32 },

    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("汇总正在执行中")]
    ReconcileInProgress,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn not_found(entity: &str, key: impl ToString) -> Self {
        EngineError::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }

    /// 可按分组跳过的错误
    pub fn is_skippable(&self) -> bool {
        matches!(self, EngineError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        EngineError::Repository(err.into())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
