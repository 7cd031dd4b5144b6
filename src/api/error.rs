// ==========================================
// 称重汇总系统 - API层错误类型
// ==========================================
// 职责: 将 Repository / Engine 错误转换为面向调用方的错误消息
// ==========================================

use crate::engine::error::EngineError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("批次状态不允许该操作: {0}")]
    StateConflict(String),

    #[error("无效的状态转换: from={from} to={to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("一致性违反: {0}")]
    ConsistencyViolation(String),

    #[error("功能未启用: {0}")]
    FeatureDisabled(String),

    // ==========================================
    // 并发控制错误
    // ==========================================
    #[error("乐观锁冲突: {0}")]
    OptimisticLockFailure(String),

    #[error("汇总正在执行中,请稍后重试")]
    Busy,

    #[error("批次号分配冲突: {0}")]
    AllocationRace(String),

    // ==========================================
    // 外部系统 / 数据访问错误
    // ==========================================
    #[error("外部系统失败: {0}")]
    ExternalFailure(String),

    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity,
                id,
                expected,
            } => ApiError::OptimisticLockFailure(format!(
                "{}(id={})已被其他操作修改（期望revision={}）",
                entity, id, expected
            )),
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::ConsistencyViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::ConsistencyViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::FieldValueError { field, message } => {
                ApiError::InvalidInput(format!("字段{}错误: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

// ==========================================
// 从 EngineError 转换
// ==========================================
impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound { entity, key } => {
                ApiError::NotFound(format!("{}({})不存在", entity, key))
            }
            EngineError::StateConflict {
                batch_id,
                status,
                required,
            } => ApiError::StateConflict(format!(
                "批次{}当前为{}，需要{}",
                batch_id, status, required
            )),
            EngineError::InvalidStateTransition { from, to, .. } => {
                ApiError::InvalidStateTransition {
                    from: from.to_string(),
                    to: to.to_string(),
                }
            }
            EngineError::ConsistencyViolation(msg) => ApiError::ConsistencyViolation(msg),
            EngineError::ExternalFailure(msg) => ApiError::ExternalFailure(msg),
            EngineError::AllocationRace { prefix, attempts } => ApiError::AllocationRace(format!(
                "前缀{}重试{}次仍冲突",
                prefix, attempts
            )),
            EngineError::InvalidInput(msg) => ApiError::InvalidInput(msg),
            EngineError::ReconcileInProgress => ApiError::Busy,
            EngineError::Repository(err) => err.into(),
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::TransmissionStatus;

    #[test]
    fn test_repository_error_conversion() {
        let repo_err = RepositoryError::NotFound {
            entity: "Batch".to_string(),
            id: "42".to_string(),
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::NotFound(msg) => {
                assert!(msg.contains("Batch"));
                assert!(msg.contains("42"));
            }
            _ => panic!("Expected NotFound"),
        }

        let repo_err = RepositoryError::OptimisticLockFailure {
            entity: "BatchItem".to_string(),
            id: "7".to_string(),
            expected: 3,
        };
        let api_err: ApiError = repo_err.into();
        match api_err {
            ApiError::OptimisticLockFailure(msg) => {
                assert!(msg.contains("BatchItem"));
                assert!(msg.contains("已被其他操作修改"));
            }
            _ => panic!("Expected OptimisticLockFailure"),
        }
    }

    #[test]
    fn test_engine_error_conversion() {
        let api_err: ApiError = EngineError::StateConflict {
            batch_id: 5,
            status: TransmissionStatus::Pending,
            required: TransmissionStatus::Processed,
        }
        .into();
        match api_err {
            ApiError::StateConflict(msg) => {
                assert!(msg.contains("pending"));
                assert!(msg.contains("processed"));
            }
            _ => panic!("Expected StateConflict"),
        }

        let api_err: ApiError = EngineError::ReconcileInProgress.into();
        assert!(matches!(api_err, ApiError::Busy));

        // 包裹的仓储错误按仓储规则转换
        let api_err: ApiError =
            EngineError::Repository(RepositoryError::LockError("poisoned".to_string())).into();
        assert!(matches!(api_err, ApiError::DatabaseConnectionError(_)));
    }
}
