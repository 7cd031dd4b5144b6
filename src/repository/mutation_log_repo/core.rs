use crate::domain::mutation_log::{MutationLogDetail, MutationLogEntry};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::format_ts;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

// ==========================================
// MutationLogRepository - 明细修改日志仓储
// ==========================================
// 红线: Repository 不做业务逻辑,只做数据映射
pub struct MutationLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MutationLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 写入一条修改日志及其快照
    ///
    /// # 参数
    /// - `entry`: 日志主记录
    /// - `details`: 每个被触及明细的前后快照
    ///
    /// # 返回
    /// - `Ok(log_id)`
    pub fn insert_tx(
        conn: &Connection,
        entry: &MutationLogEntry,
        details: &[MutationLogDetail],
    ) -> RepositoryResult<String> {
        conn.execute(
            r#"
            INSERT INTO item_mutation_log (
                id, batch_id, source_item_id, target_item_id,
                operation, actor, payload_json, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                entry.id,
                entry.batch_id,
                entry.source_item_id,
                entry.target_item_id,
                entry.operation.as_str(),
                entry.actor,
                entry.payload_json.as_ref().map(|v| v.to_string()),
                format_ts(&entry.created_at),
            ],
        )?;

        for detail in details {
            if detail.log_id != entry.id {
                return Err(RepositoryError::FieldValueError {
                    field: "log_id".to_string(),
                    message: format!("快照 {} 不属于日志 {}", detail.id, entry.id),
                });
            }
            conn.execute(
                r#"
                INSERT INTO item_mutation_log_detail (
                    id, log_id, item_id, before_json, after_json
                ) VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    detail.id,
                    detail.log_id,
                    detail.item_id,
                    detail.before_json.as_ref().map(|v| v.to_string()),
                    detail.after_json.as_ref().map(|v| v.to_string()),
                ],
            )?;
        }

        Ok(entry.id.clone())
    }
}
