// ==========================================
// 称重汇总系统 - 汇总批次数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 说明: `*_tx` 系列函数接受 &Connection,供引擎在同一事务内组合调用
// ==========================================

use crate::domain::batch::Batch;
use crate::domain::types::TransmissionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_ts, now_ts, parse_enum, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    id, batch_code, production_order_detail_id, material_code, production_order_number,
    scale_event_id_from, scale_event_id_to, transmission_status, is_deleted,
    created_at, updated_at
"#;

/// 新建批次参数
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub batch_code: String,
    pub production_order_detail_id: i64,
    pub material_code: String,
    pub production_order_number: String,
    pub scale_event_id_from: i64,
    pub scale_event_id_to: i64,
}

// ==========================================
// BatchRepository - 汇总批次仓储
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 新建批次,状态为 pending
    pub fn insert_tx(conn: &Connection, batch: &NewBatch) -> RepositoryResult<i64> {
        let now = format_ts(&now_ts());
        conn.execute(
            r#"
            INSERT INTO weight_summary_batch (
                batch_code, production_order_detail_id, material_code, production_order_number,
                scale_event_id_from, scale_event_id_to, transmission_status, is_deleted,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?8)
            "#,
            params![
                batch.batch_code,
                batch.production_order_detail_id,
                batch.material_code,
                batch.production_order_number,
                batch.scale_event_id_from,
                batch.scale_event_id_to,
                TransmissionStatus::Pending.as_str(),
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 扩展事件区间 (只增不减)
    pub fn widen_event_range_tx(
        conn: &Connection,
        batch_id: i64,
        event_id_from: i64,
        event_id_to: i64,
    ) -> RepositoryResult<()> {
        conn.execute(
            r#"
            UPDATE weight_summary_batch
            SET scale_event_id_from = MIN(scale_event_id_from, ?1),
                scale_event_id_to = MAX(scale_event_id_to, ?2),
                updated_at = ?3
            WHERE id = ?4
            "#,
            params![event_id_from, event_id_to, format_ts(&now_ts()), batch_id],
        )?;
        Ok(())
    }

    /// 更新传输状态
    pub fn update_status_tx(
        conn: &Connection,
        batch_id: i64,
        status: TransmissionStatus,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE weight_summary_batch SET transmission_status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), format_ts(&now_ts()), batch_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Batch", batch_id));
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, batch_id: i64) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, batch_id)
    }

    pub fn find_by_id_tx(conn: &Connection, batch_id: i64) -> RepositoryResult<Option<Batch>> {
        let sql = format!(
            "SELECT {} FROM weight_summary_batch WHERE id = ?1",
            SELECT_COLUMNS
        );
        let batch = conn
            .query_row(&sql, params![batch_id], |row| Self::map_row(row))
            .optional()?;
        Ok(batch)
    }

    /// 生产订单明细当前的 pending 批次 (至多一个,取最新)
    pub fn find_pending_by_detail_tx(
        conn: &Connection,
        detail_id: i64,
    ) -> RepositoryResult<Option<Batch>> {
        let sql = format!(
            r#"SELECT {} FROM weight_summary_batch
               WHERE production_order_detail_id = ?1
                 AND transmission_status = ?2
                 AND is_deleted = 0
               ORDER BY id DESC
               LIMIT 1"#,
            SELECT_COLUMNS
        );
        let batch = conn
            .query_row(
                &sql,
                params![detail_id, TransmissionStatus::Pending.as_str()],
                |row| Self::map_row(row),
            )
            .optional()?;
        Ok(batch)
    }

    /// 生产订单明细下是否存在指定状态的未删除批次
    pub fn exists_with_status_tx(
        conn: &Connection,
        detail_id: i64,
        status: TransmissionStatus,
    ) -> RepositoryResult<bool> {
        let exists = conn
            .query_row(
                r#"SELECT 1 FROM weight_summary_batch
                   WHERE production_order_detail_id = ?1
                     AND transmission_status = ?2
                     AND is_deleted = 0
                   LIMIT 1"#,
                params![detail_id, status.as_str()],
                |_row| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        Ok(exists)
    }

    /// 指定前缀下最大的批次号 (含已删除批次,批次号永不复用)
    ///
    /// 先比长度再比字典序,流水号超过 4 位后仍能取到最大值
    pub fn max_code_with_prefix_tx(
        conn: &Connection,
        prefix: &str,
    ) -> RepositoryResult<Option<String>> {
        let code = conn
            .query_row(
                r#"SELECT batch_code FROM weight_summary_batch
                   WHERE substr(batch_code, 1, length(?1)) = ?1
                   ORDER BY length(batch_code) DESC, batch_code DESC
                   LIMIT 1"#,
                params![prefix],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(code)
    }

    pub fn find_by_code(&self, batch_code: &str) -> RepositoryResult<Option<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM weight_summary_batch WHERE batch_code = ?1",
            SELECT_COLUMNS
        );
        let batch = conn
            .query_row(&sql, params![batch_code], |row| Self::map_row(row))
            .optional()?;
        Ok(batch)
    }

    pub fn list_by_detail(&self, detail_id: i64) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM weight_summary_batch WHERE production_order_detail_id = ?1 AND is_deleted = 0 ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![detail_id], |row| Self::map_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    pub fn list_by_status(&self, status: TransmissionStatus) -> RepositoryResult<Vec<Batch>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM weight_summary_batch WHERE transmission_status = ?1 AND is_deleted = 0 ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let batches = stmt
            .query_map(params![status.as_str()], |row| Self::map_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    pub fn count_all(&self) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM weight_summary_batch", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    fn map_row(row: &Row) -> rusqlite::Result<Batch> {
        let status_str: String = row.get(7)?;
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        Ok(Batch {
            id: row.get(0)?,
            batch_code: row.get(1)?,
            production_order_detail_id: row.get(2)?,
            material_code: row.get(3)?,
            production_order_number: row.get(4)?,
            scale_event_id_from: row.get(5)?,
            scale_event_id_to: row.get(6)?,
            transmission_status: parse_enum(7, &status_str, TransmissionStatus::from_str)?,
            is_deleted: row.get::<_, i64>(8)? != 0,
            created_at: parse_ts(9, &created_at_str)?,
            updated_at: parse_ts(10, &updated_at_str)?,
        })
    }
}
