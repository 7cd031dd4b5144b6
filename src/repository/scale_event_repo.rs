// ==========================================
// 称重汇总系统 - 称重事件数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑; 事件不可删除
// ==========================================

use crate::domain::scale_event::{NewScaleEvent, ScaleEvent};
use crate::domain::types::MeasurementRule;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{build_in_clause, format_ts, now_ts, parse_enum, parse_ts};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

/// 单条 UPDATE ... IN (...) 的最大参数数
const MARK_CHUNK_SIZE: usize = 500;

const SELECT_COLUMNS: &str = r#"
    id, scale_device_id, production_order_number, plant_code, material_code,
    material_unit, raw_weight, converted_weight, measurement_rule_applied,
    production_group, production_shift, packing_group, packing_shift,
    production_lot, production_location, storage_location, storage_location_target,
    transaction_type, is_summarized, summary_batch_id, created_at
"#;

// ==========================================
// ScaleEventRepository - 称重事件仓储
// ==========================================
pub struct ScaleEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ScaleEventRepository {
    /// 创建新的称重事件仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 写入操作
    // ==========================================

    /// 追加称重事件 (采集链路入口)
    pub fn insert(&self, event: &NewScaleEvent) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, event)
    }

    pub fn insert_tx(conn: &Connection, event: &NewScaleEvent) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO scale_event (
                scale_device_id, production_order_number, plant_code, material_code,
                material_unit, raw_weight, production_group, production_shift,
                packing_group, packing_shift, production_lot, production_location,
                storage_location, storage_location_target, transaction_type,
                is_summarized, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, ?16)
            "#,
            params![
                event.scale_device_id,
                event.production_order_number,
                event.plant_code,
                event.material_code,
                event.material_unit,
                event.raw_weight,
                event.production_group,
                event.production_shift,
                event.packing_group,
                event.packing_shift,
                event.production_lot,
                event.production_location,
                event.storage_location,
                event.storage_location_target,
                event.transaction_type,
                format_ts(&now_ts()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 回写折算结果并标记归属批次 (汇总事务内调用)
    pub fn apply_conversion_tx(
        conn: &Connection,
        event_id: i64,
        converted_weight: f64,
        rule: Option<MeasurementRule>,
        batch_id: i64,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE scale_event
            SET converted_weight = ?1,
                measurement_rule_applied = ?2,
                summary_batch_id = ?3
            WHERE id = ?4
            "#,
            params![converted_weight, rule.map(|r| r.as_str()), batch_id, event_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("ScaleEvent", event_id));
        }
        Ok(())
    }

    /// 批量置 is_summarized = 1
    ///
    /// # 返回
    /// - 实际更新的行数 (已标记的事件不重复计数)
    pub fn mark_summarized(&self, event_ids: &[i64]) -> RepositoryResult<usize> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let mut updated = 0;
        for chunk in event_ids.chunks(MARK_CHUNK_SIZE) {
            let sql = format!(
                "UPDATE scale_event SET is_summarized = 1 WHERE is_summarized = 0 AND {}",
                build_in_clause("id", chunk.len())
            );
            updated += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }

        tx.commit()?;
        Ok(updated)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, id: i64) -> RepositoryResult<Option<ScaleEvent>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM scale_event WHERE id = ?1", SELECT_COLUMNS);
        let event = conn
            .query_row(&sql, params![id], |row| Self::map_row(row))
            .optional()?;
        Ok(event)
    }

    /// 待汇总事件: 未标记且未归属任何批次,按 id 升序
    pub fn list_unsummarized_tx(conn: &Connection) -> RepositoryResult<Vec<ScaleEvent>> {
        let sql = format!(
            "SELECT {} FROM scale_event WHERE is_summarized = 0 AND summary_batch_id IS NULL ORDER BY id ASC",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map([], |row| Self::map_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    pub fn list_unsummarized(&self) -> RepositoryResult<Vec<ScaleEvent>> {
        let conn = self.get_conn()?;
        Self::list_unsummarized_tx(&conn)
    }

    /// 已归属但尚未置标记的事件 (汇总后置步骤失败的遗留)
    pub fn list_assigned_unflagged(&self) -> RepositoryResult<Vec<i64>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM scale_event WHERE is_summarized = 0 AND summary_batch_id IS NOT NULL ORDER BY id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn list_by_batch(&self, batch_id: i64) -> RepositoryResult<Vec<ScaleEvent>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM scale_event WHERE summary_batch_id = ?1 ORDER BY id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![batch_id], |row| Self::map_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    fn map_row(row: &Row) -> rusqlite::Result<ScaleEvent> {
        let rule_str: Option<String> = row.get(8)?;
        let measurement_rule_applied = match rule_str {
            Some(s) => Some(parse_enum(8, &s, MeasurementRule::from_str)?),
            None => None,
        };
        let created_at_str: String = row.get(20)?;

        Ok(ScaleEvent {
            id: row.get(0)?,
            scale_device_id: row.get(1)?,
            production_order_number: row.get(2)?,
            plant_code: row.get(3)?,
            material_code: row.get(4)?,
            material_unit: row.get(5)?,
            raw_weight: row.get(6)?,
            converted_weight: row.get(7)?,
            measurement_rule_applied,
            production_group: row.get(9)?,
            production_shift: row.get(10)?,
            packing_group: row.get(11)?,
            packing_shift: row.get(12)?,
            production_lot: row.get(13)?,
            production_location: row.get(14)?,
            storage_location: row.get(15)?,
            storage_location_target: row.get(16)?,
            transaction_type: row.get(17)?,
            is_summarized: row.get::<_, i64>(18)? != 0,
            summary_batch_id: row.get(19)?,
            created_at: parse_ts(20, &created_at_str)?,
        })
    }
}
