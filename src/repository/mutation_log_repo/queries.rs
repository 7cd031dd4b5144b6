use super::core::MutationLogRepository;
use crate::domain::mutation_log::{MutationLogDetail, MutationLogEntry, MutationRecord};
use crate::domain::types::MutationOperation;
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::{parse_enum, parse_ts};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Result as SqliteResult, Row};
use serde_json::Value as JsonValue;

const ENTRY_COLUMNS: &str = r#"
    id, batch_id, source_item_id, target_item_id,
    operation, actor, payload_json, created_at
"#;

impl MutationLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, log_id: &str) -> RepositoryResult<Option<MutationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!("SELECT {} FROM item_mutation_log WHERE id = ?", ENTRY_COLUMNS);
        let entry = conn
            .query_row(&sql, params![log_id], |row| Self::map_entry(row))
            .optional()?;
        Ok(entry)
    }

    /// 与明细相关的全部日志 (作为源或目标),按时间正序
    pub fn find_by_item(&self, item_id: i64) -> RepositoryResult<Vec<MutationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            r#"SELECT {} FROM item_mutation_log
               WHERE source_item_id = ?1 OR target_item_id = ?1
               ORDER BY created_at ASC, rowid ASC"#,
            ENTRY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![item_id], |row| Self::map_entry(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn find_by_batch(&self, batch_id: i64) -> RepositoryResult<Vec<MutationLogEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {} FROM item_mutation_log WHERE batch_id = ? ORDER BY created_at ASC, rowid ASC",
            ENTRY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![batch_id], |row| Self::map_entry(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn find_details(&self, log_id: &str) -> RepositoryResult<Vec<MutationLogDetail>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, log_id, item_id, before_json, after_json
            FROM item_mutation_log_detail
            WHERE log_id = ?
            ORDER BY rowid ASC
            "#,
        )?;
        let details = stmt
            .query_map(params![log_id], |row| Self::map_detail(row))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(details)
    }

    /// 明细的完整修改历史 (日志 + 快照)
    pub fn find_records_by_item(&self, item_id: i64) -> RepositoryResult<Vec<MutationRecord>> {
        let entries = self.find_by_item(item_id)?;
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let details = self.find_details(&entry.id)?;
            records.push(MutationRecord { entry, details });
        }
        Ok(records)
    }

    fn map_entry(row: &Row) -> SqliteResult<MutationLogEntry> {
        let operation_str: String = row.get(4)?;
        let payload_str: Option<String> = row.get(6)?;
        let created_at_str: String = row.get(7)?;

        Ok(MutationLogEntry {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            source_item_id: row.get(2)?,
            target_item_id: row.get(3)?,
            operation: parse_enum(4, &operation_str, MutationOperation::from_str)?,
            actor: row.get(5)?,
            payload_json: parse_json(6, payload_str)?,
            created_at: parse_ts(7, &created_at_str)?,
        })
    }

    fn map_detail(row: &Row) -> SqliteResult<MutationLogDetail> {
        let before_str: Option<String> = row.get(3)?;
        let after_str: Option<String> = row.get(4)?;

        Ok(MutationLogDetail {
            id: row.get(0)?,
            log_id: row.get(1)?,
            item_id: row.get(2)?,
            before_json: parse_json(3, before_str)?,
            after_json: parse_json(4, after_str)?,
        })
    }
}

fn parse_json(idx: usize, raw: Option<String>) -> SqliteResult<Option<JsonValue>> {
    match raw {
        Some(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))),
        None => Ok(None),
    }
}
