// ==========================================
// 称重汇总系统 - 批次明细数据仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: 每次更新校验 revision (乐观锁),0 行命中即冲突
// ==========================================

use crate::domain::batch::{BatchItem, NewBatchItem};
use crate::domain::grouping_key::ItemKey;
use crate::domain::types::ItemStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{format_ts, now_ts, parse_enum, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    id, batch_id, material_code, production_order_number, material_unit,
    plant_code, transaction_type, production_group, production_shift,
    packing_group, packing_shift, production_lot, production_location,
    storage_location, storage_location_target,
    total_raw_weight, total_converted_weight, item_status, material_document_ref,
    is_deleted, revision, created_at, updated_at
"#;

// ==========================================
// BatchItemRepository - 批次明细仓储
// ==========================================
pub struct BatchItemRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchItemRepository {
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

    pub fn insert_tx(conn: &Connection, item: &NewBatchItem) -> RepositoryResult<i64> {
        let now = format_ts(&now_ts());
        let key = &item.key;
        conn.execute(
            r#"
            INSERT INTO weight_summary_batch_item (
                batch_id, material_code, production_order_number, material_unit,
                plant_code, transaction_type, production_group, production_shift,
                packing_group, packing_shift, production_lot, production_location,
                storage_location, storage_location_target,
                total_raw_weight, total_converted_weight, item_status,
                is_deleted, revision, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, 0, 0, ?18, ?18)
            "#,
            params![
                item.batch_id,
                item.material_code,
                item.production_order_number,
                item.material_unit,
                key.plant_code,
                key.transaction_type,
                key.production_group,
                key.production_shift,
                key.packing_group,
                key.packing_shift,
                key.production_lot,
                key.production_location,
                key.storage_location,
                key.storage_location_target,
                item.total_raw_weight,
                item.total_converted_weight,
                item.item_status.as_str(),
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// 批量插入 (汇总引擎暂存的新明细)
    ///
    /// # 返回
    /// - 按输入顺序的新明细 id
    pub fn batch_insert_tx(conn: &Connection, items: &[NewBatchItem]) -> RepositoryResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            ids.push(Self::insert_tx(conn, item)?);
        }
        Ok(ids)
    }

    /// 累加重量 (汇总引擎命中既有明细时调用,描述字段不变)
    pub fn add_totals_tx(
        conn: &Connection,
        item_id: i64,
        raw_delta: f64,
        converted_delta: f64,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE weight_summary_batch_item
            SET total_raw_weight = total_raw_weight + ?1,
                total_converted_weight = total_converted_weight + ?2,
                revision = revision + 1,
                updated_at = ?3
            WHERE id = ?4 AND is_deleted = 0
            "#,
            params![raw_delta, converted_delta, format_ts(&now_ts()), item_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("BatchItem", item_id));
        }
        Ok(())
    }

    /// 整行回写 (乐观锁)
    ///
    /// # 参数
    /// - item: 携带读取时的 revision
    ///
    /// # 返回
    /// - 写入后的新 revision
    pub fn update_tx(conn: &Connection, item: &BatchItem) -> RepositoryResult<i64> {
        let rows = conn.execute(
            r#"
            UPDATE weight_summary_batch_item
            SET material_unit = ?1,
                plant_code = ?2,
                transaction_type = ?3,
                production_group = ?4,
                production_shift = ?5,
                packing_group = ?6,
                packing_shift = ?7,
                production_lot = ?8,
                production_location = ?9,
                storage_location = ?10,
                storage_location_target = ?11,
                total_raw_weight = ?12,
                total_converted_weight = ?13,
                item_status = ?14,
                material_document_ref = ?15,
                is_deleted = ?16,
                revision = revision + 1,
                updated_at = ?17
            WHERE id = ?18 AND revision = ?19
            "#,
            params![
                item.material_unit,
                item.plant_code,
                item.transaction_type,
                item.production_group,
                item.production_shift,
                item.packing_group,
                item.packing_shift,
                item.production_lot,
                item.production_location,
                item.storage_location,
                item.storage_location_target,
                item.total_raw_weight,
                item.total_converted_weight,
                item.item_status.as_str(),
                item.material_document_ref,
                item.is_deleted as i64,
                format_ts(&now_ts()),
                item.id,
                item.revision,
            ],
        )?;

        if rows == 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                entity: "BatchItem".to_string(),
                id: item.id.to_string(),
                expected: item.revision,
            });
        }
        Ok(item.revision + 1)
    }

    /// 软删除 (乐观锁)
    pub fn soft_delete_tx(conn: &Connection, item_id: i64, revision: i64) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE weight_summary_batch_item
            SET is_deleted = 1, revision = revision + 1, updated_at = ?1
            WHERE id = ?2 AND revision = ?3
            "#,
            params![format_ts(&now_ts()), item_id, revision],
        )?;
        if rows == 0 {
            return Err(RepositoryError::OptimisticLockFailure {
                entity: "BatchItem".to_string(),
                id: item_id.to_string(),
                expected: revision,
            });
        }
        Ok(())
    }

    /// 回写明细状态与物料凭证 (传输结果/外部回写)
    ///
    /// material_document_ref 为 None 时保留原值
    pub fn update_status_tx(
        conn: &Connection,
        item_id: i64,
        status: ItemStatus,
        material_document_ref: Option<&str>,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE weight_summary_batch_item
            SET item_status = ?1,
                material_document_ref = COALESCE(?2, material_document_ref),
                revision = revision + 1,
                updated_at = ?3
            WHERE id = ?4 AND is_deleted = 0
            "#,
            params![status.as_str(), material_document_ref, format_ts(&now_ts()), item_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("BatchItem", item_id));
        }
        Ok(())
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, item_id: i64) -> RepositoryResult<Option<BatchItem>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, item_id)
    }

    pub fn find_by_id_tx(conn: &Connection, item_id: i64) -> RepositoryResult<Option<BatchItem>> {
        let sql = format!(
            "SELECT {} FROM weight_summary_batch_item WHERE id = ?1",
            SELECT_COLUMNS
        );
        let item = conn
            .query_row(&sql, params![item_id], |row| Self::map_row(row))
            .optional()?;
        Ok(item)
    }

    pub fn list_by_batch(
        &self,
        batch_id: i64,
        include_deleted: bool,
    ) -> RepositoryResult<Vec<BatchItem>> {
        let conn = self.get_conn()?;
        Self::list_by_batch_tx(&conn, batch_id, include_deleted)
    }

    pub fn list_by_batch_tx(
        conn: &Connection,
        batch_id: i64,
        include_deleted: bool,
    ) -> RepositoryResult<Vec<BatchItem>> {
        let filter = if include_deleted { "" } else { "AND is_deleted = 0" };
        let sql = format!(
            "SELECT {} FROM weight_summary_batch_item WHERE batch_id = ?1 {} ORDER BY id",
            SELECT_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(params![batch_id], |row| Self::map_row(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    /// 批次内明细键完全相同的未删除明细
    ///
    /// 使用 `IS ?` 比较,NULL 与 NULL 视为相等
    ///
    /// # 参数
    /// - exclude_item_id: 排除的明细 (通常是正在修改的明细本身)
    pub fn find_active_by_key_tx(
        conn: &Connection,
        batch_id: i64,
        key: &ItemKey,
        exclude_item_id: Option<i64>,
    ) -> RepositoryResult<Vec<BatchItem>> {
        let sql = format!(
            r#"SELECT {} FROM weight_summary_batch_item
               WHERE batch_id = ?1
                 AND is_deleted = 0
                 AND id IS NOT ?2
                 AND plant_code IS ?3
                 AND transaction_type IS ?4
                 AND production_group IS ?5
                 AND production_shift IS ?6
                 AND packing_group IS ?7
                 AND packing_shift IS ?8
                 AND production_lot IS ?9
                 AND production_location IS ?10
                 AND storage_location IS ?11
                 AND storage_location_target IS ?12
               ORDER BY id"#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let items = stmt
            .query_map(
                params![
                    batch_id,
                    exclude_item_id,
                    key.plant_code,
                    key.transaction_type,
                    key.production_group,
                    key.production_shift,
                    key.packing_group,
                    key.packing_shift,
                    key.production_lot,
                    key.production_location,
                    key.storage_location,
                    key.storage_location_target,
                ],
                |row| Self::map_row(row),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn map_row(row: &Row) -> rusqlite::Result<BatchItem> {
        let status_str: String = row.get(17)?;
        let created_at_str: String = row.get(21)?;
        let updated_at_str: String = row.get(22)?;

        Ok(BatchItem {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            material_code: row.get(2)?,
            production_order_number: row.get(3)?,
            material_unit: row.get(4)?,
            plant_code: row.get(5)?,
            transaction_type: row.get(6)?,
            production_group: row.get(7)?,
            production_shift: row.get(8)?,
            packing_group: row.get(9)?,
            packing_shift: row.get(10)?,
            production_lot: row.get(11)?,
            production_location: row.get(12)?,
            storage_location: row.get(13)?,
            storage_location_target: row.get(14)?,
            total_raw_weight: row.get(15)?,
            total_converted_weight: row.get(16)?,
            item_status: parse_enum(17, &status_str, ItemStatus::from_str)?,
            material_document_ref: row.get(18)?,
            is_deleted: row.get::<_, i64>(19)? != 0,
            revision: row.get(20)?,
            created_at: parse_ts(21, &created_at_str)?,
            updated_at: parse_ts(22, &updated_at_str)?,
        })
    }
}
