// ==========================================
// 称重汇总系统 - 生产订单主数据仓储
// ==========================================
// 说明: 订单/明细为外部主数据的本地镜像;
//       累计称重字段 (rollup) 由汇总引擎写入
// ==========================================

use crate::domain::production_order::{DetailRollup, ProductionOrder, ProductionOrderDetail};
use crate::domain::types::TransmissionStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const DETAIL_COLUMNS: &str = r#"
    id, production_order_id, material_code,
    total_weighed, total_weighed_good_receive, weighing_count
"#;

// ==========================================
// ProductionOrderRepository - 生产订单仓储
// ==========================================
pub struct ProductionOrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ProductionOrderRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 主数据镜像写入 (同步任务/测试使用)
    // ==========================================

    pub fn upsert_order(&self, order_number: &str, plant_code: Option<&str>) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::upsert_order_tx(&conn, order_number, plant_code)
    }

    /// 按订单号插入或更新工厂
    pub fn upsert_order_tx(
        conn: &Connection,
        order_number: &str,
        plant_code: Option<&str>,
    ) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT INTO production_order (order_number, plant_code)
            VALUES (?1, ?2)
            ON CONFLICT(order_number) DO UPDATE SET plant_code = excluded.plant_code
            "#,
            params![order_number, plant_code],
        )?;
        let id = conn.query_row(
            "SELECT id FROM production_order WHERE order_number = ?1",
            params![order_number],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn upsert_detail(&self, production_order_id: i64, material_code: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        Self::upsert_detail_tx(&conn, production_order_id, material_code)
    }

    /// 按 (订单, 物料) 插入明细,已存在时返回既有 id (累计值不动)
    pub fn upsert_detail_tx(
        conn: &Connection,
        production_order_id: i64,
        material_code: &str,
    ) -> RepositoryResult<i64> {
        conn.execute(
            r#"
            INSERT OR IGNORE INTO production_order_detail (production_order_id, material_code)
            VALUES (?1, ?2)
            "#,
            params![production_order_id, material_code],
        )?;
        let id = conn.query_row(
            "SELECT id FROM production_order_detail WHERE production_order_id = ?1 AND material_code = ?2",
            params![production_order_id, material_code],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_order_by_number(&self, order_number: &str) -> RepositoryResult<Option<ProductionOrder>> {
        let conn = self.get_conn()?;
        Self::find_order_by_number_tx(&conn, order_number)
    }

    pub fn find_order_by_number_tx(
        conn: &Connection,
        order_number: &str,
    ) -> RepositoryResult<Option<ProductionOrder>> {
        let order = conn
            .query_row(
                "SELECT id, order_number, plant_code FROM production_order WHERE order_number = ?1",
                params![order_number],
                |row| {
                    Ok(ProductionOrder {
                        id: row.get(0)?,
                        order_number: row.get(1)?,
                        plant_code: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(order)
    }

    pub fn find_detail_tx(
        conn: &Connection,
        production_order_id: i64,
        material_code: &str,
    ) -> RepositoryResult<Option<ProductionOrderDetail>> {
        let sql = format!(
            "SELECT {} FROM production_order_detail WHERE production_order_id = ?1 AND material_code = ?2",
            DETAIL_COLUMNS
        );
        let detail = conn
            .query_row(&sql, params![production_order_id, material_code], |row| {
                Self::map_detail(row)
            })
            .optional()?;
        Ok(detail)
    }

    pub fn find_detail_by_id(&self, detail_id: i64) -> RepositoryResult<Option<ProductionOrderDetail>> {
        let conn = self.get_conn()?;
        Self::find_detail_by_id_tx(&conn, detail_id)
    }

    pub fn find_detail_by_id_tx(
        conn: &Connection,
        detail_id: i64,
    ) -> RepositoryResult<Option<ProductionOrderDetail>> {
        let sql = format!(
            "SELECT {} FROM production_order_detail WHERE id = ?1",
            DETAIL_COLUMNS
        );
        let detail = conn
            .query_row(&sql, params![detail_id], |row| Self::map_detail(row))
            .optional()?;
        Ok(detail)
    }

    // ==========================================
    // 累计称重 (rollup)
    // ==========================================

    /// 事务内的增量累加 (随后由重算覆盖)
    pub fn increment_total_weighed_tx(
        conn: &Connection,
        detail_id: i64,
        delta: f64,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            "UPDATE production_order_detail SET total_weighed = total_weighed + ?1 WHERE id = ?2",
            params![delta, detail_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("ProductionOrderDetail", detail_id));
        }
        Ok(())
    }

    /// 从批次明细与已归属事件全量计算累计值
    ///
    /// - total_weighed: 未删除批次的未删除明细折算重量之和
    /// - total_weighed_good_receive: 同上,仅限 sending/success 批次
    /// - weighing_count: 归属于未删除批次的事件数
    pub fn compute_rollup_tx(conn: &Connection, detail_id: i64) -> RepositoryResult<DetailRollup> {
        let (total_weighed, total_weighed_good_receive): (f64, f64) = conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(i.total_converted_weight), 0),
                COALESCE(SUM(CASE WHEN b.transmission_status IN (?2, ?3)
                                  THEN i.total_converted_weight ELSE 0 END), 0)
            FROM weight_summary_batch_item i
            JOIN weight_summary_batch b ON b.id = i.batch_id
            WHERE b.production_order_detail_id = ?1
              AND b.is_deleted = 0
              AND i.is_deleted = 0
            "#,
            params![
                detail_id,
                TransmissionStatus::Sending.as_str(),
                TransmissionStatus::Success.as_str(),
            ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let weighing_count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*)
            FROM scale_event e
            JOIN weight_summary_batch b ON b.id = e.summary_batch_id
            WHERE b.production_order_detail_id = ?1
              AND b.is_deleted = 0
            "#,
            params![detail_id],
            |row| row.get(0),
        )?;

        Ok(DetailRollup {
            production_order_detail_id: detail_id,
            total_weighed,
            total_weighed_good_receive,
            weighing_count,
        })
    }

    pub fn write_rollup_tx(conn: &Connection, rollup: &DetailRollup) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"
            UPDATE production_order_detail
            SET total_weighed = ?1,
                total_weighed_good_receive = ?2,
                weighing_count = ?3
            WHERE id = ?4
            "#,
            params![
                rollup.total_weighed,
                rollup.total_weighed_good_receive,
                rollup.weighing_count,
                rollup.production_order_detail_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found(
                "ProductionOrderDetail",
                rollup.production_order_detail_id,
            ));
        }
        Ok(())
    }

    fn map_detail(row: &Row) -> rusqlite::Result<ProductionOrderDetail> {
        Ok(ProductionOrderDetail {
            id: row.get(0)?,
            production_order_id: row.get(1)?,
            material_code: row.get(2)?,
            total_weighed: row.get(3)?,
            total_weighed_good_receive: row.get(4)?,
            weighing_count: row.get(5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_test_db() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let repo = ProductionOrderRepository::new(setup_test_db());

        let a = repo.upsert_order("PO1", Some("P1")).unwrap();
        let b = repo.upsert_order("PO1", Some("P2")).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            repo.find_order_by_number("PO1").unwrap().unwrap().plant_code.as_deref(),
            Some("P2")
        );

        let d1 = repo.upsert_detail(a, "M1").unwrap();
        let d2 = repo.upsert_detail(a, "M1").unwrap();
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_empty_rollup_is_zero() {
        let conn = setup_test_db();
        let repo = ProductionOrderRepository::new(conn.clone());
        let order_id = repo.upsert_order("PO1", None).unwrap();
        let detail_id = repo.upsert_detail(order_id, "M1").unwrap();

        let guard = conn.lock().unwrap();
        ProductionOrderRepository::increment_total_weighed_tx(&guard, detail_id, 7.5).unwrap();
        let rollup = ProductionOrderRepository::compute_rollup_tx(&guard, detail_id).unwrap();
        assert_eq!(rollup.total_weighed, 0.0);
        assert_eq!(rollup.weighing_count, 0);

        ProductionOrderRepository::write_rollup_tx(&guard, &rollup).unwrap();
        let detail = ProductionOrderRepository::find_detail_by_id_tx(&guard, detail_id)
            .unwrap()
            .unwrap();
        assert_eq!(detail.total_weighed, 0.0);
    }

    #[test]
    fn test_missing_detail_is_not_found() {
        let conn = setup_test_db();
        let guard = conn.lock().unwrap();
        let err = ProductionOrderRepository::increment_total_weighed_tx(&guard, 999, 1.0).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
