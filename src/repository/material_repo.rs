// ==========================================
// 称重汇总系统 - 物料主数据仓储
// ==========================================
// 说明: 计量规则无法识别时按"未配置"返回,由汇总引擎走回退逻辑
// 红线: Repository 不含业务逻辑
// ==========================================

use crate::domain::production_order::Material;
use crate::domain::types::MeasurementRule;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// MaterialRepository - 物料仓储
// ==========================================
pub struct MaterialRepository {
    conn: Arc<Mutex<Connection>>,
}

impl MaterialRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn upsert(&self, material: &Material) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        Self::upsert_tx(&conn, material)
    }

    pub fn upsert_tx(conn: &Connection, material: &Material) -> RepositoryResult<()> {
        conn.execute(
            r#"
            INSERT INTO material (material_code, measurement_rule, fixed_value, unit_code)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(material_code) DO UPDATE SET
                measurement_rule = excluded.measurement_rule,
                fixed_value = excluded.fixed_value,
                unit_code = excluded.unit_code
            "#,
            params![
                material.material_code,
                material.measurement_rule.map(|r| r.as_str()),
                material.fixed_value,
                material.unit_code,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_code(&self, material_code: &str) -> RepositoryResult<Option<Material>> {
        let conn = self.get_conn()?;
        Self::find_by_code_tx(&conn, material_code)
    }

    pub fn find_by_code_tx(
        conn: &Connection,
        material_code: &str,
    ) -> RepositoryResult<Option<Material>> {
        let material = conn
            .query_row(
                r#"
                SELECT material_code, measurement_rule, fixed_value, unit_code
                FROM material
                WHERE material_code = ?1
                "#,
                params![material_code],
                |row| Self::map_row(row),
            )
            .optional()?;
        Ok(material)
    }

    fn map_row(row: &Row) -> rusqlite::Result<Material> {
        let rule_str: Option<String> = row.get(1)?;
        Ok(Material {
            material_code: row.get(0)?,
            measurement_rule: rule_str.as_deref().and_then(MeasurementRule::from_str),
            fixed_value: row.get(2)?,
            unit_code: row.get(3)?,
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
    fn test_upsert_and_find() {
        let repo = MaterialRepository::new(setup_test_db());
        repo.upsert(&Material {
            material_code: "M1".to_string(),
            measurement_rule: Some(MeasurementRule::Standard),
            fixed_value: Some(5.0),
            unit_code: Some("PC".to_string()),
        })
        .unwrap();

        let m = repo.find_by_code("M1").unwrap().unwrap();
        assert_eq!(m.measurement_rule, Some(MeasurementRule::Standard));
        assert_eq!(m.fixed_value, Some(5.0));
        assert!(repo.find_by_code("M2").unwrap().is_none());
    }

    #[test]
    fn test_unrecognised_rule_reads_as_none() {
        let conn = setup_test_db();
        {
            let guard = conn.lock().unwrap();
            guard
                .execute(
                    "INSERT INTO material (material_code, measurement_rule) VALUES ('M9', 'by_volume')",
                    [],
                )
                .unwrap();
        }
        let repo = MaterialRepository::new(conn);
        assert_eq!(repo.find_by_code("M9").unwrap().unwrap().measurement_rule, None);
    }
}
