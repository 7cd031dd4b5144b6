// ==========================================
// 称重汇总系统 - 批次号分配器
// ==========================================
// 格式: SUM<工厂><YYYYMMDD><4位流水>, 例如 SUM1000202603010001
// 并发: 调用方处于 IMMEDIATE 事务内 (写锁已持有);
//       batch_code 唯一约束兜底,冲突时重新扫描并重试
// ==========================================

use crate::engine::error::{EngineError, EngineResult};
use crate::repository::batch_repo::{BatchRepository, NewBatch};
use crate::repository::error::RepositoryError;
use chrono::NaiveDate;
use rusqlite::Connection;
use tracing::warn;

pub const BATCH_CODE_PREFIX: &str = "SUM";
pub const SUFFIX_WIDTH: usize = 4;

/// 批次号前缀
pub fn code_prefix(plant_code: &str, as_of: NaiveDate) -> String {
    format!("{}{}{}", BATCH_CODE_PREFIX, plant_code, as_of.format("%Y%m%d"))
}

/// 解析批次号流水部分
pub fn parse_suffix(prefix: &str, code: &str) -> Option<u64> {
    code.strip_prefix(prefix)
        .and_then(|suffix| suffix.parse::<u64>().ok())
}

fn format_code(prefix: &str, suffix: u64) -> String {
    format!("{}{:0width$}", prefix, suffix, width = SUFFIX_WIDTH)
}

/// 基于当前最大批次号计算下一个
///
/// 流水号无法解析时视为 0
pub fn next_code(prefix: &str, current_max: Option<&str>) -> String {
    let last = current_max
        .and_then(|code| parse_suffix(prefix, code))
        .unwrap_or(0);
    format_code(prefix, last + 1)
}

// ==========================================
// BatchCodeAllocator - 批次号分配器
// ==========================================
#[derive(Debug, Clone)]
pub struct BatchCodeAllocator {
    max_retries: u32,
}

impl BatchCodeAllocator {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    /// 在调用方事务内分配批次号
    pub fn allocate(&self, conn: &Connection, plant_code: &str, as_of: NaiveDate) -> EngineResult<String> {
        let prefix = code_prefix(plant_code, as_of);
        let current = BatchRepository::max_code_with_prefix_tx(conn, &prefix)?;
        Ok(next_code(&prefix, current.as_deref()))
    }

    /// 重试时流水号不低于上次冲突的号码
    fn allocate_after(
        &self,
        conn: &Connection,
        prefix: &str,
        floor: Option<u64>,
    ) -> EngineResult<String> {
        let current = BatchRepository::max_code_with_prefix_tx(conn, prefix)?
            .and_then(|code| parse_suffix(prefix, &code))
            .unwrap_or(0);
        Ok(format_code(prefix, current.max(floor.unwrap_or(0)) + 1))
    }

    /// 分配批次号并插入批次
    ///
    /// # 参数
    /// - batch: batch_code 字段由本函数填写
    ///
    /// # 返回
    /// - (批次 id, 批次号)
    pub fn allocate_and_insert(
        &self,
        conn: &Connection,
        plant_code: &str,
        as_of: NaiveDate,
        mut batch: NewBatch,
    ) -> EngineResult<(i64, String)> {
        let prefix = code_prefix(plant_code, as_of);
        let mut floor = None;

        for attempt in 1..=self.max_retries {
            batch.batch_code = self.allocate_after(conn, &prefix, floor)?;
            match BatchRepository::insert_tx(conn, &batch) {
                Ok(id) => return Ok((id, batch.batch_code)),
                Err(RepositoryError::UniqueConstraintViolation(msg)) => {
                    floor = parse_suffix(&prefix, &batch.batch_code);
                    warn!(
                        batch_code = %batch.batch_code,
                        attempt,
                        error = %msg,
                        "批次号冲突,重新分配"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(EngineError::AllocationRace {
            prefix,
            attempts: self.max_retries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn test_first_code_of_the_day() {
        let prefix = code_prefix("P1", day());
        assert_eq!(prefix, "SUMP120260301");
        assert_eq!(next_code(&prefix, None), "SUMP1202603010001");
    }

    #[test]
    fn test_next_code_increments_suffix() {
        let prefix = code_prefix("1000", day());
        assert_eq!(
            next_code(&prefix, Some("SUM1000202603010009")),
            "SUM1000202603010010"
        );
        // 超过 4 位时自然扩展
        assert_eq!(
            next_code(&prefix, Some("SUM1000202603019999")),
            "SUM10002026030110000"
        );
    }

    #[test]
    fn test_unparseable_suffix_restarts() {
        let prefix = code_prefix("1000", day());
        assert_eq!(next_code(&prefix, Some("SUM100020260301XX")), "SUM1000202603010001");
    }

    #[test]
    fn test_allocate_and_insert_is_sequential() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        let order_id =
            crate::repository::ProductionOrderRepository::upsert_order_tx(&conn, "PO1", None).unwrap();
        let detail_id =
            crate::repository::ProductionOrderRepository::upsert_detail_tx(&conn, order_id, "M1").unwrap();

        let template = NewBatch {
            batch_code: String::new(),
            production_order_detail_id: detail_id,
            material_code: "M1".to_string(),
            production_order_number: "PO1".to_string(),
            scale_event_id_from: 1,
            scale_event_id_to: 1,
        };
        let allocator = BatchCodeAllocator::new(3);
        let (_, a) = allocator.allocate_and_insert(&conn, "P1", day(), template.clone()).unwrap();
        let (_, b) = allocator.allocate_and_insert(&conn, "P1", day(), template.clone()).unwrap();
        let (_, c) = allocator.allocate_and_insert(&conn, "P2", day(), template).unwrap();

        assert_eq!(a, "SUMP1202603010001");
        assert_eq!(b, "SUMP1202603010002");
        assert_eq!(c, "SUMP2202603010001");

        // allocate 只读取当前最大号,不占号
        assert_eq!(allocator.allocate(&conn, "P1", day()).unwrap(), "SUMP1202603010003");
        assert_eq!(allocator.allocate(&conn, "P1", day()).unwrap(), "SUMP1202603010003");
        assert_eq!(allocator.allocate(&conn, "P3", day()).unwrap(), "SUMP3202603010001");
        let next_day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert_eq!(allocator.allocate(&conn, "P1", next_day).unwrap(), "SUMP1202603020001");
    }
}
