// ==========================================
// 称重汇总系统 - 累计称重重算
// ==========================================
// 职责: 从批次明细全量重算生产订单明细上的累计值
// 说明: 重算结果是权威值,覆盖汇总事务内的增量累加
// ==========================================

use crate::domain::production_order::DetailRollup;
use crate::engine::error::EngineResult;
use crate::repository::error::RepositoryError;
use crate::repository::production_order_repo::ProductionOrderRepository;
use rusqlite::{Connection, TransactionBehavior};
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct RollupEngine {
    conn: Arc<Mutex<Connection>>,
}

impl RollupEngine {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 在调用方事务内重算并写回
    pub fn recompute_tx(conn: &Connection, detail_id: i64) -> EngineResult<DetailRollup> {
        let rollup = ProductionOrderRepository::compute_rollup_tx(conn, detail_id)?;
        ProductionOrderRepository::write_rollup_tx(conn, &rollup)?;
        debug!(
            detail_id,
            total_weighed = rollup.total_weighed,
            total_weighed_good_receive = rollup.total_weighed_good_receive,
            weighing_count = rollup.weighing_count,
            "累计称重已重算"
        );
        Ok(rollup)
    }

    /// 独立事务重算一组生产订单明细
    pub fn recompute(&self, detail_ids: &[i64]) -> EngineResult<Vec<DetailRollup>> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut rollups = Vec::with_capacity(detail_ids.len());
        for &detail_id in detail_ids {
            rollups.push(Self::recompute_tx(&tx, detail_id)?);
        }

        tx.commit()?;
        Ok(rollups)
    }
}
