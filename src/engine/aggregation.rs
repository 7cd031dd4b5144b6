// ==========================================
// 称重汇总系统 - 汇总引擎 (Reconcile)
// ==========================================
// 职责: 待汇总称重事件 → 分组 → 折算 → 批次/明细
// 流程:
//   事务内: 读取事件 → 分组 → 逐组解析主数据/选批次/选明细 → 批量插入 → 增量累计 → 提交
//   事务后: 置 is_summarized → 重算累计称重 (均可重复执行)
// 红线:
// - 同一时刻只允许一次汇总 (进程内单飞 + IMMEDIATE 事务)
// - processed 批次不再接收新明细
// - 主数据缺失的分组跳过,事件留待下次
// ==========================================

use crate::domain::batch::NewBatchItem;
use crate::domain::grouping_key::normalize_field;
use crate::domain::types::{ItemStatus, TransmissionStatus};
use crate::engine::batch_code::BatchCodeAllocator;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::grouping::{partition, EventGroup};
use crate::engine::measurement::convert;
use crate::engine::rollup::RollupEngine;
use crate::repository::batch_item_repo::BatchItemRepository;
use crate::repository::batch_repo::{BatchRepository, NewBatch};
use crate::repository::error::RepositoryError;
use crate::repository::material_repo::MaterialRepository;
use crate::repository::production_order_repo::ProductionOrderRepository;
use crate::repository::scale_event_repo::ScaleEventRepository;
use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

// ==========================================
// ReconcileResult - 汇总结果
// ==========================================
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileResult {
    pub batches_created: usize,   // 新建批次数
    pub batches_reused: usize,    // 复用既有 pending 批次数
    pub batches_touched: usize,   // 本次写入的批次数
    pub items_created: usize,     // 新建明细数
    pub items_updated: usize,     // 累加的既有明细数
    pub events_processed: usize,  // 归入批次的事件数
    pub groups_skipped: usize,    // 跳过的分组数
    pub elapsed_ms: i64,
}

/// 同一批次缓存键: (物料, 生产订单, 生产订单明细)
type BatchCacheKey = (String, String, i64);

/// 单个生产订单明细的本轮合计
#[derive(Debug, Clone, Copy, Default)]
struct DetailTally {
    converted: f64,
    raw: f64,
    events: usize,
}

/// 事务阶段的产出 (供事务后步骤使用)
#[derive(Debug, Default)]
struct TransactionalOutcome {
    result: ReconcileResult,
    event_ids: Vec<i64>,
    detail_ids: Vec<i64>,
}

/// 单组处理时的跨组状态
struct RunState {
    as_of: NaiveDate,
    batch_cache: HashMap<BatchCacheKey, i64>,
    touched_batches: BTreeSet<i64>,
    staged_items: Vec<NewBatchItem>,
    tallies: HashMap<i64, DetailTally>,
    detail_order: Vec<i64>,
    event_ids: Vec<i64>,
    result: ReconcileResult,
}

// ==========================================
// ReconcileEngine - 汇总引擎
// ==========================================
pub struct ReconcileEngine {
    conn: Arc<Mutex<Connection>>,
    event_repo: ScaleEventRepository,
    rollup: RollupEngine,
    allocator: BatchCodeAllocator,
    default_plant_code: String,
    run_guard: Mutex<()>,
}

impl ReconcileEngine {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        default_plant_code: String,
        batch_code_max_retries: u32,
    ) -> Self {
        Self {
            event_repo: ScaleEventRepository::new(conn.clone()),
            rollup: RollupEngine::new(conn.clone()),
            conn,
            allocator: BatchCodeAllocator::new(batch_code_max_retries),
            default_plant_code,
            run_guard: Mutex::new(()),
        }
    }

    /// 执行一次汇总 (定时与手动触发共用)
    ///
    /// # 返回
    /// - Err(ReconcileInProgress): 已有汇总在执行,本次未做任何事
    #[instrument(skip(self))]
    pub fn reconcile(&self) -> EngineResult<ReconcileResult> {
        self.reconcile_as_of(chrono::Local::now().date_naive())
    }

    /// 以指定日期 (批次号日期段) 执行汇总
    #[instrument(skip(self), fields(as_of = %as_of))]
    pub fn reconcile_as_of(&self, as_of: NaiveDate) -> EngineResult<ReconcileResult> {
        let _run = match self.run_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(EngineError::ReconcileInProgress),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let start = Instant::now();

        // ===== 事务阶段 =====
        let outcome = self.run_transactional(as_of)?;

        // ===== 事务后: 置汇总标记 =====
        self.flag_summarized(&outcome.event_ids);

        // ===== 事务后: 重算累计称重 =====
        for &detail_id in &outcome.detail_ids {
            if let Err(e) = self.rollup.recompute(&[detail_id]) {
                warn!(detail_id, error = %e, "累计称重重算失败,下次汇总或状态变更时重试");
            }
        }

        let mut result = outcome.result;
        result.elapsed_ms = start.elapsed().as_millis() as i64;

        info!(
            batches_created = result.batches_created,
            batches_reused = result.batches_reused,
            batches_touched = result.batches_touched,
            items_created = result.items_created,
            events_processed = result.events_processed,
            groups_skipped = result.groups_skipped,
            elapsed_ms = result.elapsed_ms,
            "汇总完成"
        );

        Ok(result)
    }

    fn run_transactional(&self, as_of: NaiveDate) -> EngineResult<TransactionalOutcome> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let events = ScaleEventRepository::list_unsummarized_tx(&tx)?;
        if events.is_empty() {
            tx.commit()?;
            debug!("无待汇总事件");
            return Ok(TransactionalOutcome::default());
        }

        let groups = partition(events);
        debug!(groups = groups.len(), "事件分组完成");

        let mut state = RunState {
            as_of,
            batch_cache: HashMap::new(),
            touched_batches: BTreeSet::new(),
            staged_items: Vec::new(),
            tallies: HashMap::new(),
            detail_order: Vec::new(),
            event_ids: Vec::new(),
            result: ReconcileResult::default(),
        };

        for group in &groups {
            match self.fold_group(&tx, group, &mut state) {
                Ok(true) => {}
                Ok(false) => state.result.groups_skipped += 1,
                Err(e) if e.is_skippable() => {
                    warn!(group = %group.key, events = group.events.len(), error = %e, "分组跳过");
                    state.result.groups_skipped += 1;
                }
                // 其它错误: 整个事务回滚 (tx drop)
                Err(e) => return Err(e),
            }
        }

        // ===== 批量插入新明细 =====
        BatchItemRepository::batch_insert_tx(&tx, &state.staged_items)?;
        state.result.items_created = state.staged_items.len();

        // ===== 增量累计 (事务后由重算覆盖) =====
        for detail_id in &state.detail_order {
            if let Some(tally) = state.tallies.get(detail_id) {
                ProductionOrderRepository::increment_total_weighed_tx(&tx, *detail_id, tally.converted)?;
                debug!(
                    detail_id,
                    converted = tally.converted,
                    raw = tally.raw,
                    events = tally.events,
                    "生产订单明细本轮合计"
                );
            }
        }

        tx.commit()?;

        state.result.batches_touched = state.touched_batches.len();
        state.result.events_processed = state.event_ids.len();

        Ok(TransactionalOutcome {
            result: state.result,
            event_ids: state.event_ids,
            detail_ids: state.detail_order,
        })
    }

    /// 处理单个分组
    ///
    /// # 返回
    /// - Ok(true): 已归入批次
    /// - Ok(false): 因 processed 批次存在而跳过
    /// - Err(NotFound): 主数据缺失 (调用方跳过)
    ///
    /// 所有可跳过的检查都在第一次写入之前完成
    fn fold_group(
        &self,
        conn: &Connection,
        group: &EventGroup,
        state: &mut RunState,
    ) -> EngineResult<bool> {
        let representative = group.representative();
        let material_code = &group.key.material_code;
        let order_number = &group.key.production_order_number;

        // ===== 主数据解析 =====
        let order = ProductionOrderRepository::find_order_by_number_tx(conn, order_number)?
            .ok_or_else(|| EngineError::not_found("ProductionOrder", order_number))?;
        let detail = ProductionOrderRepository::find_detail_tx(conn, order.id, material_code)?
            .ok_or_else(|| {
                EngineError::not_found(
                    "ProductionOrderDetail",
                    format!("{}/{}", order_number, material_code),
                )
            })?;

        // ===== processed 批次守卫 =====
        if BatchRepository::exists_with_status_tx(conn, detail.id, TransmissionStatus::Processed)? {
            debug!(detail_id = detail.id, group = %group.key, "存在 processed 批次,分组跳过");
            return Ok(false);
        }

        // ===== 工厂: 订单 > 事件 > 默认 =====
        let plant_code = normalize_field(order.plant_code.clone())
            .or_else(|| normalize_field(representative.plant_code.clone()))
            .unwrap_or_else(|| self.default_plant_code.clone());

        let material = MaterialRepository::find_by_code_tx(conn, material_code)?;

        // ===== 选择/创建批次 =====
        let batch_id = self.select_batch(conn, group, detail.id, &plant_code, state)?;

        // ===== 折算并回写事件 =====
        let mut converted_total = 0.0;
        for event in &group.events {
            let conversion = convert(event, material.as_ref());
            ScaleEventRepository::apply_conversion_tx(
                conn,
                event.id,
                conversion.converted_weight,
                conversion.rule_applied,
                batch_id,
            )?;
            converted_total += conversion.converted_weight;
        }
        let raw_total = group.total_raw_weight();

        // ===== 选择/暂存明细 =====
        let existing =
            BatchItemRepository::find_active_by_key_tx(conn, batch_id, &group.key.item, None)?;
        match existing.first() {
            Some(item) => {
                BatchItemRepository::add_totals_tx(conn, item.id, raw_total, converted_total)?;
                state.result.items_updated += 1;
            }
            None => state.staged_items.push(NewBatchItem {
                batch_id,
                material_code: material_code.clone(),
                production_order_number: order_number.clone(),
                material_unit: representative
                    .material_unit
                    .clone()
                    .or_else(|| material.as_ref().and_then(|m| m.unit_code.clone())),
                key: group.key.item.clone(),
                total_raw_weight: raw_total,
                total_converted_weight: converted_total,
                item_status: ItemStatus::Pending,
            }),
        }

        // ===== 本轮合计 =====
        if !state.tallies.contains_key(&detail.id) {
            state.detail_order.push(detail.id);
        }
        let tally = state.tallies.entry(detail.id).or_default();
        tally.converted += converted_total;
        tally.raw += raw_total;
        tally.events += group.events.len();
        state.event_ids.extend(group.event_ids());

        debug!(
            batch_id,
            group = %group.key,
            events = group.events.len(),
            raw_total,
            converted_total,
            "分组已归入批次"
        );
        Ok(true)
    }

    fn select_batch(
        &self,
        conn: &Connection,
        group: &EventGroup,
        detail_id: i64,
        plant_code: &str,
        state: &mut RunState,
    ) -> EngineResult<i64> {
        let cache_key = (
            group.key.material_code.clone(),
            group.key.production_order_number.clone(),
            detail_id,
        );
        let (from, to) = (group.min_event_id(), group.max_event_id());

        if let Some(&batch_id) = state.batch_cache.get(&cache_key) {
            BatchRepository::widen_event_range_tx(conn, batch_id, from, to)?;
            return Ok(batch_id);
        }

        let batch_id = match BatchRepository::find_pending_by_detail_tx(conn, detail_id)? {
            Some(batch) => {
                BatchRepository::widen_event_range_tx(conn, batch.id, from, to)?;
                state.result.batches_reused += 1;
                debug!(batch_id = batch.id, batch_code = %batch.batch_code, "复用 pending 批次");
                batch.id
            }
            None => {
                let (batch_id, batch_code) = self.allocator.allocate_and_insert(
                    conn,
                    plant_code,
                    state.as_of,
                    NewBatch {
                        batch_code: String::new(),
                        production_order_detail_id: detail_id,
                        material_code: group.key.material_code.clone(),
                        production_order_number: group.key.production_order_number.clone(),
                        scale_event_id_from: from,
                        scale_event_id_to: to,
                    },
                )?;
                state.result.batches_created += 1;
                info!(batch_id, batch_code = %batch_code, detail_id, "新建汇总批次");
                batch_id
            }
        };

        state.batch_cache.insert(cache_key, batch_id);
        state.touched_batches.insert(batch_id);
        Ok(batch_id)
    }

    /// 置 is_summarized (尽力而为)
    ///
    /// 同时补标此前事务已归属但标记失败的事件
    fn flag_summarized(&self, event_ids: &[i64]) {
        let mut ids: Vec<i64> = event_ids.to_vec();
        match self.event_repo.list_assigned_unflagged() {
            Ok(leftover) => ids.extend(leftover),
            Err(e) => warn!(error = %e, "读取待补标事件失败"),
        }
        ids.sort_unstable();
        ids.dedup();

        if ids.is_empty() {
            return;
        }
        match self.event_repo.mark_summarized(&ids) {
            Ok(flagged) => debug!(flagged, "事件已置汇总标记"),
            Err(e) => warn!(count = ids.len(), error = %e, "置汇总标记失败,事件已归属批次,不会重复汇总"),
        }
    }
}
