// ==========================================
// 称重汇总系统 - 批次传输状态机
// ==========================================
// 状态流: pending → processed → sending → {success, failed}
//         failed → processed (人工重开)
// 发送流程:
//   1. 事务: 校验 processed → 批次置 sending → 重算收货重量 → 提交
//   2. 调用 SAP (带超时,不持有数据库锁)
//   3. 事务: 成功 → 明细 success,批次按明细汇总; 失败 → 批次与发送明细 failed
// 红线: 引擎不自动重试发送
// ==========================================

use crate::domain::batch::{Batch, BatchItem};
use crate::domain::types::{ItemStatus, TransmissionStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::rollup::RollupEngine;
use crate::engine::sink::{TransmissionRequest, TransmissionRow, TransmissionSink};
use crate::repository::batch_item_repo::BatchItemRepository;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::error::RepositoryError;
use chrono::NaiveDate;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, instrument, warn};

// ==========================================
// 对外结构
// ==========================================

/// 发送结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransmissionOutcome {
    pub batch: Batch,
    pub items: Vec<BatchItem>,
    pub http_status: Option<u16>,
    /// 失败原因 (成功时为空)
    pub failure: Option<String>,
}

impl TransmissionOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// 外部系统逐条回写
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemStatusUpdate {
    pub item_id: i64,
    pub status: ItemStatus,
    pub material_document_ref: Option<String>,
}

/// 发送阶段之间传递的数据
struct PreparedSend {
    batch: Batch,
    item_ids: Vec<i64>,
    request: TransmissionRequest,
}

enum SendResult {
    Delivered {
        status: u16,
        material_documents: HashMap<i64, String>,
    },
    Failed {
        status: Option<u16>,
        reason: String,
    },
}

// ==========================================
// TransmissionEngine - 批次传输引擎
// ==========================================
pub struct TransmissionEngine {
    conn: Arc<Mutex<Connection>>,
    sink: Arc<dyn TransmissionSink>,
    timeout: Duration,
}

impl TransmissionEngine {
    pub fn new(conn: Arc<Mutex<Connection>>, sink: Arc<dyn TransmissionSink>, timeout: Duration) -> Self {
        Self { conn, sink, timeout }
    }

    fn get_conn(&self) -> EngineResult<MutexGuard<'_, Connection>> {
        Ok(self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?)
    }

    // ==========================================
    // 发起传输
    // ==========================================

    /// 发送批次的 pending 明细到 SAP
    ///
    /// # 错误
    /// - StateConflict: 批次不是 processed
    /// - InvalidInput: 批次没有 pending 明细
    ///
    /// 外部失败不返回 Err,而是记录为 failed 并在结果中给出原因
    #[instrument(skip(self))]
    pub async fn begin_transmission(&self, batch_id: i64) -> EngineResult<TransmissionOutcome> {
        let posting_date = chrono::Local::now().date_naive();
        let prepared = self.prepare_send(batch_id, posting_date)?;

        info!(
            batch_id,
            batch_code = %prepared.batch.batch_code,
            items = prepared.item_ids.len(),
            "开始传输"
        );

        let result = match tokio::time::timeout(self.timeout, self.sink.send(&prepared.request)).await {
            Ok(Ok(response)) if response.is_success() => SendResult::Delivered {
                status: response.status,
                material_documents: response.material_documents,
            },
            Ok(Ok(response)) => SendResult::Failed {
                status: Some(response.status),
                reason: format!("SAP 返回 HTTP {}", response.status),
            },
            Ok(Err(e)) => SendResult::Failed {
                status: None,
                reason: e.to_string(),
            },
            Err(_) => SendResult::Failed {
                status: None,
                reason: format!("SAP 调用超时 ({} ms)", self.timeout.as_millis()),
            },
        };

        self.record_result(&prepared, result)
    }

    /// 第一阶段: 校验并置 sending
    fn prepare_send(&self, batch_id: i64, posting_date: NaiveDate) -> EngineResult<PreparedSend> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let batch = load_batch(&tx, batch_id)?;
        if batch.transmission_status != TransmissionStatus::Processed {
            return Err(EngineError::StateConflict {
                batch_id,
                status: batch.transmission_status,
                required: TransmissionStatus::Processed,
            });
        }

        let items: Vec<BatchItem> = BatchItemRepository::list_by_batch_tx(&tx, batch_id, false)?
            .into_iter()
            .filter(|i| i.item_status == ItemStatus::Pending)
            .collect();
        if items.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "批次 {} 没有待传输明细",
                batch.batch_code
            )));
        }

        BatchRepository::update_status_tx(&tx, batch_id, TransmissionStatus::Sending)?;
        RollupEngine::recompute_tx(&tx, batch.production_order_detail_id)?;
        tx.commit()?;

        let request = TransmissionRequest {
            batch_id,
            batch_code: batch.batch_code.clone(),
            items: items
                .iter()
                .map(|item| build_row(&batch, item, posting_date))
                .collect(),
        };

        Ok(PreparedSend {
            batch,
            item_ids: items.iter().map(|i| i.id).collect(),
            request,
        })
    }

    /// 第三阶段: 回写发送结果
    fn record_result(&self, prepared: &PreparedSend, result: SendResult) -> EngineResult<TransmissionOutcome> {
        let batch_id = prepared.batch.id;
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (http_status, failure) = match result {
            SendResult::Delivered {
                status,
                material_documents,
            } => {
                for &item_id in &prepared.item_ids {
                    BatchItemRepository::update_status_tx(
                        &tx,
                        item_id,
                        ItemStatus::Success,
                        material_documents.get(&item_id).map(String::as_str),
                    )?;
                }
                let items = BatchItemRepository::list_by_batch_tx(&tx, batch_id, false)?;
                let next = if items.iter().all(|i| i.item_status == ItemStatus::Success) {
                    TransmissionStatus::Success
                } else {
                    TransmissionStatus::Processed
                };
                transition_tx(&tx, batch_id, TransmissionStatus::Sending, next)?;
                info!(batch_id, status, batch_status = %next, "传输成功");
                (Some(status), None)
            }
            SendResult::Failed { status, reason } => {
                for &item_id in &prepared.item_ids {
                    BatchItemRepository::update_status_tx(&tx, item_id, ItemStatus::Failed, None)?;
                }
                transition_tx(&tx, batch_id, TransmissionStatus::Sending, TransmissionStatus::Failed)?;
                warn!(batch_id, reason = %reason, "传输失败,批次置 failed");
                (status, Some(reason))
            }
        };

        RollupEngine::recompute_tx(&tx, prepared.batch.production_order_detail_id)?;
        let batch = load_batch(&tx, batch_id)?;
        let items = BatchItemRepository::list_by_batch_tx(&tx, batch_id, false)?;
        tx.commit()?;

        Ok(TransmissionOutcome {
            batch,
            items,
            http_status,
            failure,
        })
    }

    // ==========================================
    // 外部回写
    // ==========================================

    /// 按外部系统结果批量更新明细状态,并重算所属批次状态
    ///
    /// 批次规则: 任一明细 failed → processed; 全部 success → success; 否则不变
    #[instrument(skip(self, updates), fields(count = updates.len()))]
    pub fn finalize_items(&self, updates: &[ItemStatusUpdate]) -> EngineResult<Vec<BatchItem>> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // batch_id → 批次 (按 id 顺序处理,结果确定)
        let mut batches: BTreeMap<i64, Batch> = BTreeMap::new();
        for update in updates {
            let item = BatchItemRepository::find_by_id_tx(&tx, update.item_id)?
                .filter(|i| !i.is_deleted)
                .ok_or_else(|| EngineError::not_found("BatchItem", update.item_id))?;

            if !batches.contains_key(&item.batch_id) {
                let batch = load_batch(&tx, item.batch_id)?;
                if batch.transmission_status == TransmissionStatus::Pending {
                    return Err(EngineError::StateConflict {
                        batch_id: batch.id,
                        status: batch.transmission_status,
                        required: TransmissionStatus::Processed,
                    });
                }
                batches.insert(batch.id, batch);
            }

            BatchItemRepository::update_status_tx(
                &tx,
                update.item_id,
                update.status,
                update.material_document_ref.as_deref(),
            )?;
        }

        for batch in batches.values() {
            let items = BatchItemRepository::list_by_batch_tx(&tx, batch.id, false)?;
            let next = if items.iter().any(|i| i.item_status == ItemStatus::Failed) {
                TransmissionStatus::Processed
            } else if !items.is_empty() && items.iter().all(|i| i.item_status == ItemStatus::Success) {
                TransmissionStatus::Success
            } else {
                batch.transmission_status
            };

            if next != batch.transmission_status {
                BatchRepository::update_status_tx(&tx, batch.id, next)?;
                info!(batch_id = batch.id, from = %batch.transmission_status, to = %next, "批次状态按明细回写更新");
            }
            RollupEngine::recompute_tx(&tx, batch.production_order_detail_id)?;
        }

        let mut updated = Vec::with_capacity(updates.len());
        for update in updates {
            if let Some(item) = BatchItemRepository::find_by_id_tx(&tx, update.item_id)? {
                updated.push(item);
            }
        }

        tx.commit()?;
        Ok(updated)
    }

    // ==========================================
    // 人工状态操作
    // ==========================================

    /// pending → processed (人工确认,之后不再接收新事件)
    pub fn promote_batch(&self, batch_id: i64) -> EngineResult<Batch> {
        self.operator_transition(batch_id, TransmissionStatus::Pending, TransmissionStatus::Processed)
    }

    /// failed → processed (人工重开,允许重建失败明细后重新发送)
    pub fn reopen_batch(&self, batch_id: i64) -> EngineResult<Batch> {
        self.operator_transition(batch_id, TransmissionStatus::Failed, TransmissionStatus::Processed)
    }

    #[instrument(skip(self))]
    fn operator_transition(
        &self,
        batch_id: i64,
        from: TransmissionStatus,
        to: TransmissionStatus,
    ) -> EngineResult<Batch> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let batch = load_batch(&tx, batch_id)?;
        // sending → processed 虽在转换表内,只能由传输结果触发
        if batch.transmission_status != from {
            return Err(EngineError::InvalidStateTransition {
                batch_id,
                from: batch.transmission_status,
                to,
            });
        }
        transition_tx(&tx, batch_id, from, to)?;

        RollupEngine::recompute_tx(&tx, batch.production_order_detail_id)?;
        let batch = load_batch(&tx, batch_id)?;
        tx.commit()?;

        info!(batch_id, from = %from, to = %to, "批次状态人工变更");
        Ok(batch)
    }
}

// ==========================================
// 辅助函数
// ==========================================

fn load_batch(conn: &Connection, batch_id: i64) -> EngineResult<Batch> {
    BatchRepository::find_by_id_tx(conn, batch_id)?
        .filter(|b| !b.is_deleted)
        .ok_or_else(|| EngineError::not_found("Batch", batch_id))
}

/// 按状态转换表校验后写入
fn transition_tx(
    conn: &Connection,
    batch_id: i64,
    from: TransmissionStatus,
    to: TransmissionStatus,
) -> EngineResult<()> {
    if !from.can_transition_to(to) {
        return Err(EngineError::InvalidStateTransition { batch_id, from, to });
    }
    BatchRepository::update_status_tx(conn, batch_id, to)?;
    Ok(())
}

fn build_row(batch: &Batch, item: &BatchItem, posting_date: NaiveDate) -> TransmissionRow {
    TransmissionRow {
        item_id: item.id,
        batch_code: batch.batch_code.clone(),
        production_order_number: item.production_order_number.clone(),
        material_code: item.material_code.clone(),
        plant_code: item.plant_code.clone(),
        storage_location: item.storage_location.clone(),
        storage_location_target: item.storage_location_target.clone(),
        production_lot: item.production_lot.clone(),
        transaction_type: item.transaction_type.clone(),
        quantity: item.total_converted_weight,
        unit: item.material_unit.clone(),
        posting_date,
    }
}
