// ==========================================
// 称重汇总系统 - 称重汇总 API
// ==========================================
// 职责: 汇总触发、明细修改、批次传输、读侧查询
// ==========================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::domain::batch::{Batch, BatchItem, ItemChanges};
use crate::domain::mutation_log::{MutationLogDetail, MutationLogEntry, MutationRecord};
use crate::domain::production_order::ProductionOrderDetail;
use crate::domain::types::TransmissionStatus;
use crate::engine::{
    ItemMutationEngine, ItemStatusUpdate, MutationOutcome, ReconcileEngine, ReconcileResult,
    TransmissionEngine, TransmissionOutcome,
};
use crate::repository::{
    BatchItemRepository, BatchRepository, MutationLogRepository, ProductionOrderRepository,
};

// ==========================================
// 响应结构
// ==========================================

/// 批次 + 明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchWithItems {
    pub batch: Batch,
    pub items: Vec<BatchItem>,
}

// ==========================================
// WeightSummaryApi - 称重汇总 API
// ==========================================

/// 称重汇总API
///
/// 职责：
/// 1. 汇总触发（手动/定时共用同一入口）
/// 2. 明细修改（edit / split / merge / createFromFailed）
/// 3. 批次传输与状态操作
/// 4. 批次、明细、修改日志、累计称重查询
pub struct WeightSummaryApi {
    reconcile_engine: Arc<ReconcileEngine>,
    mutation_engine: Arc<ItemMutationEngine>,
    transmission_engine: Option<Arc<TransmissionEngine>>,
    batch_repo: Arc<BatchRepository>,
    item_repo: Arc<BatchItemRepository>,
    mutation_log_repo: Arc<MutationLogRepository>,
    order_repo: Arc<ProductionOrderRepository>,
}

impl WeightSummaryApi {
    pub fn new(
        reconcile_engine: Arc<ReconcileEngine>,
        mutation_engine: Arc<ItemMutationEngine>,
        transmission_engine: Option<Arc<TransmissionEngine>>,
        batch_repo: Arc<BatchRepository>,
        item_repo: Arc<BatchItemRepository>,
        mutation_log_repo: Arc<MutationLogRepository>,
        order_repo: Arc<ProductionOrderRepository>,
    ) -> Self {
        Self {
            reconcile_engine,
            mutation_engine,
            transmission_engine,
            batch_repo,
            item_repo,
            mutation_log_repo,
            order_repo,
        }
    }

    // ==========================================
    // 汇总
    // ==========================================

    /// 手动触发一次汇总
    ///
    /// # 返回
    /// - Err(ApiError::Busy): 已有汇总在执行
    pub fn reconcile(&self) -> ApiResult<ReconcileResult> {
        Ok(self.reconcile_engine.reconcile()?)
    }

    // ==========================================
    // 明细修改
    // ==========================================

    /// 修改批次明细
    ///
    /// # 参数
    /// - item_id: 明细ID
    /// - changes: 字段变更
    /// - actor: 操作人
    pub fn mutate_item(
        &self,
        item_id: i64,
        changes: &ItemChanges,
        actor: &str,
    ) -> ApiResult<MutationOutcome> {
        if actor.trim().is_empty() {
            return Err(ApiError::InvalidInput("操作人不能为空".to_string()));
        }
        Ok(self.mutation_engine.mutate(item_id, changes, actor)?)
    }

    // ==========================================
    // 传输与批次状态
    // ==========================================

    fn transmission(&self) -> ApiResult<&TransmissionEngine> {
        self.transmission_engine
            .as_deref()
            .ok_or_else(|| ApiError::FeatureDisabled("未配置 SAP 地址,传输不可用".to_string()))
    }

    /// 发送批次到 SAP
    ///
    /// 外部失败时返回 Ok,结果中 failure 给出原因,批次已置 failed
    pub async fn begin_transmission(&self, batch_id: i64) -> ApiResult<TransmissionOutcome> {
        let engine = self.transmission()?;
        Ok(engine.begin_transmission(batch_id).await?)
    }

    /// 外部系统逐条回写明细状态
    pub fn finalize_items(&self, updates: &[ItemStatusUpdate]) -> ApiResult<Vec<BatchItem>> {
        if updates.is_empty() {
            return Err(ApiError::InvalidInput("回写列表不能为空".to_string()));
        }
        Ok(self.transmission()?.finalize_items(updates)?)
    }

    /// 确认批次 (pending → processed)
    pub fn promote_batch(&self, batch_id: i64) -> ApiResult<Batch> {
        Ok(self.transmission()?.promote_batch(batch_id)?)
    }

    /// 重开失败批次 (failed → processed)
    pub fn reopen_batch(&self, batch_id: i64) -> ApiResult<Batch> {
        Ok(self.transmission()?.reopen_batch(batch_id)?)
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn get_batch(&self, batch_id: i64) -> ApiResult<BatchWithItems> {
        let batch = self
            .batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| ApiError::NotFound(format!("Batch(id={})不存在", batch_id)))?;
        let items = self.item_repo.list_by_batch(batch_id, false)?;
        Ok(BatchWithItems { batch, items })
    }

    pub fn get_batch_by_code(&self, batch_code: &str) -> ApiResult<BatchWithItems> {
        if batch_code.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次号不能为空".to_string()));
        }
        let batch = self
            .batch_repo
            .find_by_code(batch_code)?
            .ok_or_else(|| ApiError::NotFound(format!("Batch(code={})不存在", batch_code)))?;
        let items = self.item_repo.list_by_batch(batch.id, false)?;
        Ok(BatchWithItems { batch, items })
    }

    pub fn list_batches_by_detail(&self, detail_id: i64) -> ApiResult<Vec<Batch>> {
        Ok(self.batch_repo.list_by_detail(detail_id)?)
    }

    pub fn list_batches_by_status(&self, status: TransmissionStatus) -> ApiResult<Vec<Batch>> {
        Ok(self.batch_repo.list_by_status(status)?)
    }

    /// 批次明细 (可含已删除明细,用于审计)
    pub fn list_items(&self, batch_id: i64, include_deleted: bool) -> ApiResult<Vec<BatchItem>> {
        Ok(self.item_repo.list_by_batch(batch_id, include_deleted)?)
    }

    pub fn list_item_mutations(&self, item_id: i64) -> ApiResult<Vec<MutationRecord>> {
        Ok(self.mutation_log_repo.find_records_by_item(item_id)?)
    }

    pub fn list_batch_mutations(&self, batch_id: i64) -> ApiResult<Vec<MutationLogEntry>> {
        Ok(self.mutation_log_repo.find_by_batch(batch_id)?)
    }

    pub fn list_mutation_details(&self, log_id: &str) -> ApiResult<Vec<MutationLogDetail>> {
        Ok(self.mutation_log_repo.find_details(log_id)?)
    }

    /// 生产订单明细的累计称重
    pub fn get_detail_rollup(&self, detail_id: i64) -> ApiResult<ProductionOrderDetail> {
        self.order_repo
            .find_detail_by_id(detail_id)?
            .ok_or_else(|| {
                ApiError::NotFound(format!("ProductionOrderDetail(id={})不存在", detail_id))
            })
    }
}
