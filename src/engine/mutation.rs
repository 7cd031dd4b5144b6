// ==========================================
// 称重汇总系统 - 明细修改引擎
// ==========================================
// 前置: 所属批次必须为 processed
// 判定顺序 (命中即止):
//   1. createFromFailed: 明细为 failed → 软删除原明细,按合并后的字段新建 pending 明细
//   2. split:  0 < total_weight < 当前重量 → 按比例拆出新明细
//   3. merge:  字段变更后与批次内唯一的 pending 明细键相同 → 并入目标,软删除本明细
//   4. edit:   其余情况,直接更新
// 红线:
// - 每次修改写一条日志,每个被触及明细一条快照
// - split/merge 前后批次内未删除明细的重量合计不变
// - 修改结束时批次内不允许出现重复明细键 (否则整体回滚)
// ==========================================

use crate::domain::batch::{Batch, BatchItem, ItemChanges, NewBatchItem};
use crate::domain::mutation_log::{MutationLogDetail, MutationLogEntry};
use crate::domain::types::{ItemStatus, MutationOperation, TransmissionStatus};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::rollup::RollupEngine;
use crate::repository::batch_item_repo::BatchItemRepository;
use crate::repository::batch_repo::BatchRepository;
use crate::repository::error::RepositoryError;
use crate::repository::mutation_log_repo::MutationLogRepository;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument};

/// 重量比较容差
const WEIGHT_EPSILON: f64 = 1e-9;

// ==========================================
// MutationOutcome - 修改结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub operation: MutationOperation,
    /// 结果明细: edit 为原明细, split 为新拆出明细, merge 为合并目标, createFromFailed 为新明细
    pub item: BatchItem,
    /// 本次触及的全部明细 (修改后状态)
    pub touched: Vec<BatchItem>,
    pub log_id: String,
}

// ==========================================
// ItemMutationEngine - 明细修改引擎
// ==========================================
pub struct ItemMutationEngine {
    conn: Arc<Mutex<Connection>>,
}

impl ItemMutationEngine {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 修改批次明细
    ///
    /// # 参数
    /// - item_id: 明细 id
    /// - changes: 字段变更 (None 不改, 空串清空)
    /// - actor: 操作人
    ///
    /// # 错误
    /// - NotFound: 明细或批次不存在/已删除
    /// - StateConflict: 批次不是 processed
    /// - InvalidInput: 重量非法
    /// - ConsistencyViolation: 修改后出现重复明细键
    #[instrument(skip(self, changes), fields(item_id = item_id, actor = %actor))]
    pub fn mutate(
        &self,
        item_id: i64,
        changes: &ItemChanges,
        actor: &str,
    ) -> EngineResult<MutationOutcome> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let item = BatchItemRepository::find_by_id_tx(&tx, item_id)?
            .filter(|i| !i.is_deleted)
            .ok_or_else(|| EngineError::not_found("BatchItem", item_id))?;
        let batch = BatchRepository::find_by_id_tx(&tx, item.batch_id)?
            .filter(|b| !b.is_deleted)
            .ok_or_else(|| EngineError::not_found("Batch", item.batch_id))?;

        if batch.transmission_status != TransmissionStatus::Processed {
            return Err(EngineError::StateConflict {
                batch_id: batch.id,
                status: batch.transmission_status,
                required: TransmissionStatus::Processed,
            });
        }

        validate_weight(&item, changes)?;

        let outcome = if item.item_status == ItemStatus::Failed {
            Self::create_from_failed(&tx, &batch, &item, changes, actor)?
        } else if is_split(&item, changes.total_weight) {
            Self::split(&tx, &batch, &item, changes, actor)?
        } else {
            Self::merge_or_edit(&tx, &batch, &item, changes, actor)?
        };

        RollupEngine::recompute_tx(&tx, batch.production_order_detail_id)?;
        tx.commit()?;

        info!(
            operation = %outcome.operation,
            batch_id = batch.id,
            result_item_id = outcome.item.id,
            log_id = %outcome.log_id,
            "明细修改完成"
        );
        Ok(outcome)
    }

    // ==========================================
    // createFromFailed
    // ==========================================
    fn create_from_failed(
        conn: &Connection,
        batch: &Batch,
        item: &BatchItem,
        changes: &ItemChanges,
        actor: &str,
    ) -> EngineResult<MutationOutcome> {
        let before = item.snapshot();
        BatchItemRepository::soft_delete_tx(conn, item.id, item.revision)?;

        let mut merged = item.clone();
        merged.apply_field_changes(changes);
        if let Some(weight) = changes.total_weight {
            merged.total_converted_weight =
                rescale(item.total_converted_weight, item.total_raw_weight, weight);
            merged.total_raw_weight = weight;
        }

        ensure_key_free(conn, batch.id, &merged)?;

        let new_id = BatchItemRepository::insert_tx(
            conn,
            &NewBatchItem::from_template(
                &merged,
                merged.total_raw_weight,
                merged.total_converted_weight,
                ItemStatus::Pending,
            ),
        )?;
        let created = load_item(conn, new_id)?;

        let entry = MutationLogEntry::new(
            batch.id,
            item.id,
            new_id,
            MutationOperation::CreateFromFailed,
            actor,
        )
        .with_payload(changes);
        let details = vec![
            entry.detail(item.id, Some(before), None),
            entry.detail(new_id, None, Some(created.snapshot())),
        ];
        let log_id = write_log(conn, &entry, &details)?;

        let deleted = load_item(conn, item.id)?;
        Ok(MutationOutcome {
            operation: MutationOperation::CreateFromFailed,
            item: created.clone(),
            touched: vec![deleted, created],
            log_id,
        })
    }

    // ==========================================
    // split
    // ==========================================
    fn split(
        conn: &Connection,
        batch: &Batch,
        item: &BatchItem,
        changes: &ItemChanges,
        actor: &str,
    ) -> EngineResult<MutationOutcome> {
        let split_raw = changes.total_weight.unwrap_or_default();
        let ratio = split_raw / item.total_raw_weight;
        let split_converted = ratio * item.total_converted_weight;

        // 新明细承接其余字段变更
        let mut sibling = item.clone();
        sibling.apply_field_changes(changes);
        if sibling.item_key() != item.item_key() {
            let clashes =
                BatchItemRepository::find_active_by_key_tx(conn, batch.id, &sibling.item_key(), None)?;
            if !clashes.is_empty() {
                return Err(EngineError::InvalidInput(format!(
                    "拆分后的明细键与明细 {} 相同,请改用编辑合并",
                    clashes[0].id
                )));
            }
        }

        let before = item.snapshot();
        let mut original = item.clone();
        original.total_raw_weight = item.total_raw_weight - split_raw;
        original.total_converted_weight = item.total_converted_weight - split_converted;
        BatchItemRepository::update_tx(conn, &original)?;
        let original = load_item(conn, item.id)?;

        let new_id = BatchItemRepository::insert_tx(
            conn,
            &NewBatchItem::from_template(&sibling, split_raw, split_converted, item.item_status),
        )?;
        let created = load_item(conn, new_id)?;

        let entry = MutationLogEntry::new(batch.id, item.id, new_id, MutationOperation::Split, actor)
            .with_payload(changes);
        let details = vec![
            entry.detail(item.id, Some(before), Some(original.snapshot())),
            entry.detail(new_id, None, Some(created.snapshot())),
        ];
        let log_id = write_log(conn, &entry, &details)?;

        Ok(MutationOutcome {
            operation: MutationOperation::Split,
            item: created.clone(),
            touched: vec![original, created],
            log_id,
        })
    }

    // ==========================================
    // merge / edit
    // ==========================================
    fn merge_or_edit(
        conn: &Connection,
        batch: &Batch,
        item: &BatchItem,
        changes: &ItemChanges,
        actor: &str,
    ) -> EngineResult<MutationOutcome> {
        let before = item.snapshot();
        let mut updated = item.clone();
        updated.apply_field_changes(changes);

        let matches =
            BatchItemRepository::find_active_by_key_tx(conn, batch.id, &updated.item_key(), Some(item.id))?;

        if matches.is_empty() {
            BatchItemRepository::update_tx(conn, &updated)?;
            let edited = load_item(conn, item.id)?;

            let entry = MutationLogEntry::new(batch.id, item.id, item.id, MutationOperation::Edit, actor)
                .with_payload(changes);
            let details = vec![entry.detail(item.id, Some(before), Some(edited.snapshot()))];
            let log_id = write_log(conn, &entry, &details)?;

            return Ok(MutationOutcome {
                operation: MutationOperation::Edit,
                item: edited.clone(),
                touched: vec![edited],
                log_id,
            });
        }

        // 并入唯一的 pending 目标
        let target = match matches.as_slice() {
            [only] if only.item_status == ItemStatus::Pending => only.clone(),
            _ => {
                return Err(EngineError::ConsistencyViolation(format!(
                    "明细 {} 修改后与 {:?} 键相同,无法合并",
                    item.id,
                    matches.iter().map(|m| m.id).collect::<Vec<_>>()
                )));
            }
        };

        let target_before = target.snapshot();
        let mut merged_target = target.clone();
        merged_target.total_raw_weight += updated.total_raw_weight;
        merged_target.total_converted_weight += updated.total_converted_weight;
        merged_target.apply_field_changes(changes);
        BatchItemRepository::update_tx(conn, &merged_target)?;

        updated.is_deleted = true;
        BatchItemRepository::update_tx(conn, &updated)?;

        let source_after = load_item(conn, item.id)?;
        let target_after = load_item(conn, target.id)?;

        let entry = MutationLogEntry::new(batch.id, item.id, target.id, MutationOperation::Merge, actor)
            .with_payload(changes);
        let details = vec![
            entry.detail(item.id, Some(before), Some(source_after.snapshot())),
            entry.detail(target.id, Some(target_before), Some(target_after.snapshot())),
        ];
        let log_id = write_log(conn, &entry, &details)?;

        Ok(MutationOutcome {
            operation: MutationOperation::Merge,
            item: target_after.clone(),
            touched: vec![source_after, target_after],
            log_id,
        })
    }
}

// ==========================================
// 辅助函数
// ==========================================

/// 重量参数校验
///
/// - 必须为正数
/// - 非 failed 明细: 与当前重量相同视为不改重量,大于等于当前重量的其它值拒绝
fn validate_weight(item: &BatchItem, changes: &ItemChanges) -> EngineResult<()> {
    let Some(weight) = changes.total_weight else {
        return Ok(());
    };
    if !weight.is_finite() || weight <= 0.0 {
        return Err(EngineError::InvalidInput(format!(
            "total_weight 必须为正数: {}",
            weight
        )));
    }
    if item.item_status != ItemStatus::Failed
        && weight >= item.total_raw_weight
        && !same_weight(weight, item.total_raw_weight)
    {
        return Err(EngineError::InvalidInput(format!(
            "拆分重量 {} 必须小于明细重量 {}",
            weight, item.total_raw_weight
        )));
    }
    Ok(())
}

fn is_split(item: &BatchItem, total_weight: Option<f64>) -> bool {
    matches!(total_weight, Some(w) if w > 0.0 && w < item.total_raw_weight && !same_weight(w, item.total_raw_weight))
}

fn same_weight(a: f64, b: f64) -> bool {
    (a - b).abs() <= WEIGHT_EPSILON
}

/// 按实称重量比例缩放折算重量
fn rescale(converted: f64, raw: f64, new_raw: f64) -> f64 {
    if raw.abs() <= WEIGHT_EPSILON {
        new_raw
    } else {
        converted * new_raw / raw
    }
}

fn ensure_key_free(conn: &Connection, batch_id: i64, item: &BatchItem) -> EngineResult<()> {
    let clashes = BatchItemRepository::find_active_by_key_tx(conn, batch_id, &item.item_key(), None)?;
    if let Some(other) = clashes.first() {
        return Err(EngineError::ConsistencyViolation(format!(
            "批次 {} 内已存在相同明细键的明细 {}",
            batch_id, other.id
        )));
    }
    Ok(())
}

fn load_item(conn: &Connection, item_id: i64) -> EngineResult<BatchItem> {
    BatchItemRepository::find_by_id_tx(conn, item_id)?
        .ok_or_else(|| EngineError::not_found("BatchItem", item_id))
}

fn write_log(
    conn: &Connection,
    entry: &MutationLogEntry,
    details: &[MutationLogDetail],
) -> EngineResult<String> {
    Ok(MutationLogRepository::insert_tx(conn, entry, details)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(raw: f64, status: ItemStatus) -> BatchItem {
        let now = Utc::now().naive_utc();
        BatchItem {
            id: 1,
            batch_id: 1,
            material_code: "M1".to_string(),
            production_order_number: "PO1".to_string(),
            material_unit: None,
            plant_code: None,
            transaction_type: None,
            production_group: None,
            production_shift: None,
            packing_group: None,
            packing_shift: None,
            production_lot: None,
            production_location: None,
            storage_location: None,
            storage_location_target: None,
            total_raw_weight: raw,
            total_converted_weight: raw,
            item_status: status,
            material_document_ref: None,
            is_deleted: false,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn weight(w: f64) -> ItemChanges {
        ItemChanges {
            total_weight: Some(w),
            ..Default::default()
        }
    }

    #[test]
    fn test_weight_validation() {
        let pending = item(100.0, ItemStatus::Pending);
        assert!(validate_weight(&pending, &weight(30.0)).is_ok());
        assert!(validate_weight(&pending, &weight(100.0)).is_ok());
        assert!(matches!(
            validate_weight(&pending, &weight(120.0)),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_weight(&pending, &weight(0.0)),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            validate_weight(&pending, &weight(f64::NAN)),
            Err(EngineError::InvalidInput(_))
        ));

        // failed 明细重建时可以改大
        let failed = item(100.0, ItemStatus::Failed);
        assert!(validate_weight(&failed, &weight(120.0)).is_ok());
    }

    #[test]
    fn test_is_split() {
        let pending = item(100.0, ItemStatus::Pending);
        assert!(is_split(&pending, Some(30.0)));
        assert!(!is_split(&pending, Some(100.0)));
        assert!(!is_split(&pending, None));
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(50.0, 100.0, 40.0), 20.0);
        assert_eq!(rescale(0.0, 0.0, 40.0), 40.0);
    }
}
