// ==========================================
// 称重汇总系统 - 明细修改审计日志
// ==========================================
// 红线: 每一次明细修改必须写日志; 每个被触及的明细一条前后快照
// 对齐: item_mutation_log / item_mutation_log_detail 表
// ==========================================

use crate::domain::types::MutationOperation;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// ==========================================
// MutationLogEntry - 修改日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationLogEntry {
    pub id: String,                     // 日志ID (UUID)
    pub batch_id: i64,                  // 所属批次
    pub source_item_id: i64,            // 源明细
    pub target_item_id: i64,            // 目标明细 (edit 时等于源)
    pub operation: MutationOperation,   // 操作类型
    pub actor: String,                  // 操作人
    pub payload_json: Option<JsonValue>, // 请求的字段变更
    pub created_at: NaiveDateTime,
}

// ==========================================
// MutationLogDetail - 明细快照
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationLogDetail {
    pub id: String,
    pub log_id: String,
    pub item_id: i64,
    pub before_json: Option<JsonValue>, // 新建明细为空
    pub after_json: Option<JsonValue>,  // 被替换/删除明细可为空
}

impl MutationLogEntry {
    /// 创建新的修改日志
    pub fn new(
        batch_id: i64,
        source_item_id: i64,
        target_item_id: i64,
        operation: MutationOperation,
        actor: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            batch_id,
            source_item_id,
            target_item_id,
            operation,
            actor: actor.to_string(),
            payload_json: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// 设置请求负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    /// 生成该日志下的一条快照
    pub fn detail(
        &self,
        item_id: i64,
        before: Option<JsonValue>,
        after: Option<JsonValue>,
    ) -> MutationLogDetail {
        MutationLogDetail {
            id: Uuid::new_v4().to_string(),
            log_id: self.id.clone(),
            item_id,
            before_json: before,
            after_json: after,
        }
    }
}

// ==========================================
// MutationRecord - 日志 + 快照
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRecord {
    pub entry: MutationLogEntry,
    pub details: Vec<MutationLogDetail>,
}
