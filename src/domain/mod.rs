// ==========================================
// 称重汇总系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、分组键
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod grouping_key;
pub mod mutation_log;
pub mod production_order;
pub mod scale_event;
pub mod types;

// 重导出核心类型
pub use batch::{Batch, BatchItem, ItemChanges, NewBatchItem};
pub use grouping_key::{GroupingKey, ItemKey};
pub use mutation_log::{MutationLogDetail, MutationLogEntry, MutationRecord};
pub use production_order::{DetailRollup, Material, ProductionOrder, ProductionOrderDetail};
pub use scale_event::{NewScaleEvent, ScaleEvent};
pub use types::{ItemStatus, MeasurementRule, MutationOperation, TransmissionStatus};
