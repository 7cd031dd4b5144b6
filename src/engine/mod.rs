// ==========================================
// 称重汇总系统 - 引擎层
// ==========================================
// 职责: 汇总、明细修改、批次传输等业务规则
// 红线: Engine 不拼 SQL, 数据访问经 Repository 的 *_tx 函数
// ==========================================

pub mod aggregation;
pub mod batch_code;
pub mod error;
pub mod grouping;
pub mod measurement;
pub mod mutation;
pub mod rollup;
pub mod scheduler;
pub mod sink;
pub mod transmission;

// 重导出核心引擎
pub use aggregation::{ReconcileEngine, ReconcileResult};
pub use batch_code::BatchCodeAllocator;
pub use error::{EngineError, EngineResult};
pub use mutation::{ItemMutationEngine, MutationOutcome};
pub use rollup::RollupEngine;
pub use scheduler::ReconcileScheduler;
pub use sink::{
    HttpTransmissionSink, SinkError, SinkResponse, TransmissionRequest, TransmissionRow,
    TransmissionSink,
};
pub use transmission::{ItemStatusUpdate, TransmissionEngine, TransmissionOutcome};
