// ==========================================
// 称重汇总系统 - API 层
// ==========================================
// 职责: 提供业务 API 接口,供入口程序与外部集成调用
// ==========================================

pub mod error;
pub mod weight_summary_api;

// 重导出核心类型
pub use error::{ApiError, ApiResult};
pub use weight_summary_api::{BatchWithItems, WeightSummaryApi};
