// ==========================================
// 称重汇总系统 - 应用层
// ==========================================
// 职责: 组装连接、配置、引擎与API
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};
