// ==========================================
// 称重汇总系统 - 核心库
// ==========================================
// 技术栈: Rust + SQLite + tokio
// 系统定位: 秤称重事件 → 汇总批次/明细 → SAP 过账
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 业务接口
pub mod api;

// 应用层 - 组装
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{ItemStatus, MeasurementRule, MutationOperation, TransmissionStatus};

// 领域实体
pub use domain::{
    Batch, BatchItem, DetailRollup, GroupingKey, ItemChanges, ItemKey, Material,
    MutationLogDetail, MutationLogEntry, ScaleEvent,
};

// 引擎
pub use engine::{
    EngineError, ItemMutationEngine, ReconcileEngine, ReconcileResult, RollupEngine,
    TransmissionEngine, TransmissionSink,
};

// API
pub use api::{ApiError, WeightSummaryApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "称重汇总系统";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
