// ==========================================
// 称重汇总系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx(&Connection, ..)` 供引擎在同一事务内跨仓储组合
// ==========================================

pub mod batch_item_repo;
pub mod batch_repo;
pub mod error;
pub mod material_repo;
pub mod mutation_log_repo;
pub mod production_order_repo;
pub mod row_utils;
pub mod scale_event_repo;

// 重导出核心仓储
pub use batch_item_repo::BatchItemRepository;
pub use batch_repo::{BatchRepository, NewBatch};
pub use error::{RepositoryError, RepositoryResult};
pub use material_repo::MaterialRepository;
pub use mutation_log_repo::MutationLogRepository;
pub use production_order_repo::ProductionOrderRepository;
pub use scale_event_repo::ScaleEventRepository;
