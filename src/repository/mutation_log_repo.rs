// ==========================================
// 称重汇总系统 - 明细修改日志数据仓储
// ==========================================
// 对齐: item_mutation_log / item_mutation_log_detail 表
// 红线: 日志与快照在修改事务内同时写入
// ==========================================

mod core;
mod queries;

#[cfg(test)]
mod tests;

pub use core::MutationLogRepository;
