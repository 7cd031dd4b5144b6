// ==========================================
// 称重汇总系统 - 日志初始化
// ==========================================
// 使用 tracing 和 tracing-subscriber
// 汇总在 spawn_blocking 线程上执行,输出线程名便于对照调度日志
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 默认过滤器: 本 crate 为 info,rusqlite 等依赖只保留 warn
const DEFAULT_FILTER: &str = "warn,weight_summary=info";

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: warn,weight_summary=info）
///   例如: RUST_LOG=weight_summary::engine=debug
///
/// # 示例
/// ```no_run
/// use weight_summary::logging;
/// logging::init();
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // 重复初始化 (同进程内多次调用) 静默忽略
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_line_number(true)
        .try_init();
}

/// 初始化测试环境的日志系统
///
/// 使用更详细的日志级别，便于调试
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
