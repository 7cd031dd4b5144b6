// ==========================================
// 称重汇总系统 - 服务主入口
// ==========================================
// 职责: 初始化日志与应用状态,按配置周期运行定时汇总,Ctrl-C 退出
// ==========================================

use std::time::Duration;

use anyhow::{anyhow, Context};
use weight_summary::app::{get_default_db_path, AppState};
use weight_summary::engine::ReconcileScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    weight_summary::logging::init();

    tracing::info!("==================================================");
    tracing::info!("{}", weight_summary::APP_NAME);
    tracing::info!("系统版本: {}", weight_summary::VERSION);
    tracing::info!("==================================================");

    let db_path = std::env::args()
        .nth(1)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path).map_err(|e| anyhow!(e))?;
    let period = Duration::from_secs(state.settings.reconcile_interval_secs.max(1));

    let scheduler = ReconcileScheduler::start(state.reconcile_engine.clone(), period);

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;

    tracing::info!("收到退出信号，等待当前汇总结束");
    scheduler.stop().await;
    tracing::info!("已退出");
    Ok(())
}
