// ==========================================
// 称重汇总系统 - 定时汇总调度
// ==========================================
// 职责: 按固定周期触发汇总; 汇总本身是同步阻塞操作,放入 blocking 线程池
// 说明: 上一轮未结束时本轮由引擎返回 ReconcileInProgress,仅记 debug 日志
// ==========================================

use crate::engine::aggregation::ReconcileEngine;
use crate::engine::error::EngineError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

pub struct ReconcileScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconcileScheduler {
    /// 启动后台调度任务 (需在 tokio 运行时内调用)
    pub fn start(engine: Arc<ReconcileEngine>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_secs = period.as_secs(), "定时汇总已启动");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                }

                let engine = engine.clone();
                match tokio::task::spawn_blocking(move || engine.reconcile()).await {
                    Ok(Ok(result)) => debug!(
                        events_processed = result.events_processed,
                        batches_touched = result.batches_touched,
                        "定时汇总完成"
                    ),
                    Ok(Err(EngineError::ReconcileInProgress)) => {
                        debug!("上一轮汇总尚未结束,本轮跳过")
                    }
                    Ok(Err(e)) => error!(error = %e, "定时汇总失败"),
                    Err(e) => error!(error = %e, "定时汇总任务异常退出"),
                }
            }

            info!("定时汇总已停止");
        });

        Self { shutdown, handle }
    }

    /// 通知停止并等待当前一轮结束
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "定时汇总任务退出异常");
        }
    }
}
