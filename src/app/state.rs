// ==========================================
// 称重汇总系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接、配置、引擎和API实例
// ==========================================

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

use crate::api::WeightSummaryApi;
use crate::config::{ConfigManager, SummarySettings};
use crate::db::{ensure_schema, open_sqlite_connection};
use crate::engine::{
    HttpTransmissionSink, ItemMutationEngine, ReconcileEngine, TransmissionEngine,
    TransmissionSink,
};
use crate::repository::{
    BatchItemRepository, BatchRepository, MutationLogRepository, ProductionOrderRepository,
};

/// 应用状态
///
/// 包含共享连接、配置快照、汇总引擎与API实例
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 启动时加载的配置
    pub settings: SummarySettings,

    /// 配置管理器
    pub config_manager: Arc<ConfigManager>,

    /// 汇总引擎（定时任务与手动触发共用）
    pub reconcile_engine: Arc<ReconcileEngine>,

    /// 称重汇总API
    pub weight_summary_api: Arc<WeightSummaryApi>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并幂等建表
    /// 2. 从 config_kv 加载配置
    /// 3. 初始化所有Repository与Engine
    /// 4. 未配置 sap_endpoint 时不创建传输引擎
    pub fn new(db_path: String) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);
        let (conn, config_manager, settings) = Self::open(&db_path)?;

        // ==========================================
        // 传输通道
        // ==========================================
        let timeout = Duration::from_millis(settings.sap_timeout_ms);
        let sink: Option<Arc<dyn TransmissionSink>> = match &settings.sap_endpoint {
            Some(endpoint) => {
                let sink = HttpTransmissionSink::new(endpoint.clone(), timeout)
                    .map_err(|e| format!("无法创建SAP传输通道: {}", e))?;
                tracing::info!("SAP传输已启用: {}", sink.endpoint());
                Some(Arc::new(sink))
            }
            None => {
                tracing::warn!("未配置 sap_endpoint，批次传输不可用");
                None
            }
        };

        Self::assemble(db_path, conn, config_manager, settings, sink)
    }

    /// 以指定传输通道组装（集成测试注入模拟通道）
    pub fn with_sink(db_path: String, sink: Arc<dyn TransmissionSink>) -> Result<Self, String> {
        let (conn, config_manager, settings) = Self::open(&db_path)?;
        Self::assemble(db_path, conn, config_manager, settings, Some(sink))
    }

    /// 打开数据库、建表并加载配置
    fn open(
        db_path: &str,
    ) -> Result<(Arc<Mutex<Connection>>, Arc<ConfigManager>, SummarySettings), String> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        ensure_schema(&conn).map_err(|e| format!("数据库建表失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        let config_manager = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let settings = config_manager
            .load_settings()
            .map_err(|e| format!("加载配置失败: {}", e))?;

        Ok((conn, config_manager, settings))
    }

    fn assemble(
        db_path: String,
        conn: Arc<Mutex<Connection>>,
        config_manager: Arc<ConfigManager>,
        settings: SummarySettings,
        sink: Option<Arc<dyn TransmissionSink>>,
    ) -> Result<Self, String> {
        // ==========================================
        // 初始化Repository层
        // ==========================================
        let batch_repo = Arc::new(BatchRepository::new(conn.clone()));
        let item_repo = Arc::new(BatchItemRepository::new(conn.clone()));
        let mutation_log_repo = Arc::new(MutationLogRepository::new(conn.clone()));
        let order_repo = Arc::new(ProductionOrderRepository::new(conn.clone()));

        // ==========================================
        // 初始化Engine层
        // ==========================================
        let reconcile_engine = Arc::new(ReconcileEngine::new(
            conn.clone(),
            settings.default_plant_code.clone(),
            settings.batch_code_max_retries,
        ));
        let mutation_engine = Arc::new(ItemMutationEngine::new(conn.clone()));
        let transmission_engine = sink.map(|sink| {
            Arc::new(TransmissionEngine::new(
                conn.clone(),
                sink,
                Duration::from_millis(settings.sap_timeout_ms),
            ))
        });

        // ==========================================
        // 初始化API层
        // ==========================================
        let weight_summary_api = Arc::new(WeightSummaryApi::new(
            reconcile_engine.clone(),
            mutation_engine,
            transmission_engine,
            batch_repo,
            item_repo,
            mutation_log_repo,
            order_repo,
        ));

        tracing::info!("AppState初始化完成");

        Ok(Self {
            db_path,
            settings,
            config_manager,
            reconcile_engine,
            weight_summary_api,
        })
    }
}

/// 获取默认数据库路径
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("WEIGHT_SUMMARY_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./weight_summary.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("weight-summary-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("weight-summary");
        }

        // 目录创建失败时 Connection::open 会给出明确错误
        std::fs::create_dir_all(&path).ok();
        path = path.join("weight_summary.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_new_without_endpoint_disables_transmission() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("state.db").to_string_lossy().to_string();

        let state = AppState::new(db_path).unwrap();
        assert!(state.settings.sap_endpoint.is_none());

        let err = state.weight_summary_api.promote_batch(1).unwrap_err();
        assert!(matches!(err, crate::api::ApiError::FeatureDisabled(_)));
    }
}
