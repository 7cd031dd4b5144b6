// ==========================================
// 称重汇总系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// 默认值
// ==========================================
pub const DEFAULT_PLANT_CODE: &str = "1000";
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SAP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_BATCH_CODE_MAX_RETRIES: u32 = 3;

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 写入 global scope 配置 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at) VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: HashMap<String, String> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }

    // ===== 汇总配置 =====

    /// 无法从订单与事件确定工厂时使用的默认工厂
    pub fn get_default_plant_code(&self) -> Result<String, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DEFAULT_PLANT_CODE, DEFAULT_PLANT_CODE)?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            Ok(DEFAULT_PLANT_CODE.to_string())
        } else {
            Ok(trimmed.to_string())
        }
    }

    pub fn get_reconcile_interval_secs(&self) -> Result<u64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::RECONCILE_INTERVAL_SECS, "60")?;
        Ok(value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_RECONCILE_INTERVAL_SECS))
    }

    pub fn get_batch_code_max_retries(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::BATCH_CODE_MAX_RETRIES, "3")?;
        Ok(value
            .trim()
            .parse::<u32>()
            .unwrap_or(DEFAULT_BATCH_CODE_MAX_RETRIES))
    }

    // ===== SAP 传输配置 =====

    /// SAP 接口地址,未配置时为 None (不启用传输)
    pub fn get_sap_endpoint(&self) -> Result<Option<String>, Box<dyn Error>> {
        Ok(self
            .get_config_value(config_keys::SAP_ENDPOINT)?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    pub fn get_sap_timeout_ms(&self) -> Result<u64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::SAP_TIMEOUT_MS, "30000")?;
        Ok(value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_SAP_TIMEOUT_MS))
    }

    /// 一次性读取运行配置
    pub fn load_settings(&self) -> Result<SummarySettings, Box<dyn Error>> {
        Ok(SummarySettings {
            default_plant_code: self.get_default_plant_code()?,
            reconcile_interval_secs: self.get_reconcile_interval_secs()?,
            sap_endpoint: self.get_sap_endpoint()?,
            sap_timeout_ms: self.get_sap_timeout_ms()?,
            batch_code_max_retries: self.get_batch_code_max_retries()?,
        })
    }
}

// ==========================================
// SummarySettings - 运行配置快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarySettings {
    pub default_plant_code: String,
    pub reconcile_interval_secs: u64,
    pub sap_endpoint: Option<String>,
    pub sap_timeout_ms: u64,
    pub batch_code_max_retries: u32,
}

impl Default for SummarySettings {
    fn default() -> Self {
        Self {
            default_plant_code: DEFAULT_PLANT_CODE.to_string(),
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            sap_endpoint: None,
            sap_timeout_ms: DEFAULT_SAP_TIMEOUT_MS,
            batch_code_max_retries: DEFAULT_BATCH_CODE_MAX_RETRIES,
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 汇总
    pub const DEFAULT_PLANT_CODE: &str = "default_plant_code";
    pub const RECONCILE_INTERVAL_SECS: &str = "reconcile_interval_secs";
    pub const BATCH_CODE_MAX_RETRIES: &str = "batch_code_max_retries";

    // SAP 传输
    pub const SAP_ENDPOINT: &str = "sap_endpoint";
    pub const SAP_TIMEOUT_MS: &str = "sap_timeout_ms";
}
