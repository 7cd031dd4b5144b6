// ==========================================
// 称重汇总系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键/busy_timeout)
// - 幂等建表,启动与测试共用同一份 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 幂等建表并登记 schema_version
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- 主数据镜像
CREATE TABLE IF NOT EXISTS production_order (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_number TEXT NOT NULL UNIQUE,
    plant_code TEXT
);

CREATE TABLE IF NOT EXISTS production_order_detail (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    production_order_id INTEGER NOT NULL REFERENCES production_order(id),
    material_code TEXT NOT NULL,
    total_weighed REAL NOT NULL DEFAULT 0,
    total_weighed_good_receive REAL NOT NULL DEFAULT 0,
    weighing_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE (production_order_id, material_code)
);

CREATE TABLE IF NOT EXISTS material (
    material_code TEXT PRIMARY KEY,
    measurement_rule TEXT,
    fixed_value REAL,
    unit_code TEXT
);

-- 称重事件队列
CREATE TABLE IF NOT EXISTS scale_event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scale_device_id TEXT,
    production_order_number TEXT NOT NULL,
    plant_code TEXT,
    material_code TEXT NOT NULL,
    material_unit TEXT,
    raw_weight REAL NOT NULL,
    converted_weight REAL,
    measurement_rule_applied TEXT,
    production_group TEXT,
    production_shift TEXT,
    packing_group TEXT,
    packing_shift TEXT,
    production_lot TEXT,
    production_location TEXT,
    storage_location TEXT,
    storage_location_target TEXT,
    transaction_type TEXT,
    is_summarized INTEGER NOT NULL DEFAULT 0,
    summary_batch_id INTEGER,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scale_event_unsummarized
  ON scale_event(is_summarized, summary_batch_id, id);

-- 汇总批次
CREATE TABLE IF NOT EXISTS weight_summary_batch (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_code TEXT NOT NULL UNIQUE,
    production_order_detail_id INTEGER NOT NULL REFERENCES production_order_detail(id),
    material_code TEXT NOT NULL,
    production_order_number TEXT NOT NULL,
    scale_event_id_from INTEGER NOT NULL,
    scale_event_id_to INTEGER NOT NULL,
    transmission_status TEXT NOT NULL DEFAULT 'pending',
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batch_detail_status
  ON weight_summary_batch(production_order_detail_id, transmission_status);

CREATE TABLE IF NOT EXISTS weight_summary_batch_item (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES weight_summary_batch(id),
    material_code TEXT NOT NULL,
    production_order_number TEXT NOT NULL,
    material_unit TEXT,
    plant_code TEXT,
    transaction_type TEXT,
    production_group TEXT,
    production_shift TEXT,
    packing_group TEXT,
    packing_shift TEXT,
    production_lot TEXT,
    production_location TEXT,
    storage_location TEXT,
    storage_location_target TEXT,
    total_raw_weight REAL NOT NULL DEFAULT 0,
    total_converted_weight REAL NOT NULL DEFAULT 0,
    item_status TEXT NOT NULL DEFAULT 'pending',
    material_document_ref TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_batch_item_batch
  ON weight_summary_batch_item(batch_id, is_deleted);

-- 明细修改审计
CREATE TABLE IF NOT EXISTS item_mutation_log (
    id TEXT PRIMARY KEY,
    batch_id INTEGER NOT NULL,
    source_item_id INTEGER NOT NULL,
    target_item_id INTEGER NOT NULL,
    operation TEXT NOT NULL,
    actor TEXT NOT NULL,
    payload_json TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mutation_log_source
  ON item_mutation_log(source_item_id);

CREATE TABLE IF NOT EXISTS item_mutation_log_detail (
    id TEXT PRIMARY KEY,
    log_id TEXT NOT NULL REFERENCES item_mutation_log(id),
    item_id INTEGER NOT NULL,
    before_json TEXT,
    after_json TEXT
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();

        ensure_schema(&conn).unwrap();
        ensure_schema(&conn).unwrap();

        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_missing_table() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }
}
