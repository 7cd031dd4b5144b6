// ==========================================
// 称重汇总系统 - 行映射公共函数
// ==========================================
// 职责: 时间戳格式、枚举列解析、IN 子句构建
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::types::Type;

/// 库内时间戳格式
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn now_ts() -> NaiveDateTime {
    chrono::Utc::now().naive_utc()
}

/// 解析时间戳列
pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// 解析枚举列 (未知取值视为数据损坏)
pub fn parse_enum<T>(
    idx: usize,
    raw: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("无法识别的枚举值: {}", raw).into(),
        )
    })
}

/// 构建 IN 子句的 SQL 片段,空列表返回永假条件
pub fn build_in_clause(column_name: &str, len: usize) -> String {
    if len == 0 {
        return "1 = 0".to_string();
    }
    let placeholders = vec!["?"; len].join(", ");
    format!("{} IN ({})", column_name, placeholders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_in_clause() {
        assert_eq!(build_in_clause("id", 3), "id IN (?, ?, ?)");
        assert_eq!(build_in_clause("id", 0), "1 = 0");
    }

    #[test]
    fn test_ts_round_trip() {
        let ts = NaiveDateTime::parse_from_str("2026-03-01 08:30:00", TS_FORMAT).unwrap();
        assert_eq!(parse_ts(0, &format_ts(&ts)).unwrap(), ts);
        assert!(parse_ts(0, "not a time").is_err());
    }
}
