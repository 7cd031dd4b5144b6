use super::MutationLogRepository;
use crate::domain::mutation_log::MutationLogEntry;
use crate::domain::types::MutationOperation;
use crate::repository::error::RepositoryError;
use rusqlite::Connection;
use serde_json::json;
use std::sync::{Arc, Mutex};

fn setup_test_db() -> Arc<Mutex<Connection>> {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::ensure_schema(&conn).unwrap();
    Arc::new(Mutex::new(conn))
}

#[test]
fn test_insert_split_log_with_two_details() {
    let conn = setup_test_db();
    let repo = MutationLogRepository::new(conn.clone());

    let entry = MutationLogEntry::new(1, 10, 11, MutationOperation::Split, "operator")
        .with_payload(&json!({ "total_weight": 30.0 }));
    let details = vec![
        entry.detail(10, Some(json!({ "total_raw_weight": 100.0 })), Some(json!({ "total_raw_weight": 70.0 }))),
        entry.detail(11, None, Some(json!({ "total_raw_weight": 30.0 }))),
    ];

    {
        let guard = conn.lock().unwrap();
        MutationLogRepository::insert_tx(&guard, &entry, &details).unwrap();
    }

    let loaded = repo.find_by_id(&entry.id).unwrap().unwrap();
    assert_eq!(loaded.operation, MutationOperation::Split);
    assert_eq!(loaded.payload_json, Some(json!({ "total_weight": 30.0 })));

    let stored = repo.find_details(&entry.id).unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored[1].before_json.is_none());

    // 源与目标明细都能查到这条日志
    assert_eq!(repo.find_by_item(10).unwrap().len(), 1);
    assert_eq!(repo.find_by_item(11).unwrap().len(), 1);
    assert_eq!(repo.find_records_by_item(11).unwrap()[0].details.len(), 2);
}

#[test]
fn test_detail_of_other_log_is_rejected() {
    let conn = setup_test_db();
    let entry = MutationLogEntry::new(1, 10, 10, MutationOperation::Edit, "operator");
    let other = MutationLogEntry::new(1, 10, 10, MutationOperation::Edit, "operator");

    let guard = conn.lock().unwrap();
    let err = MutationLogRepository::insert_tx(&guard, &entry, &[other.detail(10, None, None)])
        .unwrap_err();
    assert!(matches!(err, RepositoryError::FieldValueError { .. }));
}

#[test]
fn test_find_missing_log() {
    let repo = MutationLogRepository::new(setup_test_db());
    assert!(repo.find_by_id("missing").unwrap().is_none());
    assert!(repo.find_details("missing").unwrap().is_empty());
}
