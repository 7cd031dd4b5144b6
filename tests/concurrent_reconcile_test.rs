// ==========================================
// 并发汇总测试
// ==========================================
// 职责: 验证进程内单飞与跨连接 IMMEDIATE 事务串行化
// ==========================================


#[cfg(test)]
mod concurrent_reconcile_test {
    use chrono::NaiveDate;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use weight_summary::engine::{EngineError, ReconcileEngine};
    use weight_summary::repository::{BatchRepository, ScaleEventRepository};

    use crate::test_helpers::{create_test_db, event, insert_events, open_shared, seed_order};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    #[test]
    fn test_overlapping_trigger_returns_in_progress() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        seed_order(&conn, "PO1", Some("P1"), &["M1"]);
        insert_events(&conn, &[event("PO1", "M1", 10.0)]);

        let engine = Arc::new(ReconcileEngine::new(conn.clone(), "1000".to_string(), 3));

        // 占住连接,使第一轮停在事务阶段
        let guard = conn.lock().unwrap();
        let first = {
            let engine = engine.clone();
            thread::spawn(move || engine.reconcile_as_of(day()))
        };
        thread::sleep(Duration::from_millis(200));

        let err = engine.reconcile_as_of(day()).unwrap_err();
        assert!(matches!(err, EngineError::ReconcileInProgress));

        drop(guard);
        let result = first.join().unwrap().unwrap();
        assert_eq!(result.events_processed, 1);

        // 第一轮结束后可以再次触发
        let again = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(again.events_processed, 0);
    }

    #[test]
    fn test_engines_on_separate_connections_do_not_double_aggregate() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let seed = open_shared(&db_path);
        let details = seed_order(&seed, "PO1", Some("P1"), &["M1", "M2"]);
        let events: Vec<_> = (0..20)
            .map(|i| event("PO1", if i % 2 == 0 { "M1" } else { "M2" }, 1.0 + i as f64))
            .collect();
        insert_events(&seed, &events);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = db_path.clone();
                thread::spawn(move || {
                    let conn = open_shared(&path);
                    ReconcileEngine::new(conn, "1000".to_string(), 3).reconcile_as_of(day())
                })
            })
            .collect();

        let mut processed = 0;
        for handle in handles {
            processed += handle.join().unwrap().unwrap().events_processed;
        }
        assert_eq!(processed, 20);

        // 每个生产订单明细只有一个批次,批次号不重复
        let batch_repo = BatchRepository::new(seed.clone());
        assert_eq!(batch_repo.list_by_detail(details[0]).unwrap().len(), 1);
        assert_eq!(batch_repo.list_by_detail(details[1]).unwrap().len(), 1);
        assert_eq!(batch_repo.count_all().unwrap(), 2);

        assert!(ScaleEventRepository::new(seed.clone())
            .list_unsummarized()
            .unwrap()
            .is_empty());
    }
}
