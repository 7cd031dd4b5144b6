// ==========================================
// 汇总引擎集成测试
// ==========================================
// 职责: 验证事件分组、折算、批次复用、主数据缺失跳过与累计称重
// ==========================================


#[cfg(test)]
mod reconcile_engine_test {
    use chrono::NaiveDate;
    use weight_summary::domain::types::{MeasurementRule, TransmissionStatus};
    use weight_summary::domain::NewScaleEvent;
    use weight_summary::engine::ReconcileEngine;
    use weight_summary::repository::{
        BatchRepository, ProductionOrderRepository, ScaleEventRepository,
    };

    use crate::test_helpers::{
        active_items, approx_eq, create_test_db, event, force_batch_status, insert_events,
        open_shared, seed_material, seed_order,
    };

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn engine(conn: &std::sync::Arc<std::sync::Mutex<rusqlite::Connection>>) -> ReconcileEngine {
        ReconcileEngine::new(conn.clone(), "1000".to_string(), 3)
    }

    // ==========================================
    // 折算规则
    // ==========================================

    #[test]
    fn test_actual_rule_sums_raw_weight() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", None, &["M1"])[0];
        seed_material(&conn, "M1", Some(MeasurementRule::Actual), None, Some("KG"));
        let event_ids = insert_events(
            &conn,
            &[
                NewScaleEvent::new("PO1", "M1", 10.0).with_plant("P1"),
                NewScaleEvent::new("PO1", "M1", 15.0).with_plant("P1"),
            ],
        );

        let result = engine(&conn).reconcile_as_of(day()).unwrap();
        assert_eq!(result.batches_created, 1);
        assert_eq!(result.batches_touched, 1);
        assert_eq!(result.items_created, 1);
        assert_eq!(result.events_processed, 2);
        assert_eq!(result.groups_skipped, 0);

        let batches = BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.batch_code, "SUMP1202603010001");
        assert_eq!(batch.transmission_status, TransmissionStatus::Pending);
        assert_eq!(batch.scale_event_id_from, event_ids[0]);
        assert_eq!(batch.scale_event_id_to, event_ids[1]);

        let items = active_items(&conn, batch.id);
        assert_eq!(items.len(), 1);
        assert!(approx_eq(items[0].total_raw_weight, 25.0));
        assert!(approx_eq(items[0].total_converted_weight, 25.0));
        assert_eq!(items[0].plant_code.as_deref(), Some("P1"));
        assert_eq!(items[0].material_unit.as_deref(), Some("KG"));

        // 事件回写折算结果与归属批次,并置汇总标记
        let event_repo = ScaleEventRepository::new(conn.clone());
        for (id, raw) in event_ids.iter().zip([10.0, 15.0]) {
            let e = event_repo.find_by_id(*id).unwrap().unwrap();
            assert!(e.is_summarized);
            assert_eq!(e.summary_batch_id, Some(batch.id));
            assert_eq!(e.converted_weight, Some(raw));
            assert_eq!(e.measurement_rule_applied, Some(MeasurementRule::Actual));
        }

        let detail = ProductionOrderRepository::new(conn.clone())
            .find_detail_by_id(detail_id)
            .unwrap()
            .unwrap();
        assert!(approx_eq(detail.total_weighed, 25.0));
        assert!(approx_eq(detail.total_weighed_good_receive, 0.0));
        assert_eq!(detail.weighing_count, 2);
    }

    #[test]
    fn test_standard_rule_uses_fixed_value_per_event() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", None, &["M1"])[0];
        seed_material(&conn, "M1", Some(MeasurementRule::Standard), Some(5.0), None);
        insert_events(
            &conn,
            &[
                NewScaleEvent::new("PO1", "M1", 10.0).with_plant("P1"),
                NewScaleEvent::new("PO1", "M1", 15.0).with_plant("P1"),
            ],
        );

        engine(&conn).reconcile_as_of(day()).unwrap();

        let batch = &BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap()[0];
        let items = active_items(&conn, batch.id);
        assert_eq!(items.len(), 1);
        assert!(approx_eq(items[0].total_raw_weight, 25.0));
        assert!(approx_eq(items[0].total_converted_weight, 10.0));

        let detail = ProductionOrderRepository::new(conn.clone())
            .find_detail_by_id(detail_id)
            .unwrap()
            .unwrap();
        assert!(approx_eq(detail.total_weighed, 10.0));
    }

    #[test]
    fn test_unknown_material_falls_back_to_raw_weight() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", None, &["M1"])[0];
        let ids = insert_events(&conn, &[event("PO1", "M1", 12.5)]);

        engine(&conn).reconcile_as_of(day()).unwrap();

        let batch = &BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap()[0];
        let items = active_items(&conn, batch.id);
        assert!(approx_eq(items[0].total_converted_weight, 12.5));
        assert!(items[0].material_unit.is_none());

        let e = ScaleEventRepository::new(conn.clone())
            .find_by_id(ids[0])
            .unwrap()
            .unwrap();
        assert_eq!(e.converted_weight, Some(12.5));
        assert!(e.measurement_rule_applied.is_none());
    }

    // ==========================================
    // 幂等与批次复用
    // ==========================================

    #[test]
    fn test_second_run_without_new_events_changes_nothing() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", Some("P1"), &["M1"])[0];
        insert_events(&conn, &[event("PO1", "M1", 10.0), event("PO1", "M1", 20.0)]);

        let engine = engine(&conn);
        engine.reconcile_as_of(day()).unwrap();
        let order_repo = ProductionOrderRepository::new(conn.clone());
        let before = order_repo.find_detail_by_id(detail_id).unwrap().unwrap();

        let second = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(second.batches_created, 0);
        assert_eq!(second.items_created, 0);
        assert_eq!(second.events_processed, 0);

        assert_eq!(BatchRepository::new(conn.clone()).count_all().unwrap(), 1);
        let after = order_repo.find_detail_by_id(detail_id).unwrap().unwrap();
        assert_eq!(before.total_weighed, after.total_weighed);
        assert_eq!(before.weighing_count, after.weighing_count);
    }

    #[test]
    fn test_rerun_after_lost_summary_flags_does_not_double_count() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", Some("P1"), &["M1"])[0];
        let event_ids =
            insert_events(&conn, &[event("PO1", "M1", 10.0), event("PO1", "M1", 20.0)]);

        let engine = engine(&conn);
        engine.reconcile_as_of(day()).unwrap();
        let batch_id = BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap()[0].id;
        let order_repo = ProductionOrderRepository::new(conn.clone());
        let before = order_repo.find_detail_by_id(detail_id).unwrap().unwrap();

        // 事务已提交但置标记失败: 事件已归属批次,标记仍为 0
        conn.lock()
            .unwrap()
            .execute(
                "UPDATE scale_event SET is_summarized = 0 WHERE summary_batch_id IS NOT NULL",
                [],
            )
            .unwrap();
        let event_repo = ScaleEventRepository::new(conn.clone());
        assert!(event_repo.list_unsummarized().unwrap().is_empty());

        let second = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(second.events_processed, 0);
        assert_eq!(second.items_created, 0);

        let items = active_items(&conn, batch_id);
        assert_eq!(items.len(), 1);
        assert!(approx_eq(items[0].total_raw_weight, 30.0));
        assert!(approx_eq(items[0].total_converted_weight, 30.0));

        let after = order_repo.find_detail_by_id(detail_id).unwrap().unwrap();
        assert!(approx_eq(after.total_weighed, before.total_weighed));
        assert_eq!(after.weighing_count, before.weighing_count);
        assert_eq!(after.weighing_count, 2);

        // 第二轮补标
        for id in &event_ids {
            let e = event_repo.find_by_id(*id).unwrap().unwrap();
            assert!(e.is_summarized);
            assert_eq!(e.summary_batch_id, Some(batch_id));
        }
    }

    #[test]
    fn test_blank_and_missing_dimensions_share_one_item() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", Some("P1"), &["M1"])[0];

        let mut empty = event("PO1", "M1", 10.0);
        empty.production_lot = Some(String::new());
        let mut missing = event("PO1", "M1", 20.0);
        missing.production_lot = None;
        let mut spaces = event("PO1", "M1", 30.0);
        spaces.production_lot = Some("  ".to_string());
        insert_events(&conn, &[empty, missing, spaces]);

        let result = engine(&conn).reconcile_as_of(day()).unwrap();
        assert_eq!(result.items_created, 1);
        assert_eq!(result.events_processed, 3);

        let batch_id = BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap()[0].id;
        let items = active_items(&conn, batch_id);
        assert_eq!(items.len(), 1);
        assert!(items[0].production_lot.is_none());
        assert!(approx_eq(items[0].total_raw_weight, 60.0));
    }

    #[test]
    fn test_pending_batch_is_reused_across_runs() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", Some("P1"), &["M1"])[0];
        let engine = engine(&conn);

        insert_events(&conn, &[event("PO1", "M1", 10.0)]);
        engine.reconcile_as_of(day()).unwrap();

        let mut other_shift = event("PO1", "M1", 7.0);
        other_shift.production_shift = Some("B".to_string());
        let later = insert_events(&conn, &[event("PO1", "M1", 5.0), other_shift]);

        let result = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(result.batches_created, 0);
        assert_eq!(result.batches_reused, 1);
        assert_eq!(result.items_updated, 1);
        assert_eq!(result.items_created, 1);

        let batches = BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].scale_event_id_to, later[1]);

        let items = active_items(&conn, batches[0].id);
        assert_eq!(items.len(), 2);
        let shift_a = items
            .iter()
            .find(|i| i.production_shift.as_deref() == Some("A"))
            .unwrap();
        assert!(approx_eq(shift_a.total_raw_weight, 15.0));

        let detail = ProductionOrderRepository::new(conn.clone())
            .find_detail_by_id(detail_id)
            .unwrap()
            .unwrap();
        assert!(approx_eq(detail.total_weighed, 22.0));
        assert_eq!(detail.weighing_count, 3);
    }

    // ==========================================
    // 跳过规则
    // ==========================================

    #[test]
    fn test_missing_order_skips_group_and_retries_later() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        seed_order(&conn, "PO1", Some("P1"), &["M1"]);
        let ids = insert_events(&conn, &[event("PO9", "M1", 3.0), event("PO1", "M1", 4.0)]);

        let engine = engine(&conn);
        let result = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(result.groups_skipped, 1);
        assert_eq!(result.events_processed, 1);

        let event_repo = ScaleEventRepository::new(conn.clone());
        let orphan = event_repo.find_by_id(ids[0]).unwrap().unwrap();
        assert!(!orphan.is_summarized);
        assert!(orphan.summary_batch_id.is_none());
        assert!(orphan.converted_weight.is_none());

        // 主数据补齐后下一轮汇总
        let detail_id = seed_order(&conn, "PO9", Some("P1"), &["M1"])[0];
        let result = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(result.groups_skipped, 0);
        assert_eq!(result.events_processed, 1);
        assert_eq!(BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_detail_for_material_is_skipped() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        seed_order(&conn, "PO1", Some("P1"), &["M1"]);
        insert_events(&conn, &[event("PO1", "M2", 3.0)]);

        let result = engine(&conn).reconcile_as_of(day()).unwrap();
        assert_eq!(result.groups_skipped, 1);
        assert_eq!(result.batches_created, 0);
        assert_eq!(BatchRepository::new(conn.clone()).count_all().unwrap(), 0);
    }

    #[test]
    fn test_processed_batch_blocks_new_items() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let detail_id = seed_order(&conn, "PO1", Some("P1"), &["M1"])[0];
        let engine = engine(&conn);

        insert_events(&conn, &[event("PO1", "M1", 10.0)]);
        engine.reconcile_as_of(day()).unwrap();
        let batch_id = BatchRepository::new(conn.clone()).list_by_detail(detail_id).unwrap()[0].id;
        force_batch_status(&conn, batch_id, TransmissionStatus::Processed);

        let ids = insert_events(&conn, &[event("PO1", "M1", 6.0)]);
        let result = engine.reconcile_as_of(day()).unwrap();
        assert_eq!(result.groups_skipped, 1);
        assert_eq!(result.batches_created, 0);

        assert_eq!(active_items(&conn, batch_id).len(), 1);
        assert!(approx_eq(active_items(&conn, batch_id)[0].total_raw_weight, 10.0));
        let e = ScaleEventRepository::new(conn.clone())
            .find_by_id(ids[0])
            .unwrap()
            .unwrap();
        assert!(!e.is_summarized);
    }

    // ==========================================
    // 工厂与批次号
    // ==========================================

    #[test]
    fn test_plant_precedence_order_event_default() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let from_order = seed_order(&conn, "PO1", Some("P0"), &["M1"])[0];
        let from_event = seed_order(&conn, "PO2", None, &["M1"])[0];
        let from_default = seed_order(&conn, "PO3", None, &["M1"])[0];
        insert_events(
            &conn,
            &[
                NewScaleEvent::new("PO1", "M1", 1.0).with_plant("P9"),
                NewScaleEvent::new("PO2", "M1", 1.0).with_plant("P9"),
                NewScaleEvent::new("PO3", "M1", 1.0),
            ],
        );

        engine(&conn).reconcile_as_of(day()).unwrap();

        let batch_repo = BatchRepository::new(conn.clone());
        let code = |detail_id| batch_repo.list_by_detail(detail_id).unwrap()[0].batch_code.clone();
        assert_eq!(code(from_order), "SUMP0202603010001");
        assert_eq!(code(from_event), "SUMP9202603010001");
        assert_eq!(code(from_default), "SUM1000202603010001");
    }

    #[test]
    fn test_batch_codes_are_sequential_per_plant_and_day() {
        let (_tmp, db_path) = create_test_db().unwrap();
        let conn = open_shared(&db_path);
        let details = seed_order(&conn, "PO1", Some("P1"), &["M1", "M2"]);
        let engine = engine(&conn);

        insert_events(&conn, &[event("PO1", "M1", 1.0), event("PO1", "M2", 1.0)]);
        engine.reconcile_as_of(day()).unwrap();

        let batch_repo = BatchRepository::new(conn.clone());
        assert_eq!(
            batch_repo.list_by_detail(details[0]).unwrap()[0].batch_code,
            "SUMP1202603010001"
        );
        assert_eq!(
            batch_repo.list_by_detail(details[1]).unwrap()[0].batch_code,
            "SUMP1202603010002"
        );

        // 次日从 0001 重新开始
        let next_day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let po2 = seed_order(&conn, "PO2", Some("P1"), &["M1"])[0];
        insert_events(&conn, &[event("PO2", "M1", 1.0)]);
        engine.reconcile_as_of(next_day).unwrap();
        assert_eq!(
            batch_repo.list_by_detail(po2).unwrap()[0].batch_code,
            "SUMP1202603020001"
        );
    }
}
