//! End-to-end reconciliation against an in-memory SQLite store: scoped table
//! fixtures, minimal plans between siblings, guard enforcement, dirty
//! tracking, hooks, recorded diffs and case-scoped key-value entries.

#![cfg(feature = "sqlite")]

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{TimeZone, Utc};
use serde_json::json;

use common::{Harness, case, check, container, count, init, part, plans_for, tables, total_of, user_write};
use fixture_reconciler::diff::container::ChangeKind;
use fixture_reconciler::driver::TestStatus;
use fixture_reconciler::fixture::tree::TestTree;
use fixture_reconciler::logger::jsonl::EventType;
use fixture_reconciler::storage::{KeyValueBackend, KeyValueStore, MemoryKeyValueBackend};

// ── Scenario 1: sibling case re-runs only what it adds ───────────

#[test]
fn sibling_case_runs_only_the_new_statement() {
    let mut h = Harness::new();
    let conn = h.conn.clone();
    let tree = TestTree::new(
        container("suite")
            .with_child(case("case1").with_init(tables(json!({
                "tables_to_change": "orders",
                "sql": ["INSERT INTO orders VALUES (1, 10)"]
            }))))
            .with_child(case("case2").with_init(tables(json!({
                "tables_to_change": "orders",
                "sql": ["INSERT INTO orders VALUES (1, 10)", "UPDATE orders SET total = 20 WHERE id = 1"]
            })))),
    );

    let outcomes = h
        .reconciler
        .run_tree(&tree, |ctx| match ctx.node.name.as_str() {
            "case1" => check(total_of(&conn, 1) == Some(10), "case1 sees the insert"),
            _ => {
                check(count(&conn, "orders") == 1, "insert must not run twice")?;
                check(total_of(&conn, 1) == Some(20), "update applied")
            }
        })
        .unwrap();
    assert!(outcomes.iter().all(|o| o.status.is_passed()), "{outcomes:?}");

    let journal = h.journal();
    let first = plans_for(&journal, "suite/case1");
    assert_eq!(first.len(), 1);
    assert!(first[0].details.as_deref().unwrap().contains("allow=[orders]"));

    let second = plans_for(&journal, "suite/case2");
    assert_eq!(second.len(), 1);
    assert_eq!(
        second[0].details.as_deref(),
        Some("allow=[] deny=[] clear=[] load=[]")
    );
    assert_eq!(second[0].statements, Some(1));
}

// ── Scenario 2: later Parts build on their predecessor ───────────

#[test]
fn later_part_without_declarations_keeps_predecessor_effects() {
    let mut h = Harness::new();
    let conn = h.conn.clone();
    let tree = TestTree::new(
        container("suite").with_child(
            case("flow")
                .with_init(tables(json!({"tables_to_change": "orders"})))
                .with_child(part("p1").with_init(tables(json!({
                    "sql": ["INSERT INTO orders (total) VALUES (10)"]
                }))))
                .with_child(part("p2")),
        ),
    );

    let outcomes = h
        .reconciler
        .run_tree(&tree, |ctx| match ctx.node.name.as_str() {
            "p1" => user_write(&conn, "INSERT INTO orders (total) VALUES (20)").map(|_| ()),
            _ => check(count(&conn, "orders") == 2, "p2 sees both p1 rows"),
        })
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.status.is_passed()), "{outcomes:?}");

    let journal = h.journal();
    assert_eq!(plans_for(&journal, "suite/flow/p1").len(), 1);
    assert!(plans_for(&journal, "suite/flow/p2").is_empty());
}

// ── Scenario 3: dirty tables on later Parts ──────────────────────

fn dirty_part_tree() -> TestTree {
    TestTree::new(
        container("suite")
            .with_init(init(json!({"storage_setup": {
                "dataset": {"orders": [{"id": 1, "total": 5}]},
                "hooks": [{"table": "orders", "callback": "orders_changed"}]
            }})))
            .with_child(
                case("flow")
                    .with_init(tables(json!({"tables_to_load": "orders"})))
                    .with_child(part("p1").with_init(init(json!({"no_hook_sql": {
                        "sql": ["DELETE FROM orders"]
                    }}))))
                    .with_child(part("p2").with_init(tables(json!({"tables_to_change": "items"})))),
            ),
    )
}

fn run_dirty_parts(check_dirty_on_parts: bool) -> (u32, Vec<i64>) {
    let mut h = Harness::with_config(|c| c.reconcile.check_dirty_on_parts = check_dirty_on_parts);
    let conn = h.conn.clone();
    let fired = Rc::new(Cell::new(0_u32));
    let counter = Rc::clone(&fired);
    h.reconciler.register_callback("orders_changed", move || {
        counter.set(counter.get() + 1);
        Ok(())
    });

    let seen = RefCell::new(Vec::new());
    let outcomes = h
        .reconciler
        .run_tree(&dirty_part_tree(), |_| {
            seen.borrow_mut().push(count(&conn, "orders"));
            Ok(())
        })
        .unwrap();
    assert!(outcomes.iter().all(|o| o.status.is_passed()), "{outcomes:?}");
    (fired.get(), seen.into_inner())
}

#[test]
fn dirty_table_is_reloaded_on_later_part_when_checking_is_enabled() {
    let (hooks, rows) = run_dirty_parts(true);
    assert_eq!(rows, [0, 1]);
    assert_eq!(hooks, 2);
}

#[test]
fn dirty_table_is_left_alone_on_later_part_by_default() {
    let (hooks, rows) = run_dirty_parts(false);
    assert_eq!(rows, [0, 0]);
    assert_eq!(hooks, 1);
}

// ── Scenario 4: the guard and sibling reverts ────────────────────

#[test]
fn guard_rejects_undeclared_writes_and_siblings_revert_access() {
    let mut h = Harness::new();
    let conn = h.conn.clone();
    let tree = TestTree::new(
        container("suite")
            .with_child(case("writer").with_init(tables(json!({"tables_to_change": ["orders"]}))))
            .with_child(case("reader")),
    );

    let outcomes = h
        .reconciler
        .run_tree(&tree, |ctx| match ctx.node.name.as_str() {
            "writer" => {
                let denied = user_write(&conn, "INSERT INTO items (id, name) VALUES (1, 'pen')");
                check(
                    denied.is_err_and(|e| e.contains("restricted")),
                    "items must be guarded",
                )?;
                user_write(&conn, "INSERT INTO orders (total) VALUES (3)").map(|_| ())
            }
            _ => {
                check(count(&conn, "orders") == 0, "reader starts from a cleared table")?;
                check(
                    user_write(&conn, "INSERT INTO orders (total) VALUES (4)").is_err(),
                    "orders is restricted again",
                )
            }
        })
        .unwrap();
    assert!(outcomes.iter().all(|o| o.status.is_passed()), "{outcomes:?}");

    let journal = h.journal();
    let revert = plans_for(&journal, "suite/reader");
    assert_eq!(revert.len(), 1);
    let details = revert[0].details.as_deref().unwrap();
    assert!(details.contains("deny=[orders]"), "{details}");
    assert!(details.contains("clear=[orders]"), "{details}");
}

// ── Scenario 5: declaration failures ─────────────────────────────

#[test]
fn unknown_table_is_a_setup_failure_and_siblings_still_run() {
    let mut h = Harness::new();
    let tree = TestTree::new(
        container("suite")
            .with_child(case("bad").with_init(tables(json!({"tables_to_change": "nope"}))))
            .with_child(case("good").with_init(tables(json!({"tables_to_change": "orders"})))),
    );
    let outcomes = h.reconciler.run_tree(&tree, |_| Ok(())).unwrap();
    match &outcomes[0].status {
        TestStatus::SetupFailed { code, message } => {
            assert_eq!(code, "FXR-2005");
            assert!(message.contains("nope"), "{message}");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(outcomes[1].status.is_passed());
    assert_eq!(h.reconciler.depth(), 0);

    let journal = h.journal();
    let failure = journal
        .iter()
        .find(|e| e.event == EventType::SetupFailure)
        .unwrap();
    assert_eq!(failure.node.as_deref(), Some("suite/bad"));
    assert_eq!(failure.fixture.as_deref(), Some("tables"));
}

// ── Scenario 6: datasets from files ──────────────────────────────

#[test]
fn dataset_files_feed_load_all_tables() {
    let mut h = Harness::new();
    let conn = h.conn.clone();
    let data = h.dir.path().join("data.json");
    std::fs::write(
        &data,
        json!({
            "orders": [{"id": 1, "total": 5}, {"id": 2, "total": 7}],
            "items": [{"id": 1, "order_id": 1, "name": "pen"}]
        })
        .to_string(),
    )
    .unwrap();

    let tree = TestTree::from_json(
        &json!({
            "kind": "container", "name": "suite",
            "inits": [{"storage_setup": {"dataset_files": [data]}}],
            "children": [{
                "kind": "case", "name": "loaded",
                "inits": [{"tables": {"load_all_tables": true}}]
            }]
        })
        .to_string(),
    )
    .unwrap();

    let outcomes = h
        .reconciler
        .run_tree(&tree, |_| {
            check(count(&conn, "orders") == 2, "orders loaded")?;
            check(count(&conn, "items") == 1, "items loaded")?;
            check(
                user_write(&conn, "DELETE FROM orders").is_err(),
                "loaded tables stay restricted",
            )
        })
        .unwrap();
    assert!(outcomes[0].status.is_passed(), "{outcomes:?}");
}

// ── Scenario 7: frozen clock follows the scope ───────────────────

#[test]
fn clock_is_frozen_per_scope_and_offsets_accumulate() {
    let mut h = Harness::new();
    let tree = TestTree::new(
        container("suite")
            .with_init(init(json!({"date_time": {"at": "2024-01-01T00:00:00Z"}})))
            .with_child(case("first"))
            .with_child(case("later").with_init(init(json!({"date_time": {"add_seconds": 90}})))),
    );
    let seen = RefCell::new(Vec::new());
    h.reconciler
        .run_tree(&tree, |ctx| {
            seen.borrow_mut().push(ctx.clock.now());
            Ok(())
        })
        .unwrap();

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 30).unwrap();
    assert_eq!(seen.into_inner(), [start, later]);
}

// ── Scenario 8: recorded diffs ───────────────────────────────────

#[test]
fn outcome_diff_lists_rows_the_test_wrote_even_when_it_fails() {
    let mut h = Harness::new();
    let conn = h.conn.clone();
    let tree = TestTree::new(
        container("suite").with_child(case("adds").with_init(tables(json!({"tables_to_change": "orders"})))),
    );
    let outcomes = h
        .reconciler
        .run_tree(&tree, |_| {
            user_write(&conn, "INSERT INTO orders (total) VALUES (42)")?;
            Err("expected a different total".to_string())
        })
        .unwrap();

    let outcome = &outcomes[0];
    assert!(matches!(outcome.status, TestStatus::Failed { .. }));
    let diff = outcome.diff.as_ref().unwrap().as_changes().unwrap();
    let main = diff.get("main").unwrap().value.as_ref().unwrap().as_changes().unwrap();
    let orders = main.get("orders").unwrap().value.as_ref().unwrap().as_changes().unwrap();
    assert_eq!(orders.keys(), ["1"]);
    assert_eq!(orders.get("1").unwrap().change, ChangeKind::Added);

    let journal = h.journal();
    assert!(
        journal
            .iter()
            .any(|e| e.event == EventType::DiffRecord && e.node.as_deref() == Some("suite/adds"))
    );
}

// ── Scenario 9: key-value entries are re-established per case ───

#[test]
fn case_scoped_key_value_entries_undo_the_previous_sibling() {
    let mut h = Harness::new();
    let backend = MemoryKeyValueBackend::new();
    let reader = backend.handle();
    let mut writer = backend.handle();
    h.reconciler
        .add_key_value_store(KeyValueStore::new("cache", backend))
        .unwrap();

    let tree = TestTree::new(
        container("suite")
            .with_init(init(json!({"apply_to": "case", "key_value": {"entries": {"a": 1}}})))
            .with_child(case("one"))
            .with_child(case("two")),
    );

    let mut seen = Vec::new();
    let outcomes = h
        .reconciler
        .run_tree(&tree, |ctx| {
            seen.push(reader.get("a"));
            if ctx.node.name == "one" {
                writer.put("a", &json!(2)).map_err(|e| e.to_string())?;
            }
            Ok(())
        })
        .unwrap();
    assert!(outcomes.iter().all(|o| o.status.is_passed()), "{outcomes:?}");
    assert_eq!(seen, [Some(json!(1)), Some(json!(1))]);
}
