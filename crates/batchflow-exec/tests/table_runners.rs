use std::collections::HashMap;
use std::sync::Arc;

use batchflow_eval::{Decimal2, ScalarValue};
use batchflow_exec::{
    run_create_distinct_table_for_batch, run_create_table_for_batch, ExecConfig, ExecError,
    MemoryStore, StoreErrorKind, WriterConfig,
};
use batchflow_schema::{TableCreatorDef, TableNodeDef, TableReaderDef};
use pretty_assertions::assert_eq;

fn events_def() -> TableCreatorDef {
    TableCreatorDef::from_json(
        r#"{
            "name": "events",
            "fields": {
                "user": {"expression": "r.user", "type": "string"},
                "amount": {"expression": "r.amount", "type": "decimal2"}
            }
        }"#,
    )
    .unwrap()
}

const USERS: [&str; 4] = ["ann", "bob", "Ann", "cid"];

/// Ten events cycling through four users, amounts 1.00..10.00.
fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for i in 0..10i64 {
        store.put_row(
            "events",
            i + 1,
            HashMap::from([
                ("user".to_string(), ScalarValue::from(USERS[i as usize % 4])),
                (
                    "amount".to_string(),
                    ScalarValue::Decimal(Decimal2::from_cents((i + 1) * 100)),
                ),
            ]),
        );
    }
    store
}

fn config(workers: usize) -> ExecConfig {
    ExecConfig {
        writer: WriterConfig {
            workers,
            does_not_exist_pause_ms: 1,
            operation_timed_out_pause_ms: 1,
            ..WriterConfig::default()
        },
        ..ExecConfig::default()
    }
}

fn reader() -> TableReaderDef {
    TableReaderDef::from_json(r#"{"table": "events", "rowset_size": 3}"#).unwrap()
}

fn copy_node(having: &str) -> TableNodeDef {
    let creator = TableCreatorDef::from_json(&format!(
        r#"{{
            "name": "big_events",
            "having": "{having}",
            "fields": {{
                "user": {{"expression": "strings.ReplaceAll(r.user, \"n\", \"N\")", "type": "string"}},
                "amount": {{"expression": "r.amount * 2", "type": "decimal2"}}
            }},
            "indexes": {{"idx_big_events_user": "non_unique(user)"}}
        }}"#
    ))
    .unwrap();
    TableNodeDef::table("copy_events", reader(), &events_def(), creator).unwrap()
}

fn users_node() -> TableNodeDef {
    let creator = TableCreatorDef::from_json(
        r#"{
            "name": "users",
            "fields": {"user": {"expression": "r.user", "type": "string"}},
            "indexes": {"idx_users_user": "unique(user(ignore_case))"}
        }"#,
    )
    .unwrap();
    TableNodeDef::distinct_table("distinct_users", reader(), &events_def(), creator).unwrap()
}

fn prepare_output(store: &MemoryStore, table: &str, index: &str) {
    store.create_table(table);
    store.create_index(index);
}

#[test]
fn plain_table_applies_expressions_and_having() {
    let store = seeded_store();
    prepare_output(&store, "big_events", "idx_big_events_user");
    let node = copy_node("w.amount >= 10");
    let stats =
        run_create_table_for_batch(&*store, store.clone(), &node, &config(3), i64::MIN, i64::MAX)
            .unwrap();
    assert_eq!(stats.rows_read, 10);
    assert_eq!(stats.rows_written, 6);
    assert_eq!(stats.src, "events");
    assert_eq!(stats.dst, "big_events");

    let mut amounts: Vec<i64> = store
        .rows("big_events")
        .iter()
        .map(|row| match &row.values["amount"] {
            ScalarValue::Decimal(d) => d.cents(),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    amounts.sort_unstable();
    assert_eq!(amounts, vec![1000, 1200, 1400, 1600, 1800, 2000]);
    assert_eq!(store.index_entries("idx_big_events_user").len(), 6);
}

#[test]
fn token_ranges_split_the_work() {
    let store = seeded_store();
    prepare_output(&store, "big_events", "idx_big_events_user");
    let node = copy_node("");
    let mut read = 0;
    for (start, end) in batchflow_schema::token_intervals(4) {
        let stats =
            run_create_table_for_batch(&*store, store.clone(), &node, &config(1), start, end)
                .unwrap();
        read += stats.rows_read;
    }
    assert_eq!(read, 10);
    assert_eq!(store.row_count("big_events"), 10);
}

#[test]
fn distinct_table_writes_each_key_once() {
    let store = seeded_store();
    prepare_output(&store, "users", "idx_users_user");
    let stats = run_create_distinct_table_for_batch(
        &*store,
        store.clone(),
        &users_node(),
        &config(2),
        i64::MIN,
        i64::MAX,
    )
    .unwrap();
    assert_eq!(stats.rows_read, 10);
    // "ann" and "Ann" share a key under ignore_case.
    assert_eq!(stats.rows_written, 3);
    assert_eq!(store.row_count("users"), 3);
    assert_eq!(store.index_entries("idx_users_user").len(), 3);
}

#[test]
fn rowid_collisions_and_timeouts_are_retried() {
    let store = seeded_store();
    prepare_output(&store, "big_events", "idx_big_events_user");
    store.collide_next_rowids(3);
    store.fail_next_data_inserts([
        StoreErrorKind::OperationTimedOut,
        StoreErrorKind::NoResponses,
    ]);
    store.fail_next_index_inserts([StoreErrorKind::TableDoesNotExist]);
    let stats = run_create_table_for_batch(
        &*store,
        store.clone(),
        &copy_node(""),
        &config(1),
        i64::MIN,
        i64::MAX,
    )
    .unwrap();
    assert_eq!(stats.rows_written, 10);
    assert_eq!(store.row_count("big_events"), 10);
    assert_eq!(store.index_entries("idx_big_events_user").len(), 10);

    let collided = store.collided_rowids("big_events");
    assert_eq!(collided.len(), 3);
    let stored: Vec<i64> = store.rows("big_events").iter().map(|r| r.rowid).collect();
    assert!(stored.iter().all(|rowid| !collided.contains(rowid)), "{stored:?} {collided:?}");
    assert!(store
        .index_entries("idx_big_events_user")
        .iter()
        .all(|entry| stored.contains(&entry.rowid)));
}

#[test]
fn missing_output_table_reports_capped_errors() {
    let store = seeded_store();
    store.create_index("idx_big_events_user");
    let mut cfg = config(2);
    cfg.writer.max_db_problem_retries = 2;
    let err = run_create_table_for_batch(
        &*store,
        store.clone(),
        &copy_node(""),
        &cfg,
        i64::MIN,
        i64::MAX,
    )
    .unwrap_err();
    let messages = match err {
        ExecError::Write(messages) => messages,
        other => panic!("expected write errors, got {other}"),
    };
    assert_eq!(messages.len(), 6);
    assert!(messages[0].contains("giving up after 2 attempts"), "{}", messages[0]);
    assert_eq!(
        messages[5],
        "too many errors in TableInserter, 5 more not shown"
    );
}

#[test]
fn runner_rejects_other_node_kinds() {
    let store = seeded_store();
    let err = run_create_table_for_batch(
        &*store,
        store.clone(),
        &users_node(),
        &config(1),
        i64::MIN,
        i64::MAX,
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "node distinct_users is a distinct_table node, expected table_table"
    );
}
