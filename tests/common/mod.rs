//! Shared helpers: an in-memory SQLite store wired into a reconciler with a
//! journal in a temp dir, guarded user writes, and tree builders.

#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use fixture_reconciler::core::config::Config;
use fixture_reconciler::driver::Reconciler;
use fixture_reconciler::fixture::tree::{Declaration, Init, NodeKind, TestNode};
use fixture_reconciler::logger::jsonl::{EventType, LogEntry};
use fixture_reconciler::storage::sql::SqlBackend;
use fixture_reconciler::storage::{SqlStore, SqliteBackend};
use parking_lot::Mutex;
use rusqlite::Connection;
use tempfile::TempDir;

pub const SCHEMA: &str = "
    CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, total INTEGER NOT NULL);
    CREATE TABLE items (id INTEGER PRIMARY KEY, order_id INTEGER, name TEXT);
";

pub struct Harness {
    pub reconciler: Reconciler,
    pub conn: Arc<Mutex<Connection>>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.journal.enabled = true;
        config.journal.path = dir.path().join("journal.jsonl");
        tweak(&mut config);

        let mut backend = SqliteBackend::open_in_memory(&config.sql).expect("sqlite");
        backend.execute(SCHEMA).expect("schema");
        let conn = backend.connection();
        let mut reconciler = Reconciler::new(config).expect("reconciler");
        reconciler
            .add_sql_store(SqlStore::open("main", backend).expect("store"))
            .expect("register store");
        Self {
            reconciler,
            conn,
            dir,
        }
    }

    /// Stop the journal writer and parse every line it wrote.
    pub fn journal(&mut self) -> Vec<LogEntry> {
        self.reconciler.shutdown();
        let raw = fs::read_to_string(self.dir.path().join("journal.jsonl")).unwrap_or_default();
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("journal line"))
            .collect()
    }
}

/// Plan entries journaled for one node.
pub fn plans_for<'a>(entries: &'a [LogEntry], node: &str) -> Vec<&'a LogEntry> {
    entries
        .iter()
        .filter(|e| e.event == EventType::PlanApply && e.node.as_deref() == Some(node))
        .collect()
}

/// A write issued the way code under test would, through the guard.
pub fn user_write(conn: &Arc<Mutex<Connection>>, sql: &str) -> Result<usize, String> {
    conn.lock().execute(sql, []).map_err(|e| e.to_string())
}

pub fn count(conn: &Arc<Mutex<Connection>>, table: &str) -> i64 {
    conn.lock()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .expect("count")
}

pub fn total_of(conn: &Arc<Mutex<Connection>>, id: i64) -> Option<i64> {
    conn.lock()
        .query_row("SELECT total FROM orders WHERE id = ?1", [id], |row| row.get(0))
        .ok()
}

/// Parse an init from its JSON form, e.g. `{"tables": {...}}`.
pub fn init(json: serde_json::Value) -> Init {
    serde_json::from_value(json).expect("init")
}

pub fn tables(json: serde_json::Value) -> Init {
    Init::new(Declaration::Tables(serde_json::from_value(json).expect("tables declaration")))
}

pub fn container(name: &str) -> TestNode {
    TestNode::new(NodeKind::Container, name)
}

pub fn case(name: &str) -> TestNode {
    TestNode::new(NodeKind::Case, name)
}

pub fn part(name: &str) -> TestNode {
    TestNode::new(NodeKind::Part, name)
}

/// Turn a boolean check into the executor's error type.
pub fn check(ok: bool, what: impl Into<String>) -> Result<(), String> {
    if ok { Ok(()) } else { Err(what.into()) }
}
