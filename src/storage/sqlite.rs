//! SQLite backend with a trigger-based write guard.
//!
//! Every user table gets `BEFORE INSERT/UPDATE/DELETE` triggers that abort
//! unless the table is listed in the guard table or the bypass table holds a
//! row. The engine sets the bypass around its own writes, so only code under
//! test is subject to the guard.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{Connection, OpenFlags, params, params_from_iter};

use crate::core::config::SqlConfig;
use crate::core::errors::{FxrError, Result};
use crate::diff::value::{Key, Value, ValueMap};
use crate::storage::sql::{Row, SqlBackend};

const GUARDED_OPERATIONS: [&str; 3] = ["INSERT", "UPDATE", "DELETE"];

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    guard_table: String,
    bypass_table: String,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("guard_table", &self.guard_table)
            .field("bypass_table", &self.bypass_table)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    pub fn open_in_memory(config: &SqlConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| sql_error("open", ":memory:", &e))?;
        Self::new(conn, config)
    }

    pub fn open(path: &Path, config: &SqlConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| FxrError::io(parent, e))?;
            }
        }
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .map_err(|e| sql_error("open", &path.display().to_string(), &e))?;
        Self::new(conn, config)
    }

    /// Take over an existing connection and create the bookkeeping tables.
    pub fn new(conn: Connection, config: &SqlConfig) -> Result<Self> {
        let schema = format!(
            "CREATE TABLE IF NOT EXISTS {guard} (name TEXT PRIMARY KEY NOT NULL);
             CREATE TABLE IF NOT EXISTS {bypass} (active INTEGER NOT NULL);
             DELETE FROM {bypass};",
            guard = quote_ident(&config.guard_table),
            bypass = quote_ident(&config.bypass_table),
        );
        conn.execute_batch(&schema)
            .map_err(|e| sql_error("guard schema", &schema, &e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            guard_table: config.guard_table.clone(),
            bypass_table: config.bypass_table.clone(),
        })
    }

    /// Shared connection for code under test; its writes go through the guard.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn with_bypass<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        let enable = format!("INSERT INTO {} (active) VALUES (1)", quote_ident(&self.bypass_table));
        conn.execute(&enable, [])
            .map_err(|e| sql_error("guard bypass", &enable, &e))?;
        let result = op(&conn);
        let disable = format!("DELETE FROM {}", quote_ident(&self.bypass_table));
        let reset = conn.execute(&disable, []);
        let value = result?;
        reset.map_err(|e| sql_error("guard bypass", &disable, &e))?;
        Ok(value)
    }

    fn primary_key(conn: &Connection, table: &str) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let mut stmt = conn.prepare(&sql).map_err(|e| sql_error("snapshot", &sql, &e))?;
        let mut columns: Vec<(i64, String)> = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?)))
            .map_err(|e| sql_error("snapshot", &sql, &e))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| sql_error("snapshot", &sql, &e))?;
        columns.retain(|(position, _)| *position > 0);
        columns.sort_by_key(|(position, _)| *position);
        Ok(columns.into_iter().map(|(_, name)| name).collect())
    }

    fn table_rows(
        conn: &Connection,
        table: &str,
        excluded: Option<&BTreeSet<String>>,
    ) -> Result<Value> {
        let key_columns = Self::primary_key(conn, table)?;
        let sql = format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table));
        let mut stmt = conn.prepare(&sql).map_err(|e| sql_error("snapshot", &sql, &e))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(str::to_string).collect();
        let mut rows = stmt.query([]).map_err(|e| sql_error("snapshot", &sql, &e))?;

        let mut out = ValueMap::new();
        let mut position: i64 = 0;
        while let Some(row) = rows.next().map_err(|e| sql_error("snapshot", &sql, &e))? {
            let mut record = ValueMap::new();
            let mut key_parts: Vec<Value> = Vec::with_capacity(key_columns.len());
            for (index, name) in names.iter().enumerate() {
                let value = row
                    .get_ref(index)
                    .map(to_value)
                    .map_err(|e| sql_error("snapshot", &sql, &e))?;
                if key_columns.contains(name) {
                    key_parts.push(value.clone());
                }
                if excluded.is_some_and(|cols| cols.contains(name)) {
                    continue;
                }
                record.insert(Key::Text(name.clone()), value);
            }
            out.insert(row_key(&key_parts, position), Value::Map(record));
            position += 1;
        }
        Ok(Value::Map(out))
    }
}

impl SqlBackend for SqliteBackend {
    fn known_tables(&mut self) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock();
        let sql = "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'";
        let mut stmt = conn.prepare(sql).map_err(|e| sql_error("known tables", sql, &e))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| sql_error("known tables", sql, &e))?
            .collect::<std::result::Result<BTreeSet<String>, _>>()
            .map_err(|e| sql_error("known tables", sql, &e))?;
        Ok(names
            .into_iter()
            .filter(|name| *name != self.guard_table && *name != self.bypass_table)
            .collect())
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.with_bypass(|conn| {
            conn.execute_batch(sql)
                .map_err(|e| sql_error("execute", sql, &e))
        })
    }

    fn load_dataset(&mut self, table: &str, rows: &[Row]) -> Result<()> {
        self.with_bypass(|conn| {
            for row in rows {
                let columns: Vec<String> = row.keys().map(|c| quote_ident(c)).collect();
                let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
                let sql = format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(table),
                    columns.join(", "),
                    placeholders.join(", ")
                );
                conn.execute(&sql, params_from_iter(row.values().map(from_json)))
                    .map_err(|e| FxrError::Dataset {
                        storage: table.to_string(),
                        details: format!("{sql}: {e}"),
                    })?;
            }
            Ok(())
        })
    }

    fn clear_tables(&mut self, tables: &BTreeSet<String>) -> Result<()> {
        self.with_bypass(|conn| {
            for table in tables {
                let sql = format!("DELETE FROM {}", quote_ident(table));
                conn.execute(&sql, []).map_err(|e| sql_error("clear", &sql, &e))?;
            }
            Ok(())
        })
    }

    fn restart_identity(&mut self, tables: &BTreeSet<String>) -> Result<()> {
        let conn = self.conn.lock();
        let has_sequences: bool = conn
            .query_row(
                "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'sqlite_sequence')",
                [],
                |row| row.get(0),
            )
            .map_err(|e| sql_error("restart identity", "sqlite_sequence", &e))?;
        if !has_sequences {
            return Ok(());
        }
        for table in tables {
            conn.execute("DELETE FROM sqlite_sequence WHERE name = ?1", params![table])
                .map_err(|e| sql_error("restart identity", table, &e))?;
        }
        Ok(())
    }

    fn install_guard(&mut self, tables: &BTreeSet<String>) -> Result<()> {
        let conn = self.conn.lock();
        let guard = quote_ident(&self.guard_table);
        let bypass = quote_ident(&self.bypass_table);
        for table in tables {
            for operation in GUARDED_OPERATIONS {
                let trigger = quote_ident(&format!(
                    "{}_{table}_{}",
                    self.guard_table,
                    operation.to_ascii_lowercase()
                ));
                let message = format!(
                    "changes to table \"{table}\" are restricted: it is not declared in the fixture"
                );
                let sql = format!(
                    "CREATE TRIGGER IF NOT EXISTS {trigger} BEFORE {operation} ON {table_ident}
                     WHEN NOT EXISTS (SELECT 1 FROM {bypass})
                      AND NOT EXISTS (SELECT 1 FROM {guard} WHERE name = {name})
                     BEGIN SELECT RAISE(ABORT, {message}); END;",
                    table_ident = quote_ident(table),
                    name = quote_literal(table),
                    message = quote_literal(&message),
                );
                conn.execute_batch(&sql)
                    .map_err(|e| sql_error("install guard", &sql, &e))?;
            }
        }
        Ok(())
    }

    fn grant_access(&mut self, table: &str) -> Result<()> {
        let sql = format!(
            "INSERT OR IGNORE INTO {} (name) VALUES (?1)",
            quote_ident(&self.guard_table)
        );
        self.conn
            .lock()
            .execute(&sql, params![table])
            .map_err(|e| sql_error("grant access", &sql, &e))?;
        Ok(())
    }

    fn deny_access(&mut self, table: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE name = ?1", quote_ident(&self.guard_table));
        self.conn
            .lock()
            .execute(&sql, params![table])
            .map_err(|e| sql_error("deny access", &sql, &e))?;
        Ok(())
    }

    fn snapshot(
        &mut self,
        tables: &BTreeSet<String>,
        excluded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Value> {
        let conn = self.conn.lock();
        let mut out = ValueMap::new();
        for table in tables {
            let rows = Self::table_rows(&conn, table, excluded.get(table))?;
            out.insert(Key::Text(table.clone()), rows);
        }
        Ok(Value::Map(out))
    }
}

// ──────────────────── helpers ────────────────────

fn sql_error(context: &'static str, statement: &str, err: &rusqlite::Error) -> FxrError {
    FxrError::Sql {
        context,
        details: format!("{err} (while running `{statement}`)"),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Bytes(bytes.to_vec()),
    }
}

fn from_json(value: &serde_json::Value) -> SqlValue {
    use serde_json::Value as J;
    match value {
        J::Null => SqlValue::Null,
        J::Bool(b) => SqlValue::Integer(i64::from(*b)),
        J::Number(n) => n
            .as_i64()
            .map_or_else(|| SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)), SqlValue::Integer),
        J::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Primary-key values identify a row; tables without one fall back to the
/// row position.
fn row_key(parts: &[Value], position: i64) -> Key {
    match parts {
        [] => Key::Int(position),
        [Value::Int(i)] => Key::Int(*i),
        [single] => Key::Text(single.render()),
        many => Key::Text(
            many.iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join("_"),
        ),
    }
}
