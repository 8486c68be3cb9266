//! Declared table configuration and its conversion into [`TableStates`].

#![allow(missing_docs)]

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::errors::{FxrError, Result};
use crate::table::state::{Access, Freshness, Statement, TableStates};

const FIXTURE: &str = "tables";

/// Tables fixture declaration for one SQL store.
///
/// Table lists accept either an array or a comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TableDeclaration {
    /// Store name; may be omitted when exactly one SQL store is registered.
    pub storage: Option<String>,
    #[serde(deserialize_with = "table_list")]
    pub tables_to_change: Vec<String>,
    #[serde(deserialize_with = "table_list")]
    pub tables_to_load: Vec<String>,
    pub load_all_tables: bool,
    pub disable_table_hooks: bool,
    #[serde(deserialize_with = "table_list")]
    pub restrict: Vec<String>,
    #[serde(deserialize_with = "table_list")]
    pub clear: Vec<String>,
    pub sql: Vec<String>,
}

/// What conversion needs to know about the target store.
#[derive(Debug, Clone, Copy)]
pub struct Catalog<'a> {
    pub storage: &'a str,
    pub known: &'a BTreeSet<String>,
    pub dataset_tables: &'a BTreeSet<String>,
}

impl Catalog<'_> {
    /// Canonical table name, matched case-insensitively.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        if let Some(exact) = self.known.get(name) {
            return Some(exact.as_str());
        }
        self.known
            .iter()
            .find(|known| known.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    fn require(&self, name: &str) -> Result<String> {
        self.resolve(name)
            .map(str::to_string)
            .ok_or_else(|| FxrError::UnknownEntity {
                storage: self.storage.to_string(),
                entity: name.to_string(),
            })
    }
}

impl TableDeclaration {
    /// Convert into per-table state fragments. Every statement takes the
    /// next value of `next_seq`.
    pub fn to_table_states(&self, catalog: &Catalog<'_>, next_seq: &mut u64) -> Result<TableStates> {
        if self.disable_table_hooks
            && (!self.tables_to_change.is_empty() || !self.tables_to_load.is_empty() || self.load_all_tables)
        {
            return Err(FxrError::declaration(
                FIXTURE,
                format!(
                    "storage '{}': disable_table_hooks only applies to sql, not to table lists",
                    catalog.storage
                ),
            ));
        }

        let mut states = TableStates::default();
        for name in &self.tables_to_change {
            let entry = states.entry(&catalog.require(name)?);
            entry.access = Access::Allowed;
            entry.data.freshness = Freshness::Cleared;
        }

        let to_load: Vec<String> = if self.load_all_tables {
            catalog.dataset_tables.iter().cloned().collect()
        } else {
            self.tables_to_load.clone()
        };
        for name in &to_load {
            states.entry(&catalog.require(name)?).data.freshness = Freshness::Loaded;
        }
        for name in &self.restrict {
            states.entry(&catalog.require(name)?).access = Access::Restricted;
        }
        for name in &self.clear {
            states.entry(&catalog.require(name)?).data.freshness = Freshness::Cleared;
        }

        let pattern = table_reference_pattern()?;
        for sql in &self.sql {
            *next_seq += 1;
            let statement = Statement::new(sql.trim(), *next_seq);
            let tables: BTreeSet<&str> = referenced_tables(pattern, sql)
                .iter()
                .filter_map(|name| catalog.resolve(name))
                .collect();
            if tables.is_empty() {
                return Err(FxrError::UnknownEntity {
                    storage: catalog.storage.to_string(),
                    entity: format!("no known table referenced by `{}`", statement.sql),
                });
            }
            for table in tables {
                let data = &mut states.entry(table).data;
                if self.disable_table_hooks {
                    data.no_hook_statements.push(statement.clone());
                } else {
                    data.statements.push(statement.clone());
                }
            }
        }
        Ok(states)
    }
}

// ──────────────────── SQL table extraction ────────────────────

static TABLE_REFERENCE: LazyLock<std::result::Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:from|into|update|join|table)\s+(?:if\s+(?:not\s+)?exists\s+)?((?:[\w"`\[\]]+\.)?[\w"`\[\]]+)"#,
    )
});

/// Table references after `FROM`, `INTO`, `UPDATE`, `JOIN` and `TABLE`.
/// Compiled once per process.
pub fn table_reference_pattern() -> Result<&'static Regex> {
    TABLE_REFERENCE.as_ref().map_err(|e| FxrError::Runtime {
        details: format!("table reference pattern: {e}"),
    })
}

/// Candidate table names in statement order, unquoted and without schema.
pub fn referenced_tables(pattern: &Regex, sql: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for captures in pattern.captures_iter(sql) {
        let Some(raw) = captures.get(1) else {
            continue;
        };
        let unqualified = raw.as_str().rsplit('.').next().unwrap_or_default();
        let name: String = unqualified
            .chars()
            .filter(|c| !matches!(c, '"' | '`' | '[' | ']'))
            .collect();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Split comma-separated entries, trim, drop empties and duplicates.
pub fn split_table_list<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out: Vec<String> = Vec::new();
    for part in raw.into_iter().flat_map(|s| s.split(',')) {
        let name = part.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

fn table_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => split_table_list([s.as_str()]),
        OneOrMany::Many(list) => split_table_list(list.iter().map(String::as_str)),
    })
}
