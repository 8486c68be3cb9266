//! Backing stores: SQL and key-value handles, the named registry the
//! fixture kinds resolve against, and named callbacks.

#![allow(missing_docs)]

pub mod callbacks;
pub mod key_value;
pub mod sql;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::core::config::DiffConfig;
use crate::core::errors::{FxrError, Result};
use crate::diff::value::Value;

pub use callbacks::CallbackRegistry;
pub use key_value::{KeyValueBackend, KeyValueStore, MemoryKeyValueBackend};
pub use sql::{Dataset, Row, SqlBackend, SqlStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Every registered store, by unique name.
#[derive(Debug, Default)]
pub struct DataStorages {
    sql: IndexMap<String, SqlStore>,
    key_value: IndexMap<String, KeyValueStore>,
    affected: BTreeSet<String>,
}

impl DataStorages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sql(&mut self, store: SqlStore) -> Result<()> {
        self.check_unique(store.name())?;
        self.sql.insert(store.name().to_string(), store);
        Ok(())
    }

    pub fn add_key_value(&mut self, store: KeyValueStore) -> Result<()> {
        self.check_unique(store.name())?;
        self.key_value.insert(store.name().to_string(), store);
        Ok(())
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.sql.contains_key(name) || self.key_value.contains_key(name) {
            return Err(FxrError::InvalidConfig {
                details: format!("storage '{name}' registered twice"),
            });
        }
        Ok(())
    }

    /// Store names in registration order, SQL stores first.
    pub fn names(&self) -> Vec<&str> {
        self.sql
            .keys()
            .chain(self.key_value.keys())
            .map(String::as_str)
            .collect()
    }

    pub fn sql(&self, name: &str) -> Option<&SqlStore> {
        self.sql.get(name)
    }

    pub fn sql_stores(&self) -> impl Iterator<Item = &SqlStore> {
        self.sql.values()
    }

    /// The named SQL store, or the only one when no name is given.
    pub fn resolve_sql(&mut self, name: Option<&str>) -> Result<&mut SqlStore> {
        resolve(&mut self.sql, name, "sql")
    }

    pub fn key_value(&self, name: &str) -> Option<&KeyValueStore> {
        self.key_value.get(name)
    }

    pub fn resolve_key_value(&mut self, name: Option<&str>) -> Result<&mut KeyValueStore> {
        resolve(&mut self.key_value, name, "key-value")
    }

    /// Remember that fixture application changed this store's content.
    pub fn mark_affected(&mut self, name: &str) {
        self.affected.insert(name.to_string());
    }

    pub fn take_affected(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.affected)
    }

    /// Current content of one store, with configured columns excluded.
    pub fn snapshot(&mut self, name: &str, diff: &DiffConfig) -> Result<Value> {
        if let Some(store) = self.sql.get_mut(name) {
            return store.snapshot(&diff.excluded_fields(name));
        }
        if let Some(store) = self.key_value.get(name) {
            return store.snapshot();
        }
        Err(FxrError::UnknownStorage {
            name: name.to_string(),
        })
    }
}

fn resolve<'a, S>(
    stores: &'a mut IndexMap<String, S>,
    name: Option<&str>,
    technology: &str,
) -> Result<&'a mut S> {
    match name {
        Some(name) => stores.get_mut(name).ok_or_else(|| FxrError::UnknownStorage {
            name: name.to_string(),
        }),
        None if stores.len() == 1 => stores
            .get_index_mut(0)
            .map(|(_, store)| store)
            .ok_or_else(|| FxrError::Runtime {
                details: "single store vanished".to_string(),
            }),
        None => Err(FxrError::declaration(
            "storage",
            format!(
                "storage name is required: {} {technology} stores are registered",
                stores.len()
            ),
        )),
    }
}
