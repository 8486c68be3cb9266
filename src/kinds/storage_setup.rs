//! Per SQL store setup: schema statements, the dataset used for table loads,
//! and table hooks.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FxrError, Result};
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;
use crate::storage::sql::{Dataset, load_dataset_file};
use crate::table::state::HookRef;

const NAME: &str = "storage_setup";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableHookDeclaration {
    pub table: String,
    pub callback: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSetupDeclaration {
    pub storage: Option<String>,
    /// Scripts run before the inline statements.
    pub sql_files: Vec<PathBuf>,
    pub sql: Vec<String>,
    /// JSON files mapping table names to row arrays, read in order.
    pub dataset_files: Vec<PathBuf>,
    pub dataset: Dataset,
    pub hooks: Vec<TableHookDeclaration>,
}

/// Resolved setup for one store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetupData {
    pub sql: Vec<String>,
    pub dataset: Dataset,
    pub hooks: Vec<HookRef>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageSetupState {
    pub storages: BTreeMap<String, SetupData>,
}

impl FixtureState for StorageSetupState {
    /// A later setup for the same store replaces the earlier one.
    fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, data) in &other.storages {
            self.storages.insert(name.clone(), data.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StorageSetupFixture;

impl StorageSetupFixture {
    fn read_sql(declaration: &StorageSetupDeclaration) -> Result<Vec<String>> {
        let mut sql = Vec::with_capacity(declaration.sql_files.len() + declaration.sql.len());
        for path in &declaration.sql_files {
            sql.push(fs::read_to_string(path).map_err(|e| FxrError::io(path, e))?);
        }
        sql.extend(declaration.sql.iter().cloned());
        Ok(sql)
    }

    fn read_dataset(declaration: &StorageSetupDeclaration) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        let files = declaration
            .dataset_files
            .iter()
            .map(|path| load_dataset_file(path))
            .collect::<Result<Vec<_>>>()?;
        for part in files.into_iter().chain(std::iter::once(declaration.dataset.clone())) {
            for (table, rows) in part {
                dataset.entry(table).or_default().extend(rows);
            }
        }
        Ok(dataset)
    }

    fn read_hooks(
        declaration: &StorageSetupDeclaration,
        ctx: &FixtureContext<'_>,
    ) -> Result<Vec<HookRef>> {
        let mut by_table: BTreeMap<&str, &str> = BTreeMap::new();
        for hook in &declaration.hooks {
            ctx.callbacks.require(&hook.callback)?;
            match by_table.insert(&hook.table, &hook.callback) {
                Some(previous) if previous != hook.callback => {
                    return Err(FxrError::declaration(
                        NAME,
                        format!(
                            "table '{}' has two hooks: '{previous}' and '{}'",
                            hook.table, hook.callback
                        ),
                    ));
                }
                _ => {}
            }
        }
        Ok(by_table
            .into_iter()
            .map(|(table, callback)| HookRef {
                table: table.to_string(),
                callback: callback.to_string(),
            })
            .collect())
    }
}

impl Fixture for StorageSetupFixture {
    type Declaration = StorageSetupDeclaration;
    type State = StorageSetupState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        1000
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d StorageSetupDeclaration> {
        match declaration {
            Declaration::StorageSetup(d) => Some(d),
            _ => None,
        }
    }

    fn default_state(&self, _ctx: &mut FixtureContext<'_>) -> Result<StorageSetupState> {
        Ok(StorageSetupState::default())
    }

    fn convert(
        &self,
        declaration: &StorageSetupDeclaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<StorageSetupState> {
        let storage = ctx
            .storages
            .resolve_sql(declaration.storage.as_deref())?
            .name()
            .to_string();
        let data = SetupData {
            sql: Self::read_sql(declaration)?,
            dataset: Self::read_dataset(declaration)?,
            hooks: Self::read_hooks(declaration, ctx)?,
        };
        Ok(StorageSetupState {
            storages: BTreeMap::from([(storage, data)]),
        })
    }

    /// Stores whose setup is unchanged from `old` are left alone; setup SQL
    /// is never undone.
    fn apply(
        &self,
        old: &StorageSetupState,
        new: &StorageSetupState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        for (name, data) in &new.storages {
            if old.storages.get(name) == Some(data) {
                continue;
            }
            let store = ctx.storages.resolve_sql(Some(name))?;
            store.execute(&data.sql)?;
            let added = store.refresh_tables()?;
            store.install_dataset(data.dataset.clone())?;
            store.install_hooks(&data.hooks)?;
            if !data.sql.is_empty() {
                ctx.storages.mark_affected(name);
            }
            ctx.record(JournalEvent::FixtureApplied {
                node: node.path.clone(),
                fixture: NAME.to_string(),
                details: format!(
                    "storage '{name}': {} statements, {} dataset tables, {} hooks, {} new tables",
                    data.sql.len(),
                    data.dataset.len(),
                    data.hooks.len(),
                    added.len()
                ),
            });
        }
        Ok(())
    }
}
