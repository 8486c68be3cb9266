//! SQL store handle: backend adapter, believed table states, dataset, hooks
//! and the ordered application of an [`ActionPlan`].

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use indexmap::IndexMap;

use crate::core::config::SqlConfig;
use crate::core::errors::{FxrError, Result};
use crate::diff::value::Value;
use crate::storage::callbacks::CallbackRegistry;
use crate::table::plan::ActionPlan;
use crate::table::state::{HookRef, TableState, TableStates};

/// One dataset row: column → value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Declared rows per table.
pub type Dataset = IndexMap<String, Vec<Row>>;

/// Storage-technology adapter. Every write issued through it is an engine
/// write and must bypass the access guard.
pub trait SqlBackend {
    /// User tables, excluding the backend's own bookkeeping tables.
    fn known_tables(&mut self) -> Result<BTreeSet<String>>;

    /// Run one statement or script.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Insert rows into a table that was just cleared.
    fn load_dataset(&mut self, table: &str, rows: &[Row]) -> Result<()>;

    fn clear_tables(&mut self, tables: &BTreeSet<String>) -> Result<()>;

    fn restart_identity(&mut self, tables: &BTreeSet<String>) -> Result<()>;

    /// Reject writes to `tables` unless access was granted.
    fn install_guard(&mut self, tables: &BTreeSet<String>) -> Result<()>;

    fn grant_access(&mut self, table: &str) -> Result<()>;

    fn deny_access(&mut self, table: &str) -> Result<()>;

    /// Table → row key → column → value, without the excluded columns.
    fn snapshot(
        &mut self,
        tables: &BTreeSet<String>,
        excluded: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Value>;
}

/// Read a dataset file: a JSON object mapping table names to row arrays.
pub fn load_dataset_file(path: &Path) -> Result<Dataset> {
    let raw = fs::read_to_string(path).map_err(|e| FxrError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| FxrError::Dataset {
        storage: path.display().to_string(),
        details: e.to_string(),
    })
}

pub struct SqlStore {
    name: String,
    backend: Box<dyn SqlBackend>,
    known: BTreeSet<String>,
    believed: TableStates,
    dataset: Dataset,
    hooks: BTreeMap<String, HookRef>,
    allowed: BTreeSet<String>,
}

impl std::fmt::Debug for SqlStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlStore")
            .field("name", &self.name)
            .field("known", &self.known)
            .field("allowed", &self.allowed)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl SqlStore {
    /// Wrap a backend: discover its tables, guard all of them and start from
    /// the all-restricted believed state.
    pub fn open(name: impl Into<String>, backend: impl SqlBackend + 'static) -> Result<Self> {
        let mut backend: Box<dyn SqlBackend> = Box::new(backend);
        let known = backend.known_tables()?;
        backend.install_guard(&known)?;
        let believed = TableStates::restricted(&known, &BTreeMap::new());
        Ok(Self {
            name: name.into(),
            backend,
            known,
            believed,
            dataset: Dataset::new(),
            hooks: BTreeMap::new(),
            allowed: BTreeSet::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn known_tables(&self) -> &BTreeSet<String> {
        &self.known
    }

    /// Tables the installed dataset has rows for.
    pub fn dataset_tables(&self) -> BTreeSet<String> {
        self.dataset.keys().cloned().collect()
    }

    pub const fn hooks(&self) -> &BTreeMap<String, HookRef> {
        &self.hooks
    }

    pub const fn allowed_tables(&self) -> &BTreeSet<String> {
        &self.allowed
    }

    /// What the engine believes the tables currently hold.
    pub const fn believed(&self) -> &TableStates {
        &self.believed
    }

    pub fn believed_mut(&mut self) -> &mut TableStates {
        &mut self.believed
    }

    /// Run statements as the engine, bypassing the guard.
    pub fn execute<S: AsRef<str>>(&mut self, statements: &[S]) -> Result<()> {
        for sql in statements {
            self.backend.execute(sql.as_ref())?;
        }
        Ok(())
    }

    /// Re-read the table list. New tables are guarded and join the believed
    /// state as restricted; returns them.
    pub fn refresh_tables(&mut self) -> Result<BTreeSet<String>> {
        let current = self.backend.known_tables()?;
        let added: BTreeSet<String> = current.difference(&self.known).cloned().collect();
        if !added.is_empty() {
            self.backend.install_guard(&added)?;
            for table in &added {
                self.believed
                    .insert(table.clone(), TableState::restricted(self.hooks.get(table).cloned()));
            }
        }
        self.known = current;
        Ok(added)
    }

    /// Replace the dataset used by `tables_to_load` and `load_all_tables`.
    pub fn install_dataset(&mut self, dataset: Dataset) -> Result<()> {
        if let Some(unknown) = dataset.keys().find(|t| !self.known.contains(*t)) {
            return Err(FxrError::Dataset {
                storage: self.name.clone(),
                details: format!("dataset references unknown table '{unknown}'"),
            });
        }
        self.dataset = dataset;
        Ok(())
    }

    /// Register table hooks; each one replaces any earlier hook for its table.
    pub fn install_hooks<'a, I>(&mut self, hooks: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a HookRef>,
    {
        for hook in hooks {
            if !self.known.contains(&hook.table) {
                return Err(FxrError::UnknownEntity {
                    storage: self.name.clone(),
                    entity: hook.table.clone(),
                });
            }
            self.hooks.insert(hook.table.clone(), hook.clone());
            self.believed.set_hook(hook.clone());
        }
        Ok(())
    }

    /// Execute a plan in the fixed order: deny, allow, restart identity,
    /// clear, load, hooked statements, hooks, no-hook statements.
    /// Returns whether anything was sent to the backend.
    pub fn apply_plan(
        &mut self,
        plan: &ActionPlan,
        callbacks: &CallbackRegistry,
        config: &SqlConfig,
    ) -> Result<bool> {
        if plan.is_empty() {
            return Ok(false);
        }

        for table in &plan.tables_to_deny {
            self.backend.deny_access(table)?;
            self.allowed.remove(table);
        }
        for table in &plan.tables_to_allow {
            self.backend.grant_access(table)?;
            self.allowed.insert(table.clone());
        }

        if config.restart_identity && !plan.tables_to_restart_identity.is_empty() {
            self.backend.restart_identity(&plan.tables_to_restart_identity)?;
        }

        let rewritten: BTreeSet<String> = plan
            .rewritten_tables()
            .into_iter()
            .map(str::to_string)
            .collect();
        if !rewritten.is_empty() {
            self.backend.clear_tables(&rewritten)?;
        }
        for table in &plan.tables_to_load {
            let rows = self.dataset.get(table).ok_or_else(|| FxrError::Dataset {
                storage: self.name.clone(),
                details: format!("no dataset rows declared for table '{table}'"),
            })?;
            self.backend.load_dataset(table, rows)?;
        }

        for sql in plan.statement_sqls() {
            self.backend.execute(sql)?;
        }
        for hook in &plan.hooks_to_fire {
            callbacks.invoke(&hook.callback)?;
        }
        for sql in plan.no_hook_sqls() {
            self.backend.execute(sql)?;
        }
        Ok(true)
    }

    pub fn snapshot(&mut self, excluded: &BTreeMap<String, BTreeSet<String>>) -> Result<Value> {
        self.backend.snapshot(&self.known, excluded)
    }
}
