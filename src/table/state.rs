//! Table-level fixture state: access control, data freshness and the history
//! of statements known to have run against each table.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::fixture::state::FixtureState;
use crate::table::overlap::overlap_len_by;
use crate::table::plan::ActionPlan;

// ──────────────────── axes ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Unset,
    Allowed,
    Restricted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    #[default]
    Unset,
    Loaded,
    Cleared,
}

impl Freshness {
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Unset)
    }
}

/// One declared SQL statement. `seq` orders statements across tables and
/// identifies a statement that touches several tables; comparisons between
/// histories look at the text only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    pub seq: u64,
}

impl Statement {
    pub fn new(sql: impl Into<String>, seq: u64) -> Self {
        Self {
            sql: sql.into(),
            seq,
        }
    }

    fn same_sql(a: &Self, b: &Self) -> bool {
        a.sql == b.sql
    }
}

/// Callback fired when a table's content is rebuilt or written by a
/// declared statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HookRef {
    pub table: String,
    pub callback: String,
}

impl fmt::Display for HookRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}→{}", self.table, self.callback)
    }
}

// ──────────────────── data state ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DataState {
    pub freshness: Freshness,
    pub statements: Vec<Statement>,
    pub no_hook_statements: Vec<Statement>,
    pub hook: Option<HookRef>,
    /// Content may differ from what the history describes.
    pub dirty: bool,
}

impl DataState {
    /// Fold a declared fragment into accumulated state.
    pub fn merge(&mut self, other: &Self) {
        if (other.freshness.is_set() && other.freshness != self.freshness) || self.dirty {
            if other.freshness.is_set() {
                self.freshness = other.freshness;
            }
            self.statements.clear();
            self.no_hook_statements.clear();
        }
        if other.hook.is_some() {
            self.hook.clone_from(&other.hook);
        }
        self.absorb_statements(other);
        self.dirty = false;
    }

    /// Move believed state (`self`) to `target`, recording every action
    /// needed into `plan`. Dirtiness is read from the believed side only.
    pub fn reconcile(&mut self, target: &Self, table: &str, plan: &mut ActionPlan, check_dirty: bool) {
        let freshness_changed = target.freshness.is_set() && target.freshness != self.freshness;
        if freshness_changed || (check_dirty && self.dirty) {
            if target.freshness.is_set() {
                self.freshness = target.freshness;
            }
            self.statements.clear();
            self.no_hook_statements.clear();
            if let Some(hook) = &self.hook {
                plan.fire_hook(hook.clone());
            }
            plan.tables_to_restart_identity.insert(table.to_string());
            match self.freshness {
                Freshness::Loaded => {
                    plan.tables_to_load.insert(table.to_string());
                }
                Freshness::Cleared => {
                    plan.tables_to_clear.insert(table.to_string());
                }
                Freshness::Unset => {}
            }
        }

        let (hooked, no_hook) = self.absorb_statements(target);
        for statement in hooked {
            plan.enqueue_statement(statement);
            if let Some(hook) = &self.hook {
                plan.fire_hook(hook.clone());
            }
        }
        for statement in no_hook {
            plan.enqueue_no_hook(statement);
        }
        if check_dirty {
            self.dirty = false;
        }
    }

    /// Append `other`'s statements past the overlap with the history and
    /// return the appended ones, hooked and no-hook.
    fn absorb_statements<'o>(&mut self, other: &'o Self) -> (&'o [Statement], &'o [Statement]) {
        if !other.statements.is_empty() {
            // Once a declared statement touches the table, earlier no-hook
            // statements count as part of its regular history.
            let promoted = std::mem::take(&mut self.no_hook_statements);
            self.statements.extend(promoted);
        }

        let skip = overlap_len_by(&self.statements, &other.statements, Statement::same_sql);
        let hooked = &other.statements[skip..];
        self.statements.extend_from_slice(hooked);

        let skip = overlap_len_by(
            &self.no_hook_statements,
            &other.no_hook_statements,
            Statement::same_sql,
        );
        let no_hook = &other.no_hook_statements[skip..];
        self.no_hook_statements.extend_from_slice(no_hook);
        (hooked, no_hook)
    }
}

// ──────────────────── table state ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableState {
    pub access: Access,
    pub data: DataState,
}

impl TableState {
    /// Restricted and cleared, the state of every table before any fixture ran.
    pub fn restricted(hook: Option<HookRef>) -> Self {
        Self {
            access: Access::Restricted,
            data: DataState {
                freshness: Freshness::Cleared,
                hook,
                dirty: true,
                ..DataState::default()
            },
        }
    }

    pub fn merge(&mut self, other: &Self) {
        if other.access != Access::Unset {
            self.access = other.access;
        }
        self.data.merge(&other.data);
    }

    pub fn reconcile(&mut self, target: &Self, table: &str, plan: &mut ActionPlan, check_dirty: bool) {
        if target.access != Access::Unset && target.access != self.access {
            match target.access {
                Access::Allowed => {
                    plan.tables_to_allow.insert(table.to_string());
                }
                Access::Restricted => {
                    plan.tables_to_deny.insert(table.to_string());
                }
                Access::Unset => {}
            }
            self.access = target.access;
        }
        self.data.reconcile(&target.data, table, plan, check_dirty);
    }
}

// ──────────────────── per-store map ────────────────────

/// One entry per table ever referenced in a store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableStates {
    tables: BTreeMap<String, TableState>,
}

impl TableStates {
    /// Every table restricted, cleared and dirty, with its registered hook.
    pub fn restricted<'a, I>(tables: I, hooks: &BTreeMap<String, HookRef>) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        Self {
            tables: tables
                .into_iter()
                .map(|name| (name.clone(), TableState::restricted(hooks.get(name).cloned())))
                .collect(),
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableState> {
        self.tables.get(table)
    }

    /// Entry for `table`, created empty when first referenced.
    pub fn entry(&mut self, table: &str) -> &mut TableState {
        self.tables.entry(table.to_string()).or_default()
    }

    pub fn insert(&mut self, table: impl Into<String>, state: TableState) {
        self.tables.insert(table.into(), state);
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TableState)> {
        self.tables.iter()
    }

    pub fn tables(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Fold declared fragments table by table.
    pub fn merge_from(&mut self, other: &Self) {
        for (table, state) in &other.tables {
            self.entry(table).merge(state);
        }
    }

    /// Move believed state (`self`) to `target`. Tables the target does not
    /// mention are moved back to restricted and cleared.
    pub fn reconcile(&mut self, target: &Self, plan: &mut ActionPlan, check_dirty: bool) {
        let fallback = TableState {
            access: Access::Restricted,
            data: DataState {
                freshness: Freshness::Cleared,
                ..DataState::default()
            },
        };
        for (table, wanted) in &target.tables {
            self.entry(table).reconcile(wanted, table, plan, check_dirty);
        }
        for (table, believed) in &mut self.tables {
            if !target.tables.contains_key(table) {
                believed.reconcile(&fallback, table, plan, check_dirty);
            }
        }
    }

    /// Mark tables whose content changed outside declared fixtures.
    pub fn mark_dirty<'a, I>(&mut self, tables: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for table in tables {
            if let Some(state) = self.tables.get_mut(table) {
                state.data.dirty = true;
            }
        }
    }

    pub fn dirty_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, s)| s.data.dirty)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Attach a hook to a table that may not have been referenced yet.
    pub fn set_hook(&mut self, hook: HookRef) {
        let table = hook.table.clone();
        self.entry(&table).data.hook = Some(hook);
    }
}

impl FixtureState for TableStates {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.merge_from(other);
        Ok(())
    }
}
