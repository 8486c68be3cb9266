//! Action plan: the store operations needed to move from the believed table
//! states to newly declared ones.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};

use indexmap::IndexSet;
use serde::Serialize;

use crate::table::state::{HookRef, Statement};

/// Collected actions, applied by the store in a fixed order: deny, allow,
/// restart identity, clear, load, statements and their hooks, then
/// no-hook statements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub tables_to_allow: BTreeSet<String>,
    pub tables_to_deny: BTreeSet<String>,
    pub tables_to_clear: BTreeSet<String>,
    pub tables_to_restart_identity: BTreeSet<String>,
    pub tables_to_load: BTreeSet<String>,
    /// Keyed by statement sequence: execution order, and one run per
    /// statement even when several tables reference it.
    pub statements: BTreeMap<u64, String>,
    pub no_hook_statements: BTreeMap<u64, String>,
    pub hooks_to_fire: IndexSet<HookRef>,
}

impl ActionPlan {
    pub fn enqueue_statement(&mut self, statement: &Statement) {
        self.statements
            .entry(statement.seq)
            .or_insert_with(|| statement.sql.clone());
    }

    pub fn enqueue_no_hook(&mut self, statement: &Statement) {
        self.no_hook_statements
            .entry(statement.seq)
            .or_insert_with(|| statement.sql.clone());
    }

    /// Queue a hook; a hook already queued keeps its position.
    pub fn fire_hook(&mut self, hook: HookRef) {
        self.hooks_to_fire.insert(hook);
    }

    pub fn is_empty(&self) -> bool {
        self.tables_to_allow.is_empty()
            && self.tables_to_deny.is_empty()
            && self.tables_to_clear.is_empty()
            && self.tables_to_restart_identity.is_empty()
            && self.tables_to_load.is_empty()
            && self.statements.is_empty()
            && self.no_hook_statements.is_empty()
            && self.hooks_to_fire.is_empty()
    }

    /// Hooked statements in execution order.
    pub fn statement_sqls(&self) -> Vec<&str> {
        self.statements.values().map(String::as_str).collect()
    }

    pub fn no_hook_sqls(&self) -> Vec<&str> {
        self.no_hook_statements.values().map(String::as_str).collect()
    }

    /// Tables whose content this plan rewrites.
    pub fn rewritten_tables(&self) -> BTreeSet<&str> {
        self.tables_to_clear
            .iter()
            .chain(&self.tables_to_load)
            .map(String::as_str)
            .collect()
    }
}
