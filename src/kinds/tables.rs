//! Table fixtures for SQL stores: declarations become per-table states, and
//! applying reconciles each store's believed state into an action plan.

#![allow(missing_docs)]

use std::cell::Cell;
use std::collections::BTreeMap;

use crate::core::errors::Result;
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;
use crate::table::declaration::{Catalog, TableDeclaration};
use crate::table::plan::ActionPlan;
use crate::table::state::TableStates;

const NAME: &str = "tables";

/// Declared table states per SQL store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TablesState {
    pub storages: BTreeMap<String, TableStates>,
}

impl FixtureState for TablesState {
    fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, states) in &other.storages {
            self.storages.entry(name.clone()).or_default().merge_from(states);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct TablesFixture {
    /// Statement sequence shared by every conversion in this traversal.
    seq: Cell<u64>,
}

impl Fixture for TablesFixture {
    type Declaration = TableDeclaration;
    type State = TablesState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        2000
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d TableDeclaration> {
        match declaration {
            Declaration::Tables(d) => Some(d),
            _ => None,
        }
    }

    /// Every known table restricted and cleared, carrying its hook.
    fn default_state(&self, ctx: &mut FixtureContext<'_>) -> Result<TablesState> {
        Ok(TablesState {
            storages: ctx
                .storages
                .sql_stores()
                .map(|store| {
                    (
                        store.name().to_string(),
                        TableStates::restricted(store.known_tables(), store.hooks()),
                    )
                })
                .collect(),
        })
    }

    fn convert(
        &self,
        declaration: &TableDeclaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<TablesState> {
        let store = ctx.storages.resolve_sql(declaration.storage.as_deref())?;
        let dataset_tables = store.dataset_tables();
        let catalog = Catalog {
            storage: store.name(),
            known: store.known_tables(),
            dataset_tables: &dataset_tables,
        };
        let mut seq = self.seq.get();
        let states = declaration.to_table_states(&catalog, &mut seq)?;
        self.seq.set(seq);
        Ok(TablesState {
            storages: BTreeMap::from([(store.name().to_string(), states)]),
        })
    }

    /// Reconciles against what each store believes, not against `old`: the
    /// believed state also sees no-hook writes and post-test dirtiness.
    fn apply(
        &self,
        _old: &TablesState,
        new: &TablesState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        let check_dirty = node.check_dirty(ctx.config.reconcile.check_dirty_on_parts);
        for (name, target) in &new.storages {
            let mut plan = ActionPlan::default();
            let store = ctx.storages.resolve_sql(Some(name))?;
            store.believed_mut().reconcile(target, &mut plan, check_dirty);
            let changed = store.apply_plan(&plan, ctx.callbacks, &ctx.config.sql)?;
            if !changed {
                continue;
            }
            if !plan.rewritten_tables().is_empty()
                || !plan.statements.is_empty()
                || !plan.no_hook_statements.is_empty()
            {
                ctx.storages.mark_affected(name);
            }
            ctx.record(JournalEvent::PlanApplied {
                node: node.path.clone(),
                storage: name.clone(),
                allowed: plan.tables_to_allow.iter().cloned().collect(),
                denied: plan.tables_to_deny.iter().cloned().collect(),
                cleared: plan.tables_to_clear.iter().cloned().collect(),
                loaded: plan.tables_to_load.iter().cloned().collect(),
                statements: plan.statements.len() + plan.no_hook_statements.len(),
                hooks: plan.hooks_to_fire.len(),
            });
        }
        Ok(())
    }
}
