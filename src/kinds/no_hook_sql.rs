//! Raw SQL run outside the table fixtures: no hooks fire, and every table the
//! statements touch is marked dirty in the store's believed state.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;
use crate::table::declaration::{referenced_tables, table_reference_pattern};

const NAME: &str = "no_hook_sql";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NoHookSqlDeclaration {
    pub storage: Option<String>,
    pub sql: Vec<String>,
}

/// Statements with the store they run against, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NoHookSqlState {
    pub statements: Vec<(String, String)>,
}

impl FixtureState for NoHookSqlState {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.statements.extend(other.statements.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHookSqlFixture;

impl Fixture for NoHookSqlFixture {
    type Declaration = NoHookSqlDeclaration;
    type State = NoHookSqlState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        11_000
    }

    fn save_state(&self) -> bool {
        false
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d NoHookSqlDeclaration> {
        match declaration {
            Declaration::NoHookSql(d) => Some(d),
            _ => None,
        }
    }

    fn default_state(&self, _ctx: &mut FixtureContext<'_>) -> Result<NoHookSqlState> {
        Ok(NoHookSqlState::default())
    }

    fn convert(
        &self,
        declaration: &NoHookSqlDeclaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<NoHookSqlState> {
        let storage = ctx
            .storages
            .resolve_sql(declaration.storage.as_deref())?
            .name()
            .to_string();
        Ok(NoHookSqlState {
            statements: declaration
                .sql
                .iter()
                .map(|sql| (storage.clone(), sql.clone()))
                .collect(),
        })
    }

    /// References to tables the store does not know are ignored.
    fn apply(
        &self,
        _old: &NoHookSqlState,
        new: &NoHookSqlState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        if new.statements.is_empty() {
            return Ok(());
        }
        let pattern = table_reference_pattern()?;
        for (storage, sql) in &new.statements {
            let store = ctx.storages.resolve_sql(Some(storage))?;
            store.execute(&[sql])?;
            let touched: Vec<String> = referenced_tables(pattern, sql)
                .iter()
                .filter_map(|name| {
                    store
                        .known_tables()
                        .iter()
                        .find(|known| known.eq_ignore_ascii_case(name))
                        .cloned()
                })
                .collect();
            store.believed_mut().mark_dirty(touched.iter().map(String::as_str));
            ctx.storages.mark_affected(storage);
            ctx.record(JournalEvent::FixtureApplied {
                node: node.path.clone(),
                fixture: NAME.to_string(),
                details: format!("storage '{storage}': dirtied [{}]", touched.join(", ")),
            });
        }
        Ok(())
    }
}
