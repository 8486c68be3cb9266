//! Invoke named callbacks when a node is entered.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;

const NAME: &str = "callbacks";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbacksDeclaration {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallbacksState {
    pub names: Vec<String>,
}

impl FixtureState for CallbacksState {
    fn merge(&mut self, other: &Self) -> Result<()> {
        self.names.extend(other.names.iter().cloned());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallbacksFixture;

impl Fixture for CallbacksFixture {
    type Declaration = CallbacksDeclaration;
    type State = CallbacksState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        10_000
    }

    fn save_state(&self) -> bool {
        false
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d CallbacksDeclaration> {
        match declaration {
            Declaration::Callbacks(d) => Some(d),
            _ => None,
        }
    }

    fn default_state(&self, _ctx: &mut FixtureContext<'_>) -> Result<CallbacksState> {
        Ok(CallbacksState::default())
    }

    fn convert(
        &self,
        declaration: &CallbacksDeclaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<CallbacksState> {
        for name in &declaration.names {
            ctx.callbacks.require(name)?;
        }
        Ok(CallbacksState {
            names: declaration.names.clone(),
        })
    }

    fn apply(
        &self,
        _old: &CallbacksState,
        new: &CallbacksState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        for name in &new.names {
            ctx.callbacks.invoke(name)?;
            for store in ctx.callbacks.touched_stores(name) {
                ctx.storages.mark_affected(store);
            }
        }
        if !new.names.is_empty() {
            ctx.record(JournalEvent::FixtureApplied {
                node: node.path.clone(),
                fixture: NAME.to_string(),
                details: new.names.join(", "),
            });
        }
        Ok(())
    }
}
