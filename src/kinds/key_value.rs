//! Key-value fixtures: optional wipe plus entries, per store.

#![allow(missing_docs)]

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::fixture::context::FixtureContext;
use crate::fixture::scope::Fixture;
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{Declaration, NodeInfo};
use crate::logger::journal::JournalEvent;

const NAME: &str = "key_value";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyValueDeclaration {
    pub storage: Option<String>,
    pub clear: bool,
    pub entries: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyValueStoreState {
    pub clear: bool,
    pub entries: IndexMap<String, serde_json::Value>,
}

impl KeyValueStoreState {
    fn merge(&mut self, other: &Self) {
        if other.clear {
            self.clear = true;
            self.entries.clear();
        }
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyValueState {
    pub storages: BTreeMap<String, KeyValueStoreState>,
}

impl FixtureState for KeyValueState {
    fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, state) in &other.storages {
            self.storages.entry(name.clone()).or_default().merge(state);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValueFixture;

impl Fixture for KeyValueFixture {
    type Declaration = KeyValueDeclaration;
    type State = KeyValueState;

    fn name(&self) -> &'static str {
        NAME
    }

    fn order(&self) -> i32 {
        3000
    }

    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d KeyValueDeclaration> {
        match declaration {
            Declaration::KeyValue(d) => Some(d),
            _ => None,
        }
    }

    fn default_state(&self, _ctx: &mut FixtureContext<'_>) -> Result<KeyValueState> {
        Ok(KeyValueState::default())
    }

    fn convert(
        &self,
        declaration: &KeyValueDeclaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<KeyValueState> {
        let name = ctx
            .storages
            .resolve_key_value(declaration.storage.as_deref())?
            .name()
            .to_string();
        Ok(KeyValueState {
            storages: BTreeMap::from([(
                name,
                KeyValueStoreState {
                    clear: declaration.clear,
                    entries: declaration.entries.clone(),
                },
            )]),
        })
    }

    /// Every declared store is rewritten, even when `old` holds the same
    /// declaration: the previous test may have changed the entries since.
    fn apply(
        &self,
        _old: &KeyValueState,
        new: &KeyValueState,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        for (name, state) in &new.storages {
            if !state.clear && state.entries.is_empty() {
                continue;
            }
            let store = ctx.storages.resolve_key_value(Some(name))?;
            if state.clear {
                store.clear()?;
            }
            store.put_all(&state.entries)?;
            ctx.storages.mark_affected(name);
            ctx.record(JournalEvent::FixtureApplied {
                node: node.path.clone(),
                fixture: NAME.to_string(),
                details: format!(
                    "storage '{name}': clear={}, {} entries",
                    state.clear,
                    state.entries.len()
                ),
            });
        }
        Ok(())
    }
}
