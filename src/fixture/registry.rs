//! Explicit registry of fixture kinds, ordered by application priority.

#![allow(missing_docs)]

use crate::core::errors::{FxrError, Result};
use crate::fixture::scope::{Fixture, ScopeDriver, ScopeStack};
use crate::kinds::callbacks::CallbacksFixture;
use crate::kinds::date_time::DateTimeFixture;
use crate::kinds::key_value::KeyValueFixture;
use crate::kinds::no_hook_sql::NoHookSqlFixture;
use crate::kinds::storage_setup::StorageSetupFixture;
use crate::kinds::tables::TablesFixture;

/// Scope stacks for every registered kind, kept sorted by `order()`.
#[derive(Default)]
pub struct FixtureRegistry {
    drivers: Vec<Box<dyn ScopeDriver>>,
}

impl std::fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureRegistry")
            .field("kinds", &self.names())
            .finish()
    }
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the six built-in kinds.
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self::new();
        registry.insert(Box::new(ScopeStack::new(DateTimeFixture)));
        registry.insert(Box::new(ScopeStack::new(StorageSetupFixture)));
        registry.insert(Box::new(ScopeStack::new(TablesFixture::default())));
        registry.insert(Box::new(ScopeStack::new(KeyValueFixture)));
        registry.insert(Box::new(ScopeStack::new(CallbacksFixture)));
        registry.insert(Box::new(ScopeStack::new(NoHookSqlFixture)));
        registry
    }

    /// Add a kind. Names must be unique; equal orders keep registration order.
    pub fn register<F>(&mut self, fixture: F) -> Result<()>
    where
        F: Fixture + 'static,
    {
        if self.drivers.iter().any(|d| d.name() == fixture.name()) {
            return Err(FxrError::InvalidConfig {
                details: format!("fixture kind '{}' registered twice", fixture.name()),
            });
        }
        self.insert(Box::new(ScopeStack::new(fixture)));
        Ok(())
    }

    fn insert(&mut self, driver: Box<dyn ScopeDriver>) {
        let at = self.drivers.partition_point(|d| d.order() <= driver.order());
        self.drivers.insert(at, driver);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.drivers.iter().map(|d| d.name()).collect()
    }

    pub fn drivers_mut(&mut self) -> &mut [Box<dyn ScopeDriver>] {
        &mut self.drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn reset(&mut self) {
        for driver in &mut self.drivers {
            driver.reset();
        }
    }
}
