//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use fixture_reconciler::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, DirtyPolicy};
pub use crate::core::errors::{FxrError, Result};

// Diff
pub use crate::diff::{ChangeKind, ChangeSet, Delta, DiffEngine, Key, Record, ToValue, Value};

// Fixture scope machinery
pub use crate::fixture::registry::FixtureRegistry;
pub use crate::fixture::scope::{Fixture, ScopeStack};
pub use crate::fixture::state::FixtureState;
pub use crate::fixture::tree::{ApplyTo, Declaration, Init, NodeInfo, NodeKind, TestNode, TestTree};

// Tables
pub use crate::table::{ActionPlan, Access, Freshness, TableDeclaration, TableStates};

// Kinds
pub use crate::kinds::callbacks::CallbacksDeclaration;
pub use crate::kinds::date_time::{DateTimeDeclaration, TestClock};
pub use crate::kinds::key_value::KeyValueDeclaration;
pub use crate::kinds::no_hook_sql::NoHookSqlDeclaration;
pub use crate::kinds::storage_setup::{StorageSetupDeclaration, TableHookDeclaration};

// Stores
#[cfg(feature = "sqlite")]
pub use crate::storage::SqliteBackend;
pub use crate::storage::{
    CallbackRegistry, DataStorages, KeyValueBackend, KeyValueStore, MemoryKeyValueBackend,
    SqlBackend, SqlStore,
};

// Driver
pub use crate::driver::{LeafContext, Reconciler, TestOutcome, TestStatus};
