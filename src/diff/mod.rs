//! Structural diffing of nested values for before/after test assertions.

pub mod container;
pub mod engine;
pub mod value;

pub use container::{ChangeEntry, ChangeKind, ChangeSet, Delta, LevelLayout, RenderType};
pub use engine::DiffEngine;
pub use value::{Key, Record, RecordValue, ToValue, Value};
