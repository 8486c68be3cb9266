//! SQL table fixture specialization: per-table state, overlap compression,
//! declaration conversion and action plans.

pub mod declaration;
pub mod overlap;
pub mod plan;
pub mod state;

pub use declaration::TableDeclaration;
pub use plan::ActionPlan;
pub use state::{Access, DataState, Freshness, HookRef, Statement, TableState, TableStates};
