//! Scope machinery: test-tree model, the state contract, per-kind scope stacks
//! and the kind registry.

pub mod context;
pub mod cursor;
pub mod registry;
pub mod scope;
pub mod state;
pub mod tree;
