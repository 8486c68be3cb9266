#![forbid(unsafe_code)]

//! Fixture reconciler: declarative fixture state for integration tests.
//!
//! A test tree (container → case → part) carries typed fixture declarations.
//! As the tree is traversed, every fixture kind folds the declarations that
//! apply to the current node into a scoped state, and moves the backing stores
//! from what they are believed to hold to the new state with as few actions as
//! possible:
//! 1. **Scope stacks** merge declarations per tree level and decide what to apply
//! 2. **Table fixtures** turn SQL table states into minimal action plans
//! 3. **Structural diffs** describe what each test changed in the stores
//!
//! # Library usage
//!
//! ```rust,no_run
//! use fixture_reconciler::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use fixture_reconciler::core::config::Config;
//! use fixture_reconciler::diff::engine::DiffEngine;
//! ```

pub mod prelude;

pub mod core;
pub mod diff;
pub mod driver;
pub mod fixture;
pub mod kinds;
pub mod logger;
pub mod storage;
pub mod table;
