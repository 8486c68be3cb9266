//! Contract implemented by every fixture kind's accumulated state.

#![allow(missing_docs)]

use std::fmt::Debug;

use crate::core::errors::Result;

/// Mergeable snapshot of declared configuration at one tree level.
///
/// `Clone` is the independent deep copy taken before every merge, so a pushed
/// frame is never mutated after the fact. Folding declarations in order must
/// be deterministic.
pub trait FixtureState: Clone + Debug {
    /// Overlay `other` onto `self`; `other`'s fields override or extend.
    fn merge(&mut self, other: &Self) -> Result<()>;

    fn copy(&self) -> Self {
        self.clone()
    }
}
