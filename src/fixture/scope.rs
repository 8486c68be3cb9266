//! Per-kind scope stack driven by test-tree traversal.
//!
//! Each fixture kind gets one [`ScopeStack`]. Entering a node collects the
//! declarations that apply to it: the node's own `Default` declarations plus
//! scoped declarations (`apply_to` = container/case/part/all) pushed by
//! enclosing nodes. Containers only collect; the first leaf below them folds
//! every pending segment into a fresh frame per node, and applies the new top
//! when it differs from the last applied state.
//!
//! Later sibling Parts build on the last *applied* state instead of the raw
//! top, so side effects of the previous Part stay visible. A later Part with
//! nothing of its own to merge applies nothing at all.

#![allow(missing_docs)]

use std::fmt::Debug;
use std::rc::Rc;

use crate::core::errors::{FxrError, Result};
use crate::fixture::context::FixtureContext;
use crate::fixture::cursor::{CursorStack, SegmentedList};
use crate::fixture::state::FixtureState;
use crate::fixture::tree::{ApplyTo, Declaration, Init, NodeId, NodeInfo, NodeKind};

// ──────────────────── fixture kind contract ────────────────────

/// A concrete fixture kind.
pub trait Fixture {
    type Declaration: Clone + Debug;
    type State: FixtureState;

    /// Stable kind name used in errors and the journal.
    fn name(&self) -> &'static str;

    /// Application order; lower runs first.
    fn order(&self) -> i32;

    /// Keep state across sibling boundaries. Kinds that do not save state are
    /// collapsed back to their default frame right after applying.
    fn save_state(&self) -> bool {
        true
    }

    /// Apply on container nodes too, instead of waiting for a leaf.
    fn apply_immediately(&self) -> bool {
        !self.save_state()
    }

    /// Pick this kind's declarations out of the shared declaration enum.
    fn select<'d>(&self, declaration: &'d Declaration) -> Option<&'d Self::Declaration>;

    /// Identity state pushed before the first merge.
    fn default_state(&self, ctx: &mut FixtureContext<'_>) -> Result<Self::State>;

    /// Turn one declaration into a state fragment.
    fn convert(
        &self,
        declaration: &Self::Declaration,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<Self::State>;

    /// Move the backing stores from `old` to `new`.
    fn apply(
        &self,
        old: &Self::State,
        new: &Self::State,
        node: &NodeInfo,
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()>;
}

// ──────────────────── scope stack ────────────────────

#[derive(Debug)]
struct Frame<S> {
    state: Rc<S>,
    /// `None` for the default frame at the bottom.
    owner: Option<NodeId>,
}

type Scoped<D> = CursorStack<(NodeId, D)>;

pub struct ScopeStack<F: Fixture> {
    fixture: F,
    frames: Vec<Frame<F::State>>,
    applied: Option<Rc<F::State>>,
    containers: Scoped<F::Declaration>,
    cases: Scoped<F::Declaration>,
    parts: Scoped<F::Declaration>,
    pending: SegmentedList<F::Declaration, NodeId>,
    open: Vec<NodeId>,
    merges: usize,
}

impl<F: Fixture> ScopeStack<F> {
    pub fn new(fixture: F) -> Self {
        Self {
            fixture,
            frames: Vec::new(),
            applied: None,
            containers: CursorStack::default(),
            cases: CursorStack::default(),
            parts: CursorStack::default(),
            pending: SegmentedList::default(),
            open: Vec::new(),
            merges: 0,
        }
    }

    pub const fn fixture(&self) -> &F {
        &self.fixture
    }

    /// Number of frames, including the default frame once created.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&F::State> {
        self.frames.last().map(|f| f.state.as_ref())
    }

    pub fn applied(&self) -> Option<&F::State> {
        self.applied.as_deref()
    }

    /// Whether the last applied state is the current top frame itself.
    pub fn top_is_applied(&self) -> bool {
        match (self.frames.last(), &self.applied) {
            (Some(frame), Some(applied)) => Rc::ptr_eq(&frame.state, applied),
            _ => false,
        }
    }

    /// Total declaration merges performed so far.
    pub const fn merge_count(&self) -> usize {
        self.merges
    }

    /// Collect the node's declarations, then build and apply unless the node
    /// defers to its leaves.
    pub fn enter(
        &mut self,
        node: &NodeInfo,
        inits: &[Init],
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        self.track(node, inits)?;
        if node.has_children && !self.fixture.apply_immediately() {
            return Ok(());
        }
        self.build(node, ctx)
    }

    /// Record the node's declarations without building or applying anything.
    pub fn track(&mut self, node: &NodeInfo, inits: &[Init]) -> Result<()> {
        if self.open.contains(&node.id) {
            return Err(FxrError::StackDiscipline {
                details: format!("{}: node '{}' entered twice", self.fixture.name(), node.path),
            });
        }
        self.open.push(node.id);

        for init in inits {
            let Some(declaration) = self.fixture.select(&init.declaration) else {
                continue;
            };
            if init.apply_to == ApplyTo::Default {
                self.pending.push(declaration.clone());
                continue;
            }
            for kind in init.apply_to.kinds() {
                self.scoped_mut(*kind).push((node.id, declaration.clone()));
            }
        }

        let inherited: Vec<F::Declaration> = self
            .scoped_mut(node.kind)
            .read_from_cursor()
            .iter()
            .map(|(_, declaration)| declaration.clone())
            .collect();
        self.pending.extend(inherited);
        self.pending.finish_segment(node.id);
        Ok(())
    }

    /// Pop everything the matching `enter` pushed.
    pub fn exit(&mut self, node: &NodeInfo) -> Result<()> {
        match self.open.last() {
            Some(id) if *id == node.id => {}
            other => {
                return Err(FxrError::StackDiscipline {
                    details: format!(
                        "{}: exit of '{}' while innermost open node is {other:?}",
                        self.fixture.name(),
                        node.path
                    ),
                });
            }
        }

        for kind in [NodeKind::Container, NodeKind::Case, NodeKind::Part] {
            let scoped = self.scoped_mut(kind);
            while scoped.last().is_some_and(|(owner, _)| *owner == node.id) {
                scoped.pop();
            }
        }
        if self.pending.last_owner() == Some(&node.id) {
            self.pending.pop_segment();
        }
        if self.frames.last().is_some_and(|f| f.owner == Some(node.id)) {
            self.frames.pop();
        }
        self.open.pop();
        Ok(())
    }

    /// Forget all frames and bookkeeping, e.g. after the stores were torn down.
    pub fn reset(&mut self) {
        self.frames.clear();
        self.applied = None;
        self.containers.clear();
        self.cases.clear();
        self.parts.clear();
        self.pending.clear();
        self.open.clear();
    }

    fn scoped_mut(&mut self, kind: NodeKind) -> &mut Scoped<F::Declaration> {
        match kind {
            NodeKind::Container => &mut self.containers,
            NodeKind::Case => &mut self.cases,
            NodeKind::Part => &mut self.parts,
        }
    }

    fn build(&mut self, node: &NodeInfo, ctx: &mut FixtureContext<'_>) -> Result<()> {
        let result = match self.push_pending(node, ctx) {
            Ok(false) if node.kind == NodeKind::Part && !node.first_child => Ok(()),
            Ok(_) => self.apply_top(node, ctx),
            Err(err) => {
                // Pending segments survive; the failed node's own segment is
                // dropped by its exit and the ancestors' are retried.
                self.reset_cursors();
                Err(err)
            }
        };
        if !self.fixture.save_state() {
            self.collapse();
        }
        result
    }

    /// Fold pending declarations into new frames. Returns whether anything
    /// was pending. Frames are only pushed once every conversion succeeded.
    fn push_pending(&mut self, node: &NodeInfo, ctx: &mut FixtureContext<'_>) -> Result<bool> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        if self.frames.is_empty() {
            let state = Rc::new(self.fixture.default_state(ctx)?);
            self.frames.push(Frame {
                state: Rc::clone(&state),
                owner: None,
            });
            self.applied.get_or_insert(state);
        }

        let mut built = Vec::new();
        if self.fixture.save_state() {
            let mut base = match (&self.applied, node.kind, node.first_child) {
                (Some(applied), NodeKind::Part, false) => Rc::clone(applied),
                _ => Rc::clone(&self.frames[self.frames.len() - 1].state),
            };
            for (owner, declarations) in self.pending.segments() {
                if !declarations.is_empty() {
                    let mut state = base.copy();
                    for declaration in declarations {
                        let fragment = self.fixture.convert(declaration, ctx)?;
                        state.merge(&fragment)?;
                        self.merges += 1;
                    }
                    base = Rc::new(state);
                }
                built.push(Frame {
                    state: Rc::clone(&base),
                    owner: Some(*owner),
                });
            }
        } else {
            let mut state = self.frames[0].state.copy();
            for declaration in self.pending.items() {
                let fragment = self.fixture.convert(declaration, ctx)?;
                state.merge(&fragment)?;
                self.merges += 1;
            }
            built.push(Frame {
                state: Rc::new(state),
                owner: Some(node.id),
            });
        }

        self.frames.extend(built);
        self.discard_pending();
        Ok(true)
    }

    fn apply_top(&mut self, node: &NodeInfo, ctx: &mut FixtureContext<'_>) -> Result<()> {
        let (Some(top), Some(applied)) = (self.frames.last(), &self.applied) else {
            return Ok(());
        };
        if Rc::ptr_eq(&top.state, applied) {
            return Ok(());
        }
        let top = Rc::clone(&top.state);
        self.fixture.apply(applied, &top, node, ctx)?;
        self.applied = Some(top);
        Ok(())
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
        self.reset_cursors();
    }

    fn reset_cursors(&mut self) {
        self.containers.reset();
        self.cases.reset();
        self.parts.reset();
    }

    fn collapse(&mut self) {
        self.frames.truncate(1);
        if let Some(bottom) = self.frames.first() {
            self.applied = Some(Rc::clone(&bottom.state));
        }
    }
}

// ──────────────────── object-safe facade ────────────────────

/// Type-erased view of a [`ScopeStack`] for the registry.
pub trait ScopeDriver {
    fn name(&self) -> &'static str;
    fn order(&self) -> i32;
    fn enter(&mut self, node: &NodeInfo, inits: &[Init], ctx: &mut FixtureContext<'_>)
    -> Result<()>;
    fn track(&mut self, node: &NodeInfo, inits: &[Init]) -> Result<()>;
    fn exit(&mut self, node: &NodeInfo) -> Result<()>;
    fn depth(&self) -> usize;
    fn reset(&mut self);
}

impl<F: Fixture> ScopeDriver for ScopeStack<F> {
    fn name(&self) -> &'static str {
        self.fixture.name()
    }

    fn order(&self) -> i32 {
        self.fixture.order()
    }

    fn enter(
        &mut self,
        node: &NodeInfo,
        inits: &[Init],
        ctx: &mut FixtureContext<'_>,
    ) -> Result<()> {
        Self::enter(self, node, inits, ctx)
    }

    fn track(&mut self, node: &NodeInfo, inits: &[Init]) -> Result<()> {
        Self::track(self, node, inits)
    }

    fn exit(&mut self, node: &NodeInfo) -> Result<()> {
        Self::exit(self, node)
    }

    fn depth(&self) -> usize {
        Self::depth(self)
    }

    fn reset(&mut self) {
        Self::reset(self);
    }
}

// ──────────────────── tests ────────────────────
