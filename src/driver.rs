//! Reconciliation driver: runs every fixture kind around one test-tree
//! traversal and attaches a before/after store diff to each executed leaf.
//!
//! The driver owns the stores, the callback registry, the frozen clock and the
//! journal. Callers either drive it by hand (`enter` / `before_test` /
//! `after_test` / `exit`) or hand it a whole [`TestTree`] with [`Reconciler::run_tree`].

#![allow(missing_docs)]

use std::thread;

use serde::Serialize;

use crate::core::config::{Config, DirtyPolicy};
use crate::core::errors::{FxrError, Result};
use crate::diff::container::Delta;
use crate::diff::engine::DiffEngine;
use crate::diff::value::{Key, Value, ValueMap};
use crate::fixture::context::FixtureContext;
use crate::fixture::registry::FixtureRegistry;
use crate::fixture::scope::Fixture;
use crate::fixture::tree::{Init, NodeInfo, NodeKind, TestNode, TestTree};
use crate::kinds::date_time::TestClock;
use crate::logger::journal::{JournalEvent, JournalHandle, spawn_journal};
use crate::storage::{CallbackRegistry, DataStorages, KeyValueStore, SqlStore};

// ──────────────────── outcomes ────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed { message: String },
    SetupFailed { code: String, message: String },
}

impl TestStatus {
    fn setup_failed(err: &FxrError) -> Self {
        Self::SetupFailed {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }

    pub const fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Recorded result of one executed leaf.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub path: String,
    pub status: TestStatus,
    /// Store changes made while the test body ran; `None` when nothing changed.
    pub diff: Option<Delta>,
}

/// What a test body gets to work with.
pub struct LeafContext<'a> {
    pub node: &'a NodeInfo,
    pub storages: &'a mut DataStorages,
    pub clock: &'a TestClock,
}

// ──────────────────── reconciler ────────────────────

pub struct Reconciler {
    config: Config,
    registry: FixtureRegistry,
    storages: DataStorages,
    callbacks: CallbackRegistry,
    clock: TestClock,
    engine: DiffEngine,
    journal: JournalHandle,
    journal_join: Option<thread::JoinHandle<()>>,
    open: Vec<NodeInfo>,
    /// Last known content per store, keyed by store name.
    snapshots: ValueMap,
    started: bool,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("registry", &self.registry)
            .field("storages", &self.storages.names())
            .field("depth", &self.open.len())
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Build a reconciler with the built-in fixture kinds and no stores.
    pub fn new(config: Config) -> Result<Self> {
        let (journal, journal_join) = spawn_journal(&config.journal)?;
        Ok(Self {
            engine: DiffEngine::new(config.diff.clone()),
            config,
            registry: FixtureRegistry::with_builtin_kinds(),
            storages: DataStorages::new(),
            callbacks: CallbackRegistry::default(),
            clock: TestClock::default(),
            journal,
            journal_join,
            open: Vec::new(),
            snapshots: ValueMap::new(),
            started: false,
        })
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn storages(&self) -> &DataStorages {
        &self.storages
    }

    pub fn storages_mut(&mut self) -> &mut DataStorages {
        &mut self.storages
    }

    pub const fn clock(&self) -> &TestClock {
        &self.clock
    }

    pub const fn journal(&self) -> &JournalHandle {
        &self.journal
    }

    pub fn fixture_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    /// Number of currently open nodes.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    pub fn add_sql_store(&mut self, store: SqlStore) -> Result<()> {
        self.storages.add_sql(store)
    }

    pub fn add_key_value_store(&mut self, store: KeyValueStore) -> Result<()> {
        self.storages.add_key_value(store)
    }

    pub fn register_callback<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> Result<()> + 'static,
    {
        self.callbacks.register(name, callback);
    }

    /// Register a callback that writes to the named data stores, so their
    /// content is diffed again after it runs.
    pub fn register_callback_touching<F, S>(
        &mut self,
        name: impl Into<String>,
        touches: impl IntoIterator<Item = S>,
        callback: F,
    ) where
        F: Fn() -> Result<()> + 'static,
        S: Into<String>,
    {
        self.callbacks.register_touching(name, touches, callback);
    }

    /// Add a custom fixture kind. Only allowed between traversals.
    pub fn register_fixture<F>(&mut self, fixture: F) -> Result<()>
    where
        F: Fixture + 'static,
    {
        if !self.open.is_empty() {
            return Err(FxrError::StackDiscipline {
                details: format!("fixture kind '{}' registered mid-traversal", fixture.name()),
            });
        }
        self.registry.register(fixture)
    }

    // ──────────────────── node lifecycle ────────────────────

    /// Run every fixture kind for `node`, in kind order. The first failure is
    /// returned annotated with node and kind; kinds after it only record the
    /// node's declarations so the matching [`exit`](Self::exit) stays balanced.
    pub fn enter(&mut self, node: &NodeInfo, inits: &[Init]) -> Result<()> {
        if self.open.iter().any(|open| open.id == node.id) {
            return Err(FxrError::StackDiscipline {
                details: format!("node '{}' entered twice", node.path),
            });
        }
        if !self.started {
            self.started = true;
            self.journal.send(JournalEvent::EngineStarted {
                version: env!("CARGO_PKG_VERSION").to_string(),
                config_hash: self.config.stable_hash().unwrap_or_default(),
                fixtures: self.registry.names().into_iter().map(str::to_string).collect(),
            });
        }
        self.open.push(node.clone());
        self.journal.send(JournalEvent::NodeEntered {
            node: node.path.clone(),
            kind: node.kind.to_string(),
        });

        let mut failure: Option<FxrError> = None;
        for driver in self.registry.drivers_mut() {
            if failure.is_some() {
                driver.track(node, inits)?;
                continue;
            }
            let mut ctx = FixtureContext {
                config: &self.config,
                storages: &mut self.storages,
                callbacks: &self.callbacks,
                clock: &self.clock,
                journal: &self.journal,
            };
            if let Err(err) = driver.enter(node, inits, &mut ctx) {
                let err = err.in_setup(&node.path, driver.name());
                self.journal.send(JournalEvent::SetupFailed {
                    node: node.path.clone(),
                    fixture: driver.name().to_string(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                failure = Some(err);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Pop everything the matching `enter` pushed, in reverse kind order.
    pub fn exit(&mut self, node: &NodeInfo) -> Result<()> {
        match self.open.last() {
            Some(open) if open.id == node.id => {}
            other => {
                return Err(FxrError::StackDiscipline {
                    details: format!(
                        "exit of '{}' while innermost open node is {:?}",
                        node.path,
                        other.map(|n| n.path.as_str())
                    ),
                });
            }
        }
        for driver in self.registry.drivers_mut().iter_mut().rev() {
            driver.exit(node)?;
        }
        self.open.pop();
        self.journal.send(JournalEvent::NodeExited {
            node: node.path.clone(),
        });
        Ok(())
    }

    /// Forget all fixture state, e.g. after the stores were recreated.
    pub fn reset(&mut self) {
        self.registry.reset();
        self.open.clear();
        self.snapshots.clear();
        self.clock.reset();
    }

    // ──────────────────── snapshots and diffs ────────────────────

    /// Refresh the cached snapshot of every store fixture application touched,
    /// and of stores never snapshotted before.
    pub fn before_test(&mut self) -> Result<()> {
        let affected = self.storages.take_affected();
        for name in self.store_names() {
            let key = Key::from(name.as_str());
            if affected.contains(&name) || !self.snapshots.contains_key(&key) {
                let snapshot = self.storages.snapshot(&name, &self.config.diff)?;
                self.snapshots.insert(key, snapshot);
            }
        }
        Ok(())
    }

    /// Snapshot every store, diff against the cached snapshots, mark changed
    /// tables dirty and return what the test changed.
    pub fn after_test(&mut self, node: &NodeInfo) -> Result<Option<Delta>> {
        let mut current = ValueMap::new();
        for name in self.store_names() {
            let snapshot = self.storages.snapshot(&name, &self.config.diff)?;
            current.insert(Key::from(name), snapshot);
        }

        let before = Value::Map(std::mem::take(&mut self.snapshots));
        let after = Value::Map(current);
        let delta = match self.engine.diff_values(&before, &after) {
            Some(Delta::Changes(mut changes)) => {
                changes.prune_null_values();
                (!changes.is_empty()).then_some(Delta::Changes(changes))
            }
            other => other,
        };
        self.mark_dirty(&before, &after)?;
        if let Value::Map(map) = after {
            self.snapshots = map;
        }

        if let Some(delta) = &delta {
            self.journal.send(JournalEvent::DiffRecorded {
                node: node.path.clone(),
                diff: serde_json::to_value(delta).unwrap_or_default(),
            });
        }
        Ok(delta)
    }

    fn store_names(&self) -> Vec<String> {
        self.storages.names().into_iter().map(str::to_string).collect()
    }

    fn mark_dirty(&mut self, before: &Value, after: &Value) -> Result<()> {
        let sql_names: Vec<String> = self
            .storages
            .sql_stores()
            .map(|store| store.name().to_string())
            .collect();
        for name in sql_names {
            let store = self.storages.resolve_sql(Some(&name))?;
            let dirty = match self.config.reconcile.mark_dirty {
                DirtyPolicy::Allowed => store.allowed_tables().iter().cloned().collect(),
                DirtyPolicy::Changed => changed_tables(before.get(&name), after.get(&name)),
            };
            store.believed_mut().mark_dirty(dirty.iter().map(String::as_str));
        }
        Ok(())
    }

    // ──────────────────── traversal ────────────────────

    /// Depth-first traversal of `tree`. Leaves (Parts, and Cases without
    /// Parts) run `executor`; disabled nodes are skipped. When a node's setup
    /// fails, every leaf below it is reported as a setup failure.
    ///
    /// Only contract violations abort the traversal.
    pub fn run_tree<E>(&mut self, tree: &TestTree, mut executor: E) -> Result<Vec<TestOutcome>>
    where
        E: FnMut(&mut LeafContext<'_>) -> std::result::Result<(), String>,
    {
        tree.validate()?;
        let mut outcomes = Vec::new();
        let mut next_id = self.open.iter().map(|n| n.id.0 + 1).max().unwrap_or(0);
        if !tree.root.disabled {
            self.visit(&tree.root, None, true, &mut next_id, &mut executor, &mut outcomes)?;
        }
        Ok(outcomes)
    }

    fn visit<E>(
        &mut self,
        node: &TestNode,
        parent: Option<&str>,
        first: bool,
        next_id: &mut usize,
        executor: &mut E,
        outcomes: &mut Vec<TestOutcome>,
    ) -> Result<()>
    where
        E: FnMut(&mut LeafContext<'_>) -> std::result::Result<(), String>,
    {
        let path = parent.map_or_else(|| node.name.clone(), |p| format!("{p}/{}", node.name));
        let children: Vec<&TestNode> = node.children.iter().filter(|c| !c.disabled).collect();
        let mut info = NodeInfo::new(*next_id, node.kind, path)
            .with_children(node.kind == NodeKind::Container || !children.is_empty());
        if !first {
            info = info.not_first();
        }
        *next_id += 1;

        match self.enter(&info, &node.inits) {
            Ok(()) if info.is_leaf() => {
                outcomes.push(self.run_leaf(&info, executor));
            }
            Ok(()) => {
                for (index, child) in children.iter().enumerate() {
                    self.visit(child, Some(&info.path), index == 0, next_id, executor, outcomes)?;
                }
            }
            Err(err) if err.is_setup_failure() => {
                let mut paths = Vec::new();
                leaf_paths(node, &info.path, &mut paths);
                outcomes.extend(paths.into_iter().map(|path| TestOutcome {
                    path,
                    status: TestStatus::setup_failed(&err),
                    diff: None,
                }));
            }
            Err(err) => return Err(err),
        }
        self.exit(&info)
    }

    fn run_leaf<E>(&mut self, node: &NodeInfo, executor: &mut E) -> TestOutcome
    where
        E: FnMut(&mut LeafContext<'_>) -> std::result::Result<(), String>,
    {
        let outcome = |status, diff| TestOutcome {
            path: node.path.clone(),
            status,
            diff,
        };
        if let Err(err) = self.before_test() {
            return outcome(TestStatus::setup_failed(&err), None);
        }
        let result = executor(&mut LeafContext {
            node,
            storages: &mut self.storages,
            clock: &self.clock,
        });
        match (result, self.after_test(node)) {
            (Ok(()), Ok(diff)) => outcome(TestStatus::Passed, diff),
            (Err(message), Ok(diff)) => outcome(TestStatus::Failed { message }, diff),
            (Err(message), Err(_)) => outcome(TestStatus::Failed { message }, None),
            (Ok(()), Err(err)) => outcome(TestStatus::setup_failed(&err), None),
        }
    }

    /// Flush and stop the journal writer. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.journal.shutdown();
        if let Some(join) = self.journal_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Tables of one SQL store snapshot whose rows differ between two snapshots.
fn changed_tables(before: Option<&Value>, after: Option<&Value>) -> Vec<String> {
    let Some(after) = after.and_then(Value::as_map) else {
        return Vec::new();
    };
    let before = before.and_then(Value::as_map);
    after
        .iter()
        .filter(|(table, rows)| {
            before
                .and_then(|b| b.get(*table))
                .is_none_or(|old| !old.equivalent(rows))
        })
        .map(|(table, _)| table.render())
        .collect()
}

fn leaf_paths(node: &TestNode, path: &str, out: &mut Vec<String>) {
    let children: Vec<&TestNode> = node.children.iter().filter(|c| !c.disabled).collect();
    let is_leaf = match node.kind {
        NodeKind::Part => true,
        NodeKind::Case => children.is_empty(),
        NodeKind::Container => false,
    };
    if is_leaf {
        out.push(path.to_string());
        return;
    }
    for child in children {
        leaf_paths(child, &format!("{path}/{}", child.name), out);
    }
}
