//! Test-tree model: node kinds, scope selectors and typed init declarations.
//!
//! Trees are usually deserialized from JSON:
//!
//! ```json
//! {"kind": "container", "name": "orders", "inits": [
//!     {"apply_to": "case", "tables": {"storage": "main", "tables_to_change": "orders"}}
//!  ], "children": [{"kind": "case", "name": "insert"}]}
//! ```

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FxrError, Result};
use crate::kinds::callbacks::CallbacksDeclaration;
use crate::kinds::date_time::DateTimeDeclaration;
use crate::kinds::key_value::KeyValueDeclaration;
use crate::kinds::no_hook_sql::NoHookSqlDeclaration;
use crate::kinds::storage_setup::StorageSetupDeclaration;
use crate::table::declaration::TableDeclaration;

// ──────────────────── kinds and selectors ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Container,
    Case,
    Part,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => f.write_str("container"),
            Self::Case => f.write_str("case"),
            Self::Part => f.write_str("part"),
        }
    }
}

/// Which nodes a declaration applies to.
///
/// `Default` binds the declaration to the node that carries it. The other
/// selectors apply to every node of that kind inside the declaring node's scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyTo {
    #[default]
    Default,
    Container,
    Case,
    Part,
    All,
}

impl ApplyTo {
    /// Node kinds whose scoped stacks receive this declaration.
    pub fn kinds(self) -> &'static [NodeKind] {
        match self {
            Self::Default => &[],
            Self::Container => &[NodeKind::Container],
            Self::Case => &[NodeKind::Case],
            Self::Part => &[NodeKind::Part],
            Self::All => &[NodeKind::Container, NodeKind::Case, NodeKind::Part],
        }
    }
}

// ──────────────────── node identity ────────────────────

/// Identity of a node within one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// What the scope machinery needs to know about the node being entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: String,
    /// Slash-separated names from the root.
    pub path: String,
    /// First child of its parent (the root counts as first).
    pub first_child: bool,
    /// Containers, and Cases split into Parts.
    pub has_children: bool,
}

impl NodeInfo {
    pub fn new(id: usize, kind: NodeKind, path: impl Into<String>) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            id: NodeId(id),
            kind,
            name,
            path,
            first_child: true,
            has_children: kind == NodeKind::Container,
        }
    }

    #[must_use]
    pub fn not_first(mut self) -> Self {
        self.first_child = false;
        self
    }

    #[must_use]
    pub fn with_children(mut self, has_children: bool) -> Self {
        self.has_children = has_children;
        self
    }

    pub const fn is_leaf(&self) -> bool {
        !self.has_children
    }

    /// Whether dirty tables force a state change when entering this node.
    /// Later sibling Parts skip the check unless `on_parts` is set.
    pub fn check_dirty(&self, on_parts: bool) -> bool {
        self.kind != NodeKind::Part || self.first_child || on_parts
    }
}

// ──────────────────── declarations ────────────────────

/// One typed init declaration, keyed by fixture kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Declaration {
    DateTime(DateTimeDeclaration),
    StorageSetup(StorageSetupDeclaration),
    Tables(TableDeclaration),
    KeyValue(KeyValueDeclaration),
    Callbacks(CallbacksDeclaration),
    NoHookSql(NoHookSqlDeclaration),
}

impl Declaration {
    /// Name of the fixture kind that consumes this declaration.
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::DateTime(_) => "date_time",
            Self::StorageSetup(_) => "storage_setup",
            Self::Tables(_) => "tables",
            Self::KeyValue(_) => "key_value",
            Self::Callbacks(_) => "callbacks",
            Self::NoHookSql(_) => "no_hook_sql",
        }
    }
}

/// A declaration together with its scope selector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Init {
    #[serde(default)]
    pub apply_to: ApplyTo,
    #[serde(flatten)]
    pub declaration: Declaration,
}

impl Init {
    pub fn new(declaration: Declaration) -> Self {
        Self {
            apply_to: ApplyTo::Default,
            declaration,
        }
    }

    #[must_use]
    pub fn applying_to(mut self, apply_to: ApplyTo) -> Self {
        self.apply_to = apply_to;
        self
    }
}

// ──────────────────── tree ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub inits: Vec<Init>,
    #[serde(default)]
    pub children: Vec<TestNode>,
}

impl TestNode {
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            disabled: false,
            inits: Vec::new(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_init(mut self, init: Init) -> Self {
        self.inits.push(init);
        self
    }

    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestTree {
    pub root: TestNode,
}

impl TestTree {
    pub fn new(root: TestNode) -> Self {
        Self { root }
    }

    /// Parse and validate a JSON tree.
    pub fn from_json(raw: &str) -> Result<Self> {
        let root: TestNode = serde_json::from_str(raw)?;
        let tree = Self { root };
        tree.validate()?;
        Ok(tree)
    }

    /// Enforce the hierarchy: the root is a Container, Cases live in Containers,
    /// Parts live in Cases and have no children.
    pub fn validate(&self) -> Result<()> {
        if self.root.kind != NodeKind::Container {
            return Err(FxrError::InvalidConfig {
                details: format!("root node '{}' must be a container", self.root.name),
            });
        }
        check_children(&self.root, &self.root.name)
    }
}

fn check_children(node: &TestNode, path: &str) -> Result<()> {
    for child in &node.children {
        let allowed = match child.kind {
            NodeKind::Container | NodeKind::Case => node.kind == NodeKind::Container,
            NodeKind::Part => node.kind == NodeKind::Case,
        };
        let child_path = format!("{path}/{}", child.name);
        if !allowed {
            return Err(FxrError::InvalidConfig {
                details: format!("{} '{child_path}' cannot be a child of a {}", child.kind, node.kind),
            });
        }
        check_children(child, &child_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tree_with_scoped_inits() {
        let tree = TestTree::from_json(
            r#"{"kind": "container", "name": "suite",
                "inits": [{"apply_to": "case", "callbacks": {"names": ["reset"]}}],
                "children": [
                    {"kind": "case", "name": "one",
                     "children": [{"kind": "part", "name": "p1"}]},
                    {"kind": "case", "name": "two", "disabled": true}
                ]}"#,
        )
        .unwrap();
        assert_eq!(tree.root.inits.len(), 1);
        assert_eq!(tree.root.inits[0].apply_to, ApplyTo::Case);
        assert_eq!(tree.root.inits[0].declaration.kind_name(), "callbacks");
        assert!(tree.root.children[1].disabled);
    }

    #[test]
    fn apply_to_defaults_to_declaring_node() {
        let init: Init =
            serde_json::from_str(r#"{"no_hook_sql": {"storage": "main", "sql": ["DELETE FROM t"]}}"#)
                .unwrap();
        assert_eq!(init.apply_to, ApplyTo::Default);
        assert!(init.apply_to.kinds().is_empty());
        assert_eq!(ApplyTo::All.kinds().len(), 3);
    }

    #[test]
    fn rejects_part_under_container() {
        let tree = TestTree::new(
            TestNode::new(NodeKind::Container, "suite").with_child(TestNode::new(NodeKind::Part, "p")),
        );
        let err = tree.validate().unwrap_err();
        assert_eq!(err.code(), "FXR-1001");
        assert!(err.to_string().contains("suite/p"));
    }

    #[test]
    fn rejects_case_root_and_case_under_case() {
        assert!(TestTree::new(TestNode::new(NodeKind::Case, "c")).validate().is_err());
        let nested = TestTree::new(TestNode::new(NodeKind::Container, "s").with_child(
            TestNode::new(NodeKind::Case, "c").with_child(TestNode::new(NodeKind::Case, "inner")),
        ));
        assert!(nested.validate().is_err());
    }

    #[test]
    fn dirty_check_skips_later_parts_unless_enabled() {
        let first = NodeInfo::new(1, NodeKind::Part, "s/c/p1");
        let later = NodeInfo::new(2, NodeKind::Part, "s/c/p2").not_first();
        let case = NodeInfo::new(3, NodeKind::Case, "s/c2").not_first();
        assert!(first.check_dirty(false));
        assert!(!later.check_dirty(false));
        assert!(later.check_dirty(true));
        assert!(case.check_dirty(false));
        assert_eq!(later.name, "p2");
    }
}
