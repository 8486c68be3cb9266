//! Change-set containers produced by the diff engine.
//!
//! A [`ChangeSet`] is built with one [`LevelLayout`] per nesting depth. The layout
//! decides whether keys are flattened to strings, whether nested values are kept
//! structured or rendered to text, whether entries are sorted by key, and whether
//! each entry carries its `added`/`changed`/`deleted` tag.

#![allow(missing_docs)]

use std::fmt;

use serde::ser::{SerializeMap, SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::core::errors::{FxrError, Result};
use crate::diff::value::{Key, Value};

/// How keys (or values) are represented in a change-set level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderType {
    /// Flattened to the canonical string form.
    #[default]
    String,
    /// Kept as the original structured value.
    Object,
}

impl fmt::Display for RenderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Tag attached to every change-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Changed,
    Deleted,
}

/// Effective rendering rules for one nesting depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelLayout {
    pub key_type: RenderType,
    pub value_type: RenderType,
    pub sort: bool,
    pub change_type: bool,
}

impl Default for LevelLayout {
    fn default() -> Self {
        Self {
            key_type: RenderType::String,
            value_type: RenderType::Object,
            sort: false,
            change_type: false,
        }
    }
}

impl LevelLayout {
    /// Reject layouts that have no container representation.
    pub fn check(&self) -> Result<()> {
        let supported = match (self.key_type, self.value_type) {
            (RenderType::String, RenderType::String) => !self.change_type,
            (RenderType::String, RenderType::Object) => true,
            (RenderType::Object, RenderType::String) => false,
            (RenderType::Object, RenderType::Object) => self.change_type,
        };
        if supported {
            Ok(())
        } else {
            Err(FxrError::InvalidConfig {
                details: format!(
                    "change-set layout with key_type={}, value_type={}, change_type={} is not supported",
                    self.key_type, self.value_type, self.change_type
                ),
            })
        }
    }
}

/// Value carried by a change-set entry.
#[derive(Debug, Clone)]
pub enum Delta {
    /// The new value itself (scalars, or a structured value with nothing to compare against).
    Value(Value),
    /// Nested change-set.
    Changes(ChangeSet),
}

impl Delta {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Changes(_) => None,
        }
    }

    pub fn as_changes(&self) -> Option<&ChangeSet> {
        match self {
            Self::Changes(c) => Some(c),
            Self::Value(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Value(v) => v.render(),
            Self::Changes(c) => serde_json::to_value(c)
                .map(|json| json.to_string())
                .unwrap_or_default(),
        }
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Value(v) => v.serialize(serializer),
            Self::Changes(c) => c.serialize(serializer),
        }
    }
}

/// One tagged entry.
#[derive(Debug, Clone)]
pub struct ChangeEntry {
    pub key: Key,
    pub change: ChangeKind,
    pub value: Option<Delta>,
}

impl ChangeEntry {
    /// Key in the canonical string form.
    pub fn rendered_key(&self) -> String {
        self.key.render()
    }
}

/// Ordered collection of tagged entries for one map-like level.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    layout: LevelLayout,
    entries: Vec<ChangeEntry>,
}

impl ChangeSet {
    #[must_use]
    pub fn new(layout: LevelLayout) -> Self {
        Self {
            layout,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, change: ChangeKind, key: Key, value: Option<Delta>) {
        // Map layouts keep the last write for a rendered key.
        if !self.layout.change_type {
            let rendered = key.render();
            self.entries.retain(|e| e.key.render() != rendered);
        }
        self.entries.push(ChangeEntry { key, change, value });
    }

    /// Apply the layout's ordering once all entries are in.
    pub(crate) fn finish(mut self) -> Option<Self> {
        if self.entries.is_empty() {
            return None;
        }
        if self.layout.sort {
            self.entries.sort_by_cached_key(ChangeEntry::rendered_key);
        }
        Some(self)
    }

    pub const fn layout(&self) -> LevelLayout {
        self.layout
    }

    pub fn entries(&self) -> &[ChangeEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Find an entry by its rendered key.
    pub fn get(&self, key: &str) -> Option<&ChangeEntry> {
        self.entries.iter().find(|e| e.key.render() == key)
    }

    /// Rendered keys in output order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(ChangeEntry::rendered_key).collect()
    }

    /// Drop entries whose value is absent. Only meaningful for map layouts,
    /// where a deleted entry is otherwise rendered as `null`.
    pub fn prune_null_values(&mut self) {
        if !self.layout.change_type {
            self.entries.retain(|e| match &e.value {
                None => false,
                Some(Delta::Value(v)) => !v.is_null(),
                Some(Delta::Changes(_)) => true,
            });
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

struct EntryView<'a> {
    entry: &'a ChangeEntry,
    key_type: RenderType,
}

impl Serialize for EntryView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let has_value = self.entry.value.is_some();
        let mut st = serializer.serialize_struct("ChangeEntry", if has_value { 3 } else { 2 })?;
        match self.key_type {
            RenderType::String => st.serialize_field("key", &self.entry.rendered_key())?,
            RenderType::Object => st.serialize_field("key", &self.entry.key)?,
        }
        st.serialize_field("change", &self.entry.change)?;
        if let Some(value) = &self.entry.value {
            st.serialize_field("value", value)?;
        }
        st.end()
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.layout.change_type {
            let mut seq = serializer.serialize_seq(Some(self.entries.len()))?;
            for entry in &self.entries {
                seq.serialize_element(&EntryView {
                    entry,
                    key_type: self.layout.key_type,
                })?;
            }
            seq.end()
        } else {
            let mut map = serializer.serialize_map(Some(self.entries.len()))?;
            for entry in &self.entries {
                let key = entry.rendered_key();
                match (self.layout.value_type, &entry.value) {
                    (_, None) => map.serialize_entry(&key, &serde_json::Value::Null)?,
                    (RenderType::String, Some(delta)) => map.serialize_entry(&key, &delta.render())?,
                    (RenderType::Object, Some(delta)) => map.serialize_entry(&key, delta)?,
                }
            }
            map.end()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layout(key: RenderType, value: RenderType, sort: bool, change: bool) -> LevelLayout {
        LevelLayout {
            key_type: key,
            value_type: value,
            sort,
            change_type: change,
        }
    }

    #[test]
    fn default_layout_is_supported() {
        assert!(LevelLayout::default().check().is_ok());
    }

    #[test]
    fn unsupported_layouts_rejected() {
        use RenderType::{Object, String};
        assert!(layout(String, String, false, true).check().is_err());
        assert!(layout(Object, String, false, false).check().is_err());
        assert!(layout(Object, String, false, true).check().is_err());
        assert!(layout(Object, Object, false, false).check().is_err());
        assert!(layout(Object, Object, true, true).check().is_ok());
        assert!(layout(String, String, true, false).check().is_ok());
    }

    #[test]
    fn map_layout_renders_object_with_null_for_deleted() {
        let mut set = ChangeSet::new(LevelLayout::default());
        set.push(ChangeKind::Added, Key::from("b"), Some(Delta::Value(Value::Int(2))));
        set.push(ChangeKind::Deleted, Key::from("a"), None);
        let set = set.finish().expect("non-empty");
        assert_eq!(set.to_json(), json!({"b": 2, "a": null}));
    }

    #[test]
    fn sorted_layout_orders_by_rendered_key() {
        let mut set = ChangeSet::new(layout(RenderType::String, RenderType::Object, true, false));
        set.push(ChangeKind::Added, Key::from("zeta"), Some(Delta::Value(Value::Int(1))));
        set.push(ChangeKind::Added, Key::from("alpha"), Some(Delta::Value(Value::Int(2))));
        let set = set.finish().expect("non-empty");
        assert_eq!(set.keys(), ["alpha", "zeta"]);
    }

    #[test]
    fn entries_layout_tags_changes_and_omits_deleted_value() {
        let mut set = ChangeSet::new(layout(RenderType::Object, RenderType::Object, false, true));
        set.push(ChangeKind::Changed, Key::Int(3), Some(Delta::Value(Value::text("x"))));
        set.push(ChangeKind::Deleted, Key::Int(4), None);
        let set = set.finish().expect("non-empty");
        assert_eq!(
            set.to_json(),
            json!([
                {"key": 3, "change": "changed", "value": "x"},
                {"key": 4, "change": "deleted"}
            ])
        );
    }

    #[test]
    fn string_value_layout_renders_values_as_text() {
        let mut set = ChangeSet::new(layout(RenderType::String, RenderType::String, false, false));
        set.push(
            ChangeKind::Added,
            Key::Decimal("1.50".into()),
            Some(Delta::Value(Value::Decimal("2.500".into()))),
        );
        let set = set.finish().expect("non-empty");
        assert_eq!(set.to_json(), json!({"1.5": "2.5"}));
    }

    #[test]
    fn prune_null_values_drops_deleted_entries_in_map_layout() {
        let mut set = ChangeSet::new(LevelLayout::default());
        set.push(ChangeKind::Deleted, Key::from("gone"), None);
        set.push(ChangeKind::Added, Key::from("kept"), Some(Delta::Value(Value::Bool(true))));
        set.prune_null_values();
        assert_eq!(set.keys(), ["kept"]);
    }

    #[test]
    fn empty_set_finishes_to_none() {
        assert!(ChangeSet::new(LevelLayout::default()).finish().is_none());
    }
}
