//! Recursive structural comparator.
//!
//! `diff(left, right)` describes what changed from `left` to `right`, or returns
//! `None` when both are equivalent. Maps diff by key, sequences diff as
//! position-indexed maps, records diff by declared field. A middle insertion in
//! a sequence therefore reports every later index as changed; no positional
//! alignment is attempted.

#![allow(missing_docs)]

use std::borrow::Cow;

use indexmap::IndexMap;

use crate::core::config::DiffConfig;
use crate::diff::container::{ChangeKind, ChangeSet, Delta};
use crate::diff::value::{Key, Value};

/// Predicate deciding which values are compared as opaque scalars.
pub type ScalarPredicate = fn(&Value) -> bool;

type Entries<'a> = Cow<'a, IndexMap<Key, Value>>;

/// Structural diff engine configured with per-depth layouts.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    config: DiffConfig,
    is_scalar: ScalarPredicate,
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(DiffConfig::default())
    }
}

impl DiffEngine {
    #[must_use]
    pub fn new(config: DiffConfig) -> Self {
        Self {
            config,
            is_scalar: Value::is_scalar,
        }
    }

    /// Replace the scalar predicate, e.g. to treat a timestamp record as opaque.
    #[must_use]
    pub fn with_scalar_predicate(mut self, is_scalar: ScalarPredicate) -> Self {
        self.is_scalar = is_scalar;
        self
    }

    pub const fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare `left` (previous) against `right` (current).
    pub fn diff(&self, left: Option<&Value>, right: Option<&Value>) -> Option<Delta> {
        self.diff_at(left, right?, 0, None)
    }

    /// Same as [`diff`](Self::diff) for two present values.
    pub fn diff_values(&self, left: &Value, right: &Value) -> Option<Delta> {
        self.diff_at(Some(left), right, 0, None)
    }

    fn diff_at(
        &self,
        left: Option<&Value>,
        right: &Value,
        level: usize,
        storage: Option<&str>,
    ) -> Option<Delta> {
        if right.is_null() {
            return None;
        }
        let left = left.filter(|v| !v.is_null());
        let scalar = self.is_scalar;

        if left.is_none_or(scalar) && scalar(right) {
            if left.is_some_and(|l| l.equivalent(right)) {
                return None;
            }
            return Some(Delta::Value(right.clone()));
        }

        match (left, right) {
            (None | Some(Value::Map(_)), Value::Map(r)) => {
                let empty = IndexMap::new();
                let l = match left {
                    Some(Value::Map(l)) => l,
                    _ => &empty,
                };
                self.map_diff(Cow::Borrowed(l), Cow::Borrowed(r), level, storage)
            }
            (None | Some(Value::Seq(_)), Value::Seq(r)) => {
                let l = left.and_then(Value::as_seq).unwrap_or_default();
                self.map_diff(indexed(l), indexed(r), level, storage)
            }
            (Some(Value::Record(l)), Value::Record(r)) if l.type_name == r.type_name => {
                self.map_diff(fields(&l.fields), fields(&r.fields), level, storage)
            }
            _ => Some(Delta::Value(right.clone())),
        }
    }

    fn map_diff(
        &self,
        left: Entries<'_>,
        right: Entries<'_>,
        level: usize,
        storage: Option<&str>,
    ) -> Option<Delta> {
        let mut changes = ChangeSet::new(self.config.layout(storage, level));

        let scope_for = |key: &Key| -> Option<String> {
            if level == 0 {
                Some(key.render())
            } else {
                storage.map(str::to_string)
            }
        };

        for (key, value) in right.iter().filter(|(k, _)| !left.contains_key(*k)) {
            let scope = scope_for(key);
            let delta = self.diff_at(None, value, level + 1, scope.as_deref());
            changes.push(ChangeKind::Added, key.clone(), delta);
        }

        for (key, value) in right.iter() {
            let Some(previous) = left.get(key) else {
                continue;
            };
            if previous.equivalent(value) {
                continue;
            }
            let scope = scope_for(key);
            let delta = self.diff_at(Some(previous), value, level + 1, scope.as_deref());
            changes.push(ChangeKind::Changed, key.clone(), delta);
        }

        for key in left.keys().filter(|k| !right.contains_key(*k)) {
            changes.push(ChangeKind::Deleted, key.clone(), None);
        }

        changes.finish().map(Delta::Changes)
    }
}

fn indexed(items: &[Value]) -> Entries<'static> {
    Cow::Owned(
        items
            .iter()
            .enumerate()
            .map(|(i, v)| (Key::from(i), v.clone()))
            .collect(),
    )
}

fn fields(fields: &IndexMap<String, Value>) -> Entries<'static> {
    Cow::Owned(
        fields
            .iter()
            .map(|(k, v)| (Key::Text(k.clone()), v.clone()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LevelOverride, StorageDiffConfig};
    use crate::diff::container::RenderType;
    use crate::diff::value::{Record, ToValue};
    use proptest::prelude::*;
    use serde_json::json;

    struct Account {
        id: i64,
        balance: String,
        tags: Vec<String>,
    }

    impl Record for Account {
        fn type_name(&self) -> &'static str {
            "Account"
        }

        fn fields(&self) -> Vec<(&'static str, Value)> {
            vec![
                ("id", self.id.to_value()),
                ("balance", Value::Decimal(self.balance.clone())),
                ("tags", self.tags.to_value()),
            ]
        }
    }

    fn json_value(v: serde_json::Value) -> Value {
        Value::from(v)
    }

    fn render(delta: Option<Delta>) -> serde_json::Value {
        delta.map_or(serde_json::Value::Null, |d| {
            serde_json::to_value(&d).expect("serializable")
        })
    }

    #[test]
    fn null_right_yields_none() {
        let engine = DiffEngine::default();
        assert!(engine.diff(Some(&Value::Int(1)), None).is_none());
        assert!(engine.diff(Some(&Value::Int(1)), Some(&Value::Null)).is_none());
    }

    #[test]
    fn equal_scalars_yield_none() {
        let engine = DiffEngine::default();
        assert!(engine.diff_values(&Value::text("x"), &Value::text("x")).is_none());
    }

    #[test]
    fn scalars_return_right() {
        let engine = DiffEngine::default();
        let delta = engine.diff_values(&Value::Int(1), &Value::Int(2));
        assert!(matches!(delta, Some(Delta::Value(Value::Int(2)))));
    }

    #[test]
    fn map_diff_reports_added_changed_deleted() {
        let engine = DiffEngine::default();
        let left = json_value(json!({"a": 1, "b": 2, "c": 3}));
        let right = json_value(json!({"a": 1, "b": 20, "d": 4}));
        let out = render(engine.diff_values(&left, &right));
        assert_eq!(out, json!({"d": 4, "b": 20, "c": null}));
    }

    #[test]
    fn change_tags_follow_configured_layout() {
        let config = DiffConfig {
            change_type: true,
            ..DiffConfig::default()
        };
        let engine = DiffEngine::new(config);
        let left = json_value(json!({"a": 1, "gone": true}));
        let right = json_value(json!({"a": 2, "new": "x"}));
        let out = render(engine.diff_values(&left, &right));
        assert_eq!(
            out,
            json!([
                {"key": "new", "change": "added", "value": "x"},
                {"key": "a", "change": "changed", "value": 2},
                {"key": "gone", "change": "deleted"}
            ])
        );
    }

    #[test]
    fn sequences_diff_by_position() {
        let engine = DiffEngine::default();
        let left = json_value(json!(["a", "b", "c"]));
        let right = json_value(json!(["a", "x", "b", "c"]));
        let out = render(engine.diff_values(&left, &right));
        assert_eq!(out, json!({"3": "c", "1": "x", "2": "b"}));
    }

    #[test]
    fn records_diff_by_declared_fields() {
        let engine = DiffEngine::default();
        let before = Value::record(&Account {
            id: 1,
            balance: "10.00".into(),
            tags: vec!["a".into()],
        });
        let after = Value::record(&Account {
            id: 1,
            balance: "12.50".into(),
            tags: vec!["a".into(), "b".into()],
        });
        let out = render(engine.diff_values(&before, &after));
        assert_eq!(out, json!({"balance": "12.5", "tags": {"1": "b"}}));
    }

    #[test]
    fn absent_left_record_returns_whole_value() {
        let engine = DiffEngine::default();
        let after = Value::record(&Account {
            id: 2,
            balance: "1".into(),
            tags: vec![],
        });
        let delta = engine.diff(None, Some(&after));
        assert!(matches!(delta, Some(Delta::Value(Value::Record(_)))));
    }

    #[test]
    fn absent_left_map_reports_everything_added() {
        let engine = DiffEngine::default();
        let right = json_value(json!({"orders": {"0": {"id": 1}}}));
        let out = render(engine.diff(None, Some(&right)));
        assert_eq!(out, json!({"orders": {"0": {"id": 1}}}));
    }

    #[test]
    fn shape_change_replaces_value() {
        let engine = DiffEngine::default();
        let left = json_value(json!({"a": [1, 2]}));
        let right = json_value(json!({"a": {"k": 1}}));
        let out = render(engine.diff_values(&left, &right));
        assert_eq!(out, json!({"a": {"k": 1}}));
    }

    #[test]
    fn storage_name_selects_layout_below_level_zero() {
        let mut config = DiffConfig::default();
        config.storages.insert(
            "cache".to_string(),
            StorageDiffConfig {
                levels: vec![
                    LevelOverride::default(),
                    LevelOverride {
                        key_type: Some(RenderType::Object),
                        change_type: Some(true),
                        ..LevelOverride::default()
                    },
                ],
                ..StorageDiffConfig::default()
            },
        );
        let engine = DiffEngine::new(config);
        let left = Value::map([
            ("cache", Value::map([(Key::Int(1), Value::Int(1))])),
            ("db", Value::map([(Key::Int(1), Value::Int(1))])),
        ]);
        let right = Value::map([
            ("cache", Value::map([(Key::Int(1), Value::Int(2))])),
            ("db", Value::map([(Key::Int(1), Value::Int(2))])),
        ]);
        let out = render(engine.diff_values(&left, &right));
        assert_eq!(
            out,
            json!({
                "cache": [{"key": 1, "change": "changed", "value": 2}],
                "db": {"1": 2}
            })
        );
    }

    #[test]
    fn custom_scalar_predicate_stops_descent() {
        fn everything_scalar(_: &Value) -> bool {
            true
        }
        let engine = DiffEngine::default().with_scalar_predicate(everything_scalar);
        let left = json_value(json!({"a": 1}));
        let right = json_value(json!({"a": 2}));
        assert!(matches!(
            engine.diff_values(&left, &right),
            Some(Delta::Value(Value::Map(_)))
        ));
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::Text),
            "-?[0-9]{1,4}\\.[0-9]{0,3}".prop_map(Value::Decimal),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Seq),
                prop::collection::vec(("[a-d]{1,2}", inner.clone()), 0..6)
                    .prop_map(|pairs| Value::map(pairs)),
                prop::collection::vec(inner, 0..4).prop_map(|vals| {
                    Value::Record(crate::diff::value::RecordValue {
                        type_name: "Generated".to_string(),
                        fields: vals
                            .into_iter()
                            .enumerate()
                            .map(|(i, v)| (format!("f{i}"), v))
                            .collect(),
                        identity: None,
                    })
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn diff_of_value_with_itself_is_none(value in arb_value()) {
            let engine = DiffEngine::default();
            prop_assert!(engine.diff_values(&value, &value.clone()).is_none());
        }

        #[test]
        fn changed_keys_are_exactly_the_unequal_ones(
            left in prop::collection::btree_map("[a-e]", 0i64..4, 0..5),
            right in prop::collection::btree_map("[a-e]", 0i64..4, 0..5),
        ) {
            let engine = DiffEngine::new(DiffConfig { change_type: true, ..DiffConfig::default() });
            let delta = engine.diff_values(&left.to_value(), &right.to_value());
            let expected: usize = right.iter().filter(|(k, v)| left.get(*k) != Some(v)).count()
                + left.keys().filter(|k| !right.contains_key(*k)).count();
            let actual = delta.as_ref().and_then(Delta::as_changes).map_or(0, ChangeSet::len);
            prop_assert_eq!(actual, expected);
        }
    }
}
