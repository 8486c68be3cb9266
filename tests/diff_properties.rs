//! Property tests over the public diff and overlap APIs.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use serde_json::{Map, Value as Json};

use fixture_reconciler::core::config::DiffConfig;
use fixture_reconciler::diff::{ChangeKind, Delta, DiffEngine, Value};
use fixture_reconciler::table::overlap::{append_compressed_by, overlap_len};

fn arb_json() -> impl Strategy<Value = Json> {
    let leaf = prop_oneof![
        Just(Json::Null),
        any::<bool>().prop_map(Json::Bool),
        any::<i64>().prop_map(Json::from),
        "[a-z]{0,5}".prop_map(Json::String),
    ];
    leaf.prop_recursive(3, 24, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..5).prop_map(Json::Array),
            prop::collection::vec(("[a-e]{1,2}", inner), 0..5)
                .prop_map(|pairs| Json::Object(pairs.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn int_map(entries: &BTreeMap<String, i64>) -> Value {
    Value::map(entries.iter().map(|(k, v)| (k.clone(), Value::Int(*v))))
}

proptest! {
    #[test]
    fn json_values_never_differ_from_themselves(json in arb_json()) {
        let value = Value::from(json);
        prop_assert!(DiffEngine::default().diff(Some(&value), Some(&value)).is_none());
    }

    #[test]
    fn against_nothing_every_key_is_added(
        right in prop::collection::btree_map("[a-f]{1,3}", any::<i64>(), 0..6),
    ) {
        let delta = DiffEngine::default().diff(None, Some(&int_map(&right)));
        match delta {
            None => prop_assert!(right.is_empty()),
            Some(delta) => {
                let changes = delta.as_changes().unwrap();
                let keys: BTreeSet<String> = changes.keys().into_iter().collect();
                prop_assert_eq!(keys, right.keys().cloned().collect::<BTreeSet<_>>());
                prop_assert!(changes.entries().iter().all(|e| e.change == ChangeKind::Added));
            }
        }
    }

    #[test]
    fn sorted_layout_renders_keys_in_order(
        left in prop::collection::btree_map("[a-f]{1,3}", 0i64..3, 0..6),
        right in prop::collection::btree_map("[a-f]{1,3}", 0i64..3, 0..6),
    ) {
        let engine = DiffEngine::new(DiffConfig { sort: true, change_type: true, ..DiffConfig::default() });
        if let Some(Delta::Changes(changes)) = engine.diff(Some(&int_map(&left)), Some(&int_map(&right))) {
            let keys = changes.keys();
            let mut sorted = keys.clone();
            sorted.sort();
            prop_assert_eq!(keys, sorted);
        }
    }

    #[test]
    fn shared_run_is_always_found(
        x in prop::collection::vec(0u8..3, 0..5),
        y in prop::collection::vec(0u8..3, 0..5),
        z in prop::collection::vec(0u8..3, 0..5),
    ) {
        let tail = [x.as_slice(), y.as_slice()].concat();
        let head = [y.as_slice(), z.as_slice()].concat();
        let found = overlap_len(&tail, &head);
        prop_assert!(found >= y.len());
        prop_assert!(found <= tail.len().min(head.len()));
        prop_assert_eq!(&tail[tail.len() - found..], &head[..found]);
    }

    #[test]
    fn compressed_history_never_repeats_the_shared_run(
        history in prop::collection::vec(0u8..3, 0..6),
        incoming in prop::collection::vec(0u8..3, 0..6),
    ) {
        let mut merged = history.clone();
        append_compressed_by(&mut merged, &incoming, |a, b| a == b);
        prop_assert!(merged.starts_with(&history));
        prop_assert!(merged.ends_with(&incoming));
        prop_assert_eq!(merged.len(), history.len() + incoming.len() - overlap_len(&history, &incoming));
    }
}

#[test]
fn deleted_rows_are_tagged_when_change_types_are_on() {
    let engine = DiffEngine::new(DiffConfig {
        change_type: true,
        ..DiffConfig::default()
    });
    let before = Value::from(serde_json::json!({"1": {"total": 5}, "2": {"total": 7}}));
    let after = Value::from(serde_json::json!({"1": {"total": 6}}));
    let delta = engine.diff(Some(&before), Some(&after)).unwrap();
    let changes = delta.as_changes().unwrap();
    assert_eq!(changes.get("1").unwrap().change, ChangeKind::Changed);
    assert_eq!(changes.get("2").unwrap().change, ChangeKind::Deleted);
    assert!(changes.get("2").unwrap().value.is_none());
}
