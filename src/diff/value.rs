//! Dynamic value model consumed by the structural diff engine.
//!
//! Snapshots from every backing store are lowered into [`Value`] trees. Structured
//! types take part through the [`Record`] trait, which declares their fields
//! explicitly instead of relying on runtime introspection.

#![allow(missing_docs)]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasher;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Insertion-ordered map used for map-like values.
pub type ValueMap = IndexMap<Key, Value>;

/// Hashable map key. Non-string keys are flattened by the per-depth key renderer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Bool(bool),
    Int(i64),
    /// Arbitrary-precision number kept in its textual form.
    Decimal(String),
    Text(String),
}

impl Key {
    /// Canonical string form: text as-is, numbers in plain decimal notation
    /// without trailing fractional zeros.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Decimal(raw) => canonical_decimal(raw),
            Self::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// Strip trailing fractional zeros (`"1.500"` → `"1.5"`, `"2.00"` → `"2"`).
#[must_use]
pub fn canonical_decimal(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.contains('.') || trimmed.contains(['e', 'E']) {
        return trimmed.to_string();
    }
    let without_zeros = trimmed.trim_end_matches('0');
    let plain = without_zeros.strip_suffix('.').unwrap_or(without_zeros);
    if plain == "-0" {
        "0".to_string()
    } else {
        plain.to_string()
    }
}

/// A record-like value: named fields in declaration order.
#[derive(Debug, Clone)]
pub struct RecordValue {
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
    /// Fields that define the type's own equality. `None` means structural equality.
    pub identity: Option<Vec<String>>,
}

/// Generic nested value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Seq(Vec<Value>),
    Map(ValueMap),
    Record(RecordValue),
}

/// Declared-field accessor for structured types.
pub trait Record {
    /// Stable type name; records of different types never diff field-by-field.
    fn type_name(&self) -> &'static str;

    /// Field values in declaration order.
    fn fields(&self) -> Vec<(&'static str, Value)>;

    /// Fields that make up the type's own equality, if it has one.
    fn identity_fields(&self) -> Option<&'static [&'static str]> {
        None
    }
}

/// Conversion into [`Value`].
pub trait ToValue {
    fn to_value(&self) -> Value;
}

impl Value {
    /// Lower a [`Record`] implementor.
    pub fn record<R: Record + ?Sized>(record: &R) -> Self {
        Self::Record(RecordValue {
            type_name: record.type_name().to_string(),
            fields: record
                .fields()
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
            identity: record
                .identity_fields()
                .map(|ids| ids.iter().map(|s| (*s).to_string()).collect()),
        })
    }

    /// Build a map value from `(key, value)` pairs, preserving order.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<Key>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Default scalar classification: everything that is not a container or record.
    pub const fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Null
                | Self::Bool(_)
                | Self::Int(_)
                | Self::Float(_)
                | Self::Decimal(_)
                | Self::Text(_)
                | Self::Bytes(_)
        )
    }

    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Self::Seq(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a map entry or record field by string key.
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(m) => m.get(&Key::Text(key.to_string())),
            Self::Record(r) => r.fields.get(key),
            _ => None,
        }
    }

    /// Equality used by the diff engine: a record's own equality when it
    /// declares identity fields, full structural equality otherwise.
    pub fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (Self::Decimal(a), Self::Decimal(b)) => canonical_decimal(a) == canonical_decimal(b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Seq(a), Self::Seq(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equivalent(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.equivalent(other)))
            }
            (Self::Record(a), Self::Record(b)) => {
                if a.type_name != b.type_name {
                    return false;
                }
                match &a.identity {
                    Some(ids) => ids.iter().all(|id| match (a.fields.get(id), b.fields.get(id)) {
                        (Some(x), Some(y)) => x.equivalent(y),
                        (None, None) => true,
                        _ => false,
                    }),
                    None => {
                        a.fields.len() == b.fields.len()
                            && a.fields.iter().all(|(k, v)| {
                                b.fields.get(k).is_some_and(|other| v.equivalent(other))
                            })
                    }
                }
            }
            _ => false,
        }
    }

    /// Plain string rendering used by string-valued change-set layouts.
    pub fn render(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Decimal(d) => canonical_decimal(d),
            Self::Text(s) => s.clone(),
            Self::Bytes(b) => b.iter().map(|byte| format!("{byte:02x}")).collect(),
            Self::Seq(_) | Self::Map(_) | Self::Record(_) => self.to_json().to_string(),
        }
    }

    /// JSON rendering for journals and recorded outcomes.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Self::Null => J::Null,
            Self::Bool(b) => J::Bool(*b),
            Self::Int(i) => J::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
            Self::Decimal(d) => J::String(canonical_decimal(d)),
            Self::Text(s) => J::String(s.clone()),
            Self::Bytes(_) => J::String(self.render()),
            Self::Seq(items) => J::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(m) => J::Object(m.iter().map(|(k, v)| (k.render(), v.to_json())).collect()),
            Self::Record(r) => J::Object(
                r.fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as J;
        match value {
            J::Null => Self::Null,
            J::Bool(b) => Self::Bool(b),
            J::Number(n) => n.as_i64().map_or_else(
                || n.as_f64().map_or_else(|| Self::Decimal(n.to_string()), Self::Float),
                Self::Int,
            ),
            J::String(s) => Self::Text(s),
            J::Array(items) => Self::Seq(items.into_iter().map(Self::from).collect()),
            J::Object(obj) => Self::Map(
                obj.into_iter()
                    .map(|(k, v)| (Key::Text(k), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

// ──────────────────── ToValue impls ────────────────────

impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl ToValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! int_to_value {
    ($($t:ty),*) => {
        $(impl ToValue for $t {
            fn to_value(&self) -> Value {
                Value::Int(i64::from(*self))
            }
        })*
    };
}

int_to_value!(i8, i16, i32, i64, u8, u16, u32);

impl ToValue for u64 {
    fn to_value(&self) -> Value {
        i64::try_from(*self).map_or_else(|_| Value::Decimal(self.to_string()), Value::Int)
    }
}

impl ToValue for usize {
    fn to_value(&self) -> Value {
        i64::try_from(*self).map_or_else(|_| Value::Decimal(self.to_string()), Value::Int)
    }
}

impl ToValue for f64 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
}

impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Text(self.to_string())
    }
}

impl ToValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ToValue::to_value)
    }
}

impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::Seq(self.iter().map(ToValue::to_value).collect())
    }
}

impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        self.as_slice().to_value()
    }
}

impl<K, V> ToValue for BTreeMap<K, V>
where
    K: Clone + Into<Key>,
    V: ToValue,
{
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone().into(), v.to_value()))
                .collect(),
        )
    }
}

impl<K, V, S> ToValue for HashMap<K, V, S>
where
    K: Clone + Into<Key>,
    V: ToValue,
    S: BuildHasher,
{
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.clone().into(), v.to_value()))
                .collect(),
        )
    }
}
