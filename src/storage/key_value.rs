//! Key-value stores: backend contract and an in-memory implementation.

#![allow(missing_docs)]

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::core::errors::Result;
use crate::diff::value::{Key, Value};

pub trait KeyValueBackend {
    fn put(&mut self, key: &str, value: &serde_json::Value) -> Result<()>;

    fn remove(&mut self, key: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    /// Key → value, in the backend's natural order.
    fn snapshot(&self) -> Result<Value>;
}

type Entries = Arc<Mutex<IndexMap<String, serde_json::Value>>>;

/// Process-local store. Clones of [`handle`](Self::handle) let application
/// code under test read and write the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueBackend {
    entries: Entries,
}

impl MemoryKeyValueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueBackend for MemoryKeyValueBackend {
    fn put(&mut self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.lock().shift_remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    fn snapshot(&self) -> Result<Value> {
        let entries = self.entries.lock();
        Ok(Value::Map(
            entries
                .iter()
                .map(|(k, v)| (Key::Text(k.clone()), Value::from(v.clone())))
                .collect(),
        ))
    }
}

pub struct KeyValueStore {
    name: String,
    backend: Box<dyn KeyValueBackend>,
}

impl std::fmt::Debug for KeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValueStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl KeyValueStore {
    pub fn new(name: impl Into<String>, backend: impl KeyValueBackend + 'static) -> Self {
        Self {
            name: name.into(),
            backend: Box::new(backend),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clear(&mut self) -> Result<()> {
        self.backend.clear()
    }

    pub fn put_all<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a String, &'a serde_json::Value)>,
    {
        for (key, value) in entries {
            self.backend.put(key, value)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        self.backend.remove(key)
    }

    pub fn snapshot(&self) -> Result<Value> {
        self.backend.snapshot()
    }
}
