//! Named callbacks: table hooks and the `callbacks` fixture kind call into
//! application code through this registry.

#![allow(missing_docs)]

use indexmap::IndexMap;

use crate::core::errors::{FxrError, Result};

type Callback = Box<dyn Fn() -> Result<()>>;

struct Registered {
    callback: Callback,
    /// Stores the callback writes to; they are re-diffed after it runs.
    touches: Vec<String>,
}

#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: IndexMap<String, Registered>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CallbackRegistry {
    /// Register or replace a callback.
    pub fn register<F>(&mut self, name: impl Into<String>, callback: F)
    where
        F: Fn() -> Result<()> + 'static,
    {
        self.register_touching(name, Vec::<String>::new(), callback);
    }

    /// Register a callback that writes to the named data stores.
    pub fn register_touching<F, S>(
        &mut self,
        name: impl Into<String>,
        touches: impl IntoIterator<Item = S>,
        callback: F,
    ) where
        F: Fn() -> Result<()> + 'static,
        S: Into<String>,
    {
        self.callbacks.insert(
            name.into(),
            Registered {
                callback: Box::new(callback),
                touches: touches.into_iter().map(Into::into).collect(),
            },
        );
    }

    pub fn touched_stores(&self, name: &str) -> &[String] {
        self.callbacks
            .get(name)
            .map(|entry| entry.touches.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.callbacks.keys().map(String::as_str).collect()
    }

    /// Fail with `UnknownCallback` unless `name` is registered.
    pub fn require(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            Ok(())
        } else {
            Err(FxrError::UnknownCallback {
                name: name.to_string(),
            })
        }
    }

    pub fn invoke(&self, name: &str) -> Result<()> {
        let entry = self
            .callbacks
            .get(name)
            .ok_or_else(|| FxrError::UnknownCallback {
                name: name.to_string(),
            })?;
        (entry.callback)().map_err(|err| FxrError::Hook {
            name: name.to_string(),
            details: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn invoke_runs_the_registered_callback() {
        let hits = Rc::new(Cell::new(0));
        let mut registry = CallbackRegistry::default();
        let counter = Rc::clone(&hits);
        registry.register("reload", move || {
            counter.set(counter.get() + 1);
            Ok(())
        });
        registry.invoke("reload").unwrap();
        registry.invoke("reload").unwrap();
        assert_eq!(hits.get(), 2);
        assert_eq!(registry.names(), ["reload"]);
    }

    #[test]
    fn unknown_and_failing_callbacks_are_typed() {
        let mut registry = CallbackRegistry::default();
        registry.register("broken", || {
            Err(FxrError::Runtime {
                details: "cache offline".to_string(),
            })
        });
        assert_eq!(registry.invoke("missing").unwrap_err().code(), "FXR-2004");
        let err = registry.invoke("broken").unwrap_err();
        assert_eq!(err.code(), "FXR-2103");
        assert!(err.to_string().contains("cache offline"));
        assert!(registry.require("broken").is_ok());
    }

    #[test]
    fn touched_stores_follow_the_registration() {
        let mut registry = CallbackRegistry::default();
        registry.register("plain", || Ok(()));
        registry.register_touching("warm", ["cache", "main"], || Ok(()));
        assert!(registry.touched_stores("plain").is_empty());
        assert_eq!(registry.touched_stores("warm"), ["cache", "main"]);
        assert!(registry.touched_stores("missing").is_empty());

        registry.register("warm", || Ok(()));
        assert!(registry.touched_stores("warm").is_empty());
    }
}
