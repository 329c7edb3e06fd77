//! Shared flow state.
//!
//! [`FlowState`] is the key/value store shared by every job of one workflow
//! run. A fresh instance is created for each run and handed to state-aware
//! jobs; its contents are returned in the
//! [`ExecutionResult`](crate::ExecutionResult) once the run ends.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::Result;

/// Thread-safe key/value store shared by the jobs of a single run.
///
/// Cloning a `FlowState` yields another handle to the same store. Every
/// method takes the internal lock for the duration of the call only; no
/// method runs caller code while holding it.
///
/// Concurrent writes to the same key are last-writer-wins.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::FlowState;
///
/// let state = FlowState::new();
/// state.set("topic", "rust");
/// state.set("retries", 3);
///
/// assert_eq!(state.get_string("topic"), Some("rust".to_string()));
/// assert_eq!(state.get_int("retries"), Some(3));
/// assert_eq!(state.get_int("missing"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl FlowState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().insert(key.into(), value.into());
    }

    /// Serialize `value` to JSON and store it under `key`.
    pub fn set_json<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.write().insert(key.into(), value);
        Ok(())
    }

    /// Get a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Get a string value. Returns `None` if missing or not a string.
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Get an integer value. Returns `None` if missing or not an integer.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.read().get(key).and_then(Value::as_i64)
    }

    /// Get a numeric value as `f64`. Integers are widened.
    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.read().get(key).and_then(Value::as_f64)
    }

    /// Get a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.read().get(key).and_then(Value::as_bool)
    }

    /// Get a copy of an array value.
    pub fn get_slice(&self, key: &str) -> Option<Vec<Value>> {
        self.read().get(key).and_then(Value::as_array).cloned()
    }

    /// Deserialize the value under `key` into `T`.
    ///
    /// Returns `None` if the key is missing or the value does not fit `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        serde_json::from_value(value).ok()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Remove and return the value under `key`.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    /// Atomically replace the value under `key` with `f(current)`.
    ///
    /// `f` runs outside the lock, so it may read this state freely. If
    /// another writer changes the key in the meantime, `f` is called again
    /// with the fresh value; it should therefore be free of side effects.
    ///
    /// ```rust
    /// use llm_jobflow::FlowState;
    /// use serde_json::{json, Value};
    ///
    /// let state = FlowState::new();
    /// let bump = |v: Option<&Value>| json!(v.and_then(Value::as_i64).unwrap_or(0) + 1);
    /// state.update("count", bump);
    /// state.update("count", bump);
    /// assert_eq!(state.get_int("count"), Some(2));
    /// ```
    pub fn update<F>(&self, key: impl Into<String>, mut f: F) -> Value
    where
        F: FnMut(Option<&Value>) -> Value,
    {
        let key = key.into();
        loop {
            let current = self.get(&key);
            let next = f(current.as_ref());

            let mut map = self.write();
            if map.get(&key) == current.as_ref() {
                map.insert(key, next.clone());
                return next;
            }
        }
    }

    /// A snapshot of the keys currently present, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    /// A copy of the whole store.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
