//! Runtime feature flags.
//!
//! A flat map of string keys to scalar values, readable concurrently by
//! every component. Unknown keys are preserved so that configs written for
//! newer versions keep loading.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;

/// Flags the rollback manager force-disables during an emergency.
pub const EXPERIMENTAL_PREFIX: &str = "experimental_";

/// Concurrent feature-flag store.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    values: DashMap<String, Value>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a config map. Keys this crate does not recognize are kept
    /// verbatim.
    pub fn from_map(map: HashMap<String, Value>) -> Self {
        let flags = Self::new();
        for (key, value) in map {
            flags.values.insert(key, value);
        }
        flags
    }

    /// Boolean flag; absent or non-boolean reads as the given default.
    pub fn enabled(&self, key: &str, default: bool) -> bool {
        self.values
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Numeric flag; absent or non-numeric reads as the given default.
    pub fn number(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    /// String flag.
    pub fn string(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    /// Set or overwrite a flag at runtime.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Disable every flag whose key marks it experimental. Returns the keys
    /// that were flipped, for the rollback audit.
    pub fn disable_experimental(&self) -> Vec<String> {
        let mut flipped = Vec::new();
        for mut entry in self.values.iter_mut() {
            if entry.key().starts_with(EXPERIMENTAL_PREFIX) && entry.value().as_bool() == Some(true)
            {
                *entry.value_mut() = Value::Bool(false);
                flipped.push(entry.key().clone());
            }
        }
        flipped.sort();
        flipped
    }

    /// Snapshot of the full map, for configuration snapshots.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Replace the full map from a snapshot.
    pub fn restore(&self, map: HashMap<String, Value>) {
        self.values.clear();
        for (key, value) in map {
            self.values.insert(key, value);
        }
    }
}
