// SPDX-License-Identifier: GPL-3.0-only

//! Flat key/value settings persistence
//!
//! Used for the last active camera source and the cumulative launch counters.
//! Values are stored as JSON scalars; there is no schema beyond key names
//! (see [`crate::constants::settings_keys`]).

use crate::errors::Result;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Key/value store shared across components
///
/// Implementors only provide raw value access; the typed accessors are
/// derived. Getters never fail: a missing key or a value of the wrong type
/// yields the supplied default.
pub trait SettingsStore: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
    fn put_value(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn contains(&self, key: &str) -> bool {
        self.get_value(key).is_some()
    }

    fn get_string(&self, key: &str, default: &str) -> String {
        match self.get_value(key) {
            Some(Value::String(s)) => s,
            _ => default.to_string(),
        }
    }

    fn put_string(&self, key: &str, value: &str) -> Result<()> {
        self.put_value(key, Value::String(value.to_string()))
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_value(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    fn put_bool(&self, key: &str, value: bool) -> Result<()> {
        self.put_value(key, Value::Bool(value))
    }

    fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get_value(key)
            .and_then(|v| v.as_i64())
            .unwrap_or(default)
    }

    fn put_int(&self, key: &str, value: i64) -> Result<()> {
        self.put_value(key, Value::from(value))
    }

    fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get_value(key)
            .and_then(|v| v.as_f64())
            .unwrap_or(default)
    }

    fn put_float(&self, key: &str, value: f64) -> Result<()> {
        self.put_value(key, Value::from(value))
    }
}

/// Settings kept only in memory
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: Mutex<Map<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettingsStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn put_value(&self, key: &str, value: Value) -> Result<()> {
        self.values.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().unwrap().remove(key);
        Ok(())
    }
}

/// Settings persisted as one flat JSON object
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct JsonSettingsStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonSettingsStore {
    /// Open the store at `path`; a missing or malformed file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Map<String, Value>>(&contents) {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Settings file malformed, starting empty");
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        };
        debug!(path = %path.display(), keys = values.len(), "Opened settings store");
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, values: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.values.lock().unwrap().get(key).cloned()
    }

    fn put_value(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        values.insert(key.to_string(), value);
        self.flush(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap();
        if values.remove(key).is_some() {
            self.flush(&values)?;
        }
        Ok(())
    }
}
