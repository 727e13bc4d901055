//! Lazily resolved effective configuration.
//!
//! Runtime overrides live in the store as dotted keys
//! (`translation.preferred = deepl`); the handle merges them onto the base
//! config on demand and exposes a fingerprint that changes with every
//! override edit, so dependent caches know when to refresh.

use std::sync::{Arc, RwLock};

use sha2::{Digest, Sha256};
use tracing::warn;

use crate::store::ConfigStore;

use super::types::Config;

pub struct ConfigHandle {
    base: RwLock<Config>,
    store: Arc<dyn ConfigStore>,
}

impl ConfigHandle {
    pub fn new(base: Config, store: Arc<dyn ConfigStore>) -> Arc<Self> {
        Arc::new(Self {
            base: RwLock::new(base),
            store,
        })
    }

    /// The effective config: base with store overrides applied.
    pub fn effective(&self) -> Config {
        let base = self.base.read().unwrap().clone();
        let overrides = match self.store.all() {
            Ok(overrides) => overrides,
            Err(e) => {
                warn!(error = %e, "cannot read config overrides");
                return base;
            }
        };
        if overrides.is_empty() {
            return base;
        }

        let mut value = match serde_json::to_value(&base) {
            Ok(value) => value,
            Err(_) => return base,
        };
        for (key, raw) in &overrides {
            set_dotted(&mut value, key, raw);
        }
        match serde_json::from_value(value) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "config overrides do not deserialize, using base");
                base
            }
        }
    }

    /// Persist one override and return the new fingerprint.
    pub fn set_override(&self, key: &str, value: &str) -> Result<String, crate::store::StoreError> {
        self.store.set(key, value)?;
        Ok(self.fingerprint())
    }

    pub fn clear_override(&self, key: &str) -> Result<String, crate::store::StoreError> {
        self.store.delete(key)?;
        Ok(self.fingerprint())
    }

    /// Stable digest over base config + sorted overrides.
    pub fn fingerprint(&self) -> String {
        let base = self.base.read().unwrap();
        let mut hasher = Sha256::new();
        if let Ok(json) = serde_json::to_string(&*base) {
            hasher.update(json.as_bytes());
        }
        if let Ok(overrides) = self.store.all() {
            for (key, value) in overrides {
                hasher.update(key.as_bytes());
                hasher.update([0]);
                hasher.update(value.as_bytes());
                hasher.update([0]);
            }
        }
        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    /// Replace the base layer (config file reload).
    pub fn reload_base(&self, config: Config) {
        *self.base.write().unwrap() = config;
    }
}

/// Set a dotted path in a JSON tree, parsing the raw string as JSON when
/// possible and falling back to a plain string.
fn set_dotted(root: &mut serde_json::Value, key: &str, raw: &str) {
    let parsed = serde_json::from_str::<serde_json::Value>(raw)
        .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));

    let mut cursor = root;
    let parts: Vec<&str> = key.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            if let serde_json::Value::Object(map) = cursor {
                map.insert(part.to_string(), parsed);
            }
            return;
        }
        cursor = match cursor {
            serde_json::Value::Object(map) => map
                .entry(part.to_string())
                .or_insert_with(|| serde_json::Value::Object(Default::default())),
            _ => return,
        };
        if !cursor.is_object() {
            *cursor = serde_json::Value::Object(Default::default());
        }
    }
}
