//! # Runtime configuration
//!
//! A minimal string key/value store. The excluded configuration layer
//! (XML, annotations, files) fills it in; the engines only read typed values
//! from a [`ConfigSnapshot`].
//!
//! ```rust
//! use bean_core::BeanConfig;
//!
//! let mut config = BeanConfig::new();
//! config.set("queue.max_jobs", "50");
//!
//! let snapshot = config.snapshot();
//! assert_eq!(snapshot.get_usize("queue.max_jobs"), Some(50));
//! ```
//!
//! ## Environment overrides
//! [`BeanConfig::load_env`] copies every variable carrying a prefix into the
//! store, lowercasing it and turning `__` into `.`:
//!
//! ```bash
//! export BEAN__QUEUE__MAX_JOBS=25   # queue.max_jobs = 25
//! ```

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct BeanConfig {
    values: HashMap<String, String>,
}

impl BeanConfig {
    /// Create an empty config store.
    pub fn new() -> Self {
        Self {
            values: HashMap::new(),
        }
    }

    /// Set a configuration key to a string value.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.values.insert(key.into(), value.into());
    }

    /// Get a configuration value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Check whether a key is present.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Load overrides from the process environment.
    ///
    /// `prefix` is matched verbatim, e.g. `"BEAN__"`.
    pub fn load_env(&mut self, prefix: &str) {
        self.load_vars(prefix, std::env::vars());
    }

    /// Same as [`load_env`](Self::load_env) but over an explicit variable list.
    pub fn load_vars<I>(&mut self, prefix: &str, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(prefix) {
                let normalized = stripped.to_lowercase().replace("__", ".");
                self.set(normalized, value);
            }
        }
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(self.values.clone())
    }
}

/// Immutable view handed to the engines at construction time.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    map: HashMap<String, String>,
}

impl ConfigSnapshot {
    pub(crate) fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(|s| s.as_str())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse::<u32>().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.parse::<bool>().ok())
    }
}
