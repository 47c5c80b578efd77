//! Secret providers

use std::collections::BTreeMap;
use std::fmt;

/// Prefix for secrets read from the process environment
pub const ENV_SECRET_PREFIX: &str = "FLOWRUN_SECRET_";

/// Source of named secret values
pub trait SecretProvider: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;

    /// Names this provider knows about, used to pre-register values for masking
    fn names(&self) -> Vec<String>;
}

/// Secrets held in memory
///
/// `Debug` prints only the names.
#[derive(Clone, Default)]
pub struct StaticSecrets {
    values: BTreeMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl fmt::Debug for StaticSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticSecrets")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretProvider for StaticSecrets {
    fn get(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// Secrets read from `FLOWRUN_SECRET_<NAME>` environment variables
#[derive(Debug, Clone)]
pub struct EnvSecrets {
    prefix: String,
}

impl EnvSecrets {
    pub fn new() -> Self {
        Self::with_prefix(ENV_SECRET_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvSecrets {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProvider for EnvSecrets {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, name)).ok()
    }

    fn names(&self) -> Vec<String> {
        std::env::vars()
            .filter_map(|(key, _)| key.strip_prefix(&self.prefix).map(str::to_string))
            .collect()
    }
}
