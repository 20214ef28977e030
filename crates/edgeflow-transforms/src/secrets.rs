//! Secret provider seam.
//!
//! Export and encryption transforms take their credentials through this
//! trait so the service can plug in whatever secret backend it runs with.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{ConfigurationError, Result};

/// Read-only access to named secrets, grouped by path.
pub trait SecretProvider: Send + Sync {
    /// Look up one secret value under a path.
    fn secret(&self, path: &str, key: &str) -> Result<String>;
}

/// In-memory secret store.
#[derive(Default)]
pub struct InMemorySecretProvider {
    secrets: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemorySecretProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a secret value under a path.
    pub fn insert(&self, path: &str, key: &str, value: impl Into<String>) {
        self.secrets
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }
}

impl SecretProvider for InMemorySecretProvider {
    fn secret(&self, path: &str, key: &str) -> Result<String> {
        self.secrets
            .read()
            .get(path)
            .and_then(|m| m.get(key))
            .cloned()
            .ok_or_else(|| ConfigurationError::Secret(format!("{path}/{key} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let provider = InMemorySecretProvider::new();
        provider.insert("mqtt", "password", "hunter2");
        assert_eq!(provider.secret("mqtt", "password").unwrap(), "hunter2");
    }

    #[test]
    fn missing_secret_errors() {
        let provider = InMemorySecretProvider::new();
        assert!(provider.secret("mqtt", "password").is_err());
    }
}
