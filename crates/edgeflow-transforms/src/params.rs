//! Helpers for reading transform parameter maps.
//!
//! The loader lowercases every key before a factory sees the map, so all
//! lookups here use lowercase keys.

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{ConfigurationError, Result};

pub fn required(params: &HashMap<String, String>, function: &str, key: &str) -> Result<String> {
    match params.get(key) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(ConfigurationError::MissingParameter {
            function: function.to_string(),
            parameter: key.to_string(),
        }),
    }
}

pub fn optional(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn bool_param(
    params: &HashMap<String, String>,
    function: &str,
    key: &str,
    default: bool,
) -> Result<bool> {
    match optional(params, key) {
        None => Ok(default),
        Some(v) => v
            .to_lowercase()
            .parse::<bool>()
            .map_err(|_| ConfigurationError::InvalidParameter {
                function: function.to_string(),
                parameter: key.to_string(),
                message: format!("{v} is not a boolean"),
            }),
    }
}

pub fn usize_param(
    params: &HashMap<String, String>,
    function: &str,
    key: &str,
    default: usize,
) -> Result<usize> {
    match optional(params, key) {
        None => Ok(default),
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| ConfigurationError::InvalidParameter {
                function: function.to_string(),
                parameter: key.to_string(),
                message: format!("{v} is not a count"),
            }),
    }
}

pub fn duration_param(
    params: &HashMap<String, String>,
    function: &str,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match optional(params, key) {
        None => Ok(default),
        Some(v) => {
            edgeflow_core::config::parse_duration(&v).ok_or(ConfigurationError::InvalidParameter {
                function: function.to_string(),
                parameter: key.to_string(),
                message: format!("{v} is not a duration"),
            })
        }
    }
}

/// Comma-separated list, trimmed, empty entries dropped.
pub fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fingerprint for a configured transform: name plus a short digest of the
/// parameters that affect its behavior. A parameter change therefore
/// changes the owning pipeline's hash and invalidates stored retries.
pub fn fingerprint(name: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    format!("{}:{}", name, hex::encode(&digest[..6]))
}
