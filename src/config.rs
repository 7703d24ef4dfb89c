//! Configuration for the Ingestion Core
//!
//! Two kinds of configuration cross the boundary:
//! - `IngestConfig`: tuning knobs for flushing and retry, loadable from TOML.
//! - `ProfileConfig`: the opaque flat map of connection/auth parameters
//!   (e.g. `profile.json`); the core only validates that required keys
//!   are present.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration for a client
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub flush: FlushConfig,
    pub retry: RetryConfig,
}

impl IngestConfig {
    /// Load from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| IngestError::InvalidConfig(e.to_string()))
    }

    /// Configuration for testing (small thresholds, fast retries)
    pub fn test() -> Self {
        IngestConfig {
            flush: FlushConfig::test(),
            retry: RetryConfig::test(),
        }
    }
}

/// Flush scheduling thresholds for a channel's row buffer
///
/// A flush fires when ANY of the soft thresholds is reached: row count,
/// byte size, or age of the first unflushed append. The hard caps bound
/// memory; appends beyond them fail with `CapacityExceeded` until the
/// background flush drains the buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Row count that triggers a flush (default: 1000)
    pub max_rows: usize,
    /// Byte size that triggers a flush (default: 1MB)
    pub max_bytes: usize,
    /// Maximum time a row may sit unflushed (default: 1s)
    #[serde(with = "duration_millis")]
    pub max_latency: Duration,
    /// Hard cap on buffered rows before backpressure (default: 4x max_rows)
    pub max_buffered_rows: usize,
    /// Hard cap on buffered bytes before backpressure (default: 4x max_bytes)
    pub max_buffered_bytes: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        FlushConfig {
            max_rows: 1000,
            max_bytes: 1024 * 1024,
            max_latency: Duration::from_secs(1),
            max_buffered_rows: 4000,
            max_buffered_bytes: 4 * 1024 * 1024,
        }
    }
}

impl FlushConfig {
    /// Configuration for testing (tiny thresholds, short latency)
    pub fn test() -> Self {
        FlushConfig {
            max_rows: 10,
            max_bytes: 64 * 1024,
            max_latency: Duration::from_millis(20),
            max_buffered_rows: 40,
            max_buffered_bytes: 256 * 1024,
        }
    }

    /// Threshold on row count alone, other limits left generous
    pub fn rows(max_rows: usize) -> Self {
        FlushConfig {
            max_rows,
            max_buffered_rows: max_rows.saturating_mul(4),
            ..Default::default()
        }
    }
}

/// Exponential backoff policy for transient upload failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay (default: 50ms)
    #[serde(with = "duration_millis")]
    pub initial_backoff: Duration,
    /// Backoff ceiling (default: 5s)
    #[serde(with = "duration_millis")]
    pub max_backoff: Duration,
    /// Backoff multiplier per attempt (default: 2.0)
    pub multiplier: f64,
    /// Transient attempts before the failure escalates to permanent
    /// (default: 10)
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
            max_attempts: 10,
        }
    }
}

impl RetryConfig {
    /// Configuration for testing (near-instant retries)
    pub fn test() -> Self {
        RetryConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }

    /// Backoff delay before the given retry attempt (0-based), capped
    /// at `max_backoff`. Jitter is applied by the uploader.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64;
        let scaled = base * self.multiplier.powi(attempt as i32);
        let capped = scaled.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Opaque connection/auth parameters as a flat string-to-string map
///
/// Mirrors the profile-file convention of managed ingestion services:
/// a single JSON object whose values are all treated as strings. Scalar
/// values of other JSON types are coerced to their string form.
#[derive(Debug, Clone, Default)]
pub struct ProfileConfig {
    values: HashMap<String, String>,
}

impl ProfileConfig {
    /// Parse from a JSON object string
    pub fn from_json_str(raw: &str) -> Result<Self, IngestError> {
        let root: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| IngestError::InvalidConfig(e.to_string()))?;
        let obj = root
            .as_object()
            .ok_or_else(|| IngestError::InvalidConfig("profile is not a JSON object".into()))?;

        let mut values = HashMap::with_capacity(obj.len());
        for (key, value) in obj {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Null => String::new(),
                other => {
                    return Err(IngestError::InvalidConfig(format!(
                        "profile key {} has non-scalar value: {}",
                        key, other
                    )))
                }
            };
            values.insert(key.clone(), text);
        }
        Ok(ProfileConfig { values })
    }

    /// Read and parse a profile file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Build directly from key/value pairs (tests, embedding callers)
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        ProfileConfig {
            values: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up a key, failing with `MissingConfig` if absent or empty
    pub fn require(&self, key: &str) -> Result<&str, IngestError> {
        match self.values.get(key) {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(IngestError::MissingConfig(key.to_string())),
        }
    }

    /// Validate that every required key is present
    pub fn validate_required(&self, keys: &[&str]) -> Result<(), IngestError> {
        for key in keys {
            self.require(key)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Serde helper for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
