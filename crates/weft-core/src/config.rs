//! Store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding `lock_timeout` (milliseconds).
pub const LOCK_TIMEOUT_ENV: &str = "WEFT_LOCK_TIMEOUT_MS";

/// Settings for a `WorkflowStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long `lock_workflow` waits for the row lock before giving up.
    #[serde(with = "millis", rename = "lock_timeout_ms")]
    pub lock_timeout: Duration,
}

impl StoreConfig {
    /// Default settings (5s lock timeout, like a typical RDB lock wait).
    pub fn default_v1() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Defaults, overridden by `WEFT_LOCK_TIMEOUT_MS` when it is set and valid.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default_v1();
        if let Some(raw) = lookup(LOCK_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.lock_timeout = Duration::from_millis(ms),
                Err(err) => tracing::warn!(
                    value = %raw,
                    error = %err,
                    "ignoring invalid {LOCK_TIMEOUT_ENV}"
                ),
            }
        }
        config
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::default_v1()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
