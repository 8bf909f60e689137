//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SorcerError};

pub const ENV_LOOKUP_TIMEOUT_MS: &str = "SORCER_LOOKUP_TIMEOUT_MS";
pub const ENV_INVOKE_TIMEOUT_MS: &str = "SORCER_INVOKE_TIMEOUT_MS";
pub const ENV_PROVISIONING: &str = "SORCER_PROVISIONING";
pub const ENV_QUEUE_DEPTH: &str = "SORCER_QUEUE_DEPTH";

/// Tunables of a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on one discovery lookup.
    pub lookup_timeout_ms: u64,
    /// Upper bound on one remote invocation.
    pub invoke_timeout_ms: u64,
    /// Whether provisionable signatures may trigger provisioning.
    pub provisioning: bool,
    /// Capacity of the resolution worker's request queue.
    pub queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 5_000,
            invoke_timeout_ms: 30_000,
            provisioning: true,
            queue_depth: 64,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `SORCER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_LOOKUP_TIMEOUT_MS) {
            config.lookup_timeout_ms = parse(ENV_LOOKUP_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_INVOKE_TIMEOUT_MS) {
            config.invoke_timeout_ms = parse(ENV_INVOKE_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_PROVISIONING) {
            config.provisioning = parse_flag(ENV_PROVISIONING, &raw)?;
        }
        if let Some(raw) = lookup(ENV_QUEUE_DEPTH) {
            config.queue_depth = parse(ENV_QUEUE_DEPTH, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(SorcerError::config("queue_depth must be at least 1"));
        }
        if self.lookup_timeout_ms == 0 {
            return Err(SorcerError::config("lookup_timeout_ms must be positive"));
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_millis(self.invoke_timeout_ms)
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SorcerError::config(format!("{key}: invalid value '{raw}'")))
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SorcerError::config(format!("{key}: invalid flag '{raw}'"))),
    }
}
