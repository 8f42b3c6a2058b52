//! Queue configuration (one per task kind).
//!
//! Static per deployment. Values come from `Default`/`for_kind`, optionally
//! overridden by environment variables:
//!
//! | variable                                 | field               |
//! |------------------------------------------|---------------------|
//! | `TASKSTREAM_<KIND>_STREAM_KEY`           | `stream_key`        |
//! | `TASKSTREAM_<KIND>_GROUP`                | `group`             |
//! | `TASKSTREAM_<KIND>_CONSUMER_PREFIX`      | `consumer_prefix`   |
//! | `TASKSTREAM_<KIND>_BATCH_SIZE`           | `batch_size`        |
//! | `TASKSTREAM_<KIND>_BLOCK_TIMEOUT_MS`     | `block_timeout_ms`  |
//! | `TASKSTREAM_<KIND>_STREAM_MAX_LEN`       | `stream_max_len`    |
//! | `TASKSTREAM_<KIND>_MAX_RETRY`            | `max_retry`         |
//! | `TASKSTREAM_<KIND>_REQUEUE_ATTEMPTS`     | `requeue_attempts`  |
//! | `TASKSTREAM_<KIND>_SHUTDOWN_GRACE_MS`    | `shutdown_grace_ms` |
//!
//! `<KIND>` is `VECTORIZE` or `ANALYZE`.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::TaskKind;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_STREAM_MAX_LEN: usize = 10_000;
pub const DEFAULT_MAX_RETRY: u32 = 3;
pub const DEFAULT_REQUEUE_ATTEMPTS: u32 = 1;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: `{value}` ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub stream_key: String,
    pub group: String,
    pub consumer_prefix: String,

    /// Max messages per blocking read.
    pub batch_size: usize,

    /// Upper bound of one blocking read, and therefore of shutdown latency.
    /// `0` blocks without timeout (shutdown still interrupts the read).
    pub block_timeout_ms: u64,

    /// Approximate trim bound passed to every append. `0` disables trimming.
    pub stream_max_len: usize,

    /// Requeues allowed per task.
    pub max_retry: u32,

    /// Attempts made at appending a retry descriptor before the task is
    /// marked FAILED. `1` means no local retry.
    pub requeue_attempts: u32,

    /// How long `stop()` waits for the worker before aborting it.
    pub shutdown_grace_ms: u64,
}

impl QueueConfig {
    pub fn for_kind(kind: TaskKind) -> Self {
        Self {
            stream_key: kind.default_stream_key().to_string(),
            group: kind.default_group().to_string(),
            consumer_prefix: kind.default_consumer_prefix().to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            block_timeout_ms: DEFAULT_BLOCK_TIMEOUT_MS,
            stream_max_len: DEFAULT_STREAM_MAX_LEN,
            max_retry: DEFAULT_MAX_RETRY,
            requeue_attempts: DEFAULT_REQUEUE_ATTEMPTS,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
        }
    }

    /// `for_kind(kind)` overridden by `TASKSTREAM_<KIND>_*` variables.
    pub fn from_env(kind: TaskKind) -> Result<Self, ConfigError> {
        Self::from_lookup(kind, |key| std::env::var(key).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(kind: TaskKind, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = format!("TASKSTREAM_{}_", kind.as_str().to_ascii_uppercase());
        let var = |name: &str| {
            let key = format!("{prefix}{name}");
            lookup(&key).map(|value| (key, value))
        };

        let mut config = Self::for_kind(kind);
        if let Some((_, v)) = var("STREAM_KEY") {
            config.stream_key = v;
        }
        if let Some((_, v)) = var("GROUP") {
            config.group = v;
        }
        if let Some((_, v)) = var("CONSUMER_PREFIX") {
            config.consumer_prefix = v;
        }
        if let Some((k, v)) = var("BATCH_SIZE") {
            config.batch_size = parse(&k, &v)?;
        }
        if let Some((k, v)) = var("BLOCK_TIMEOUT_MS") {
            config.block_timeout_ms = parse(&k, &v)?;
        }
        if let Some((k, v)) = var("STREAM_MAX_LEN") {
            config.stream_max_len = parse(&k, &v)?;
        }
        if let Some((k, v)) = var("MAX_RETRY") {
            config.max_retry = parse(&k, &v)?;
        }
        if let Some((k, v)) = var("REQUEUE_ATTEMPTS") {
            config.requeue_attempts = parse(&k, &v)?;
        }
        if let Some((k, v)) = var("SHUTDOWN_GRACE_MS") {
            config.shutdown_grace_ms = parse(&k, &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream_key.trim().is_empty() {
            return Err(ConfigError::Empty("stream_key"));
        }
        if self.group.trim().is_empty() {
            return Err(ConfigError::Empty("group"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Zero("batch_size"));
        }
        if self.requeue_attempts == 0 {
            return Err(ConfigError::Zero("requeue_attempts"));
        }
        Ok(())
    }

    pub fn block_timeout(&self) -> Duration {
        Duration::from_millis(self.block_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::for_kind(TaskKind::Vectorize)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}
