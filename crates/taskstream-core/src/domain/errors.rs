//! Errors - 失敗の分類
//!
//! - 一時的 (transient): handler の失敗 → requeue
//! - 恒久的 (permanent): 壊れたメッセージ → ack して捨てる
//! - インフラ (infrastructure): transport / status store の障害

use thiserror::Error;

/// Failure of the stream transport (broker unreachable, command rejected, ...).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("transport connection error: {0}")]
    Connection(String),

    #[error("transport command error: {0}")]
    Command(String),

    #[error("consumer group `{group}` does not exist on stream `{stream}`")]
    NoSuchGroup { stream: String, group: String },

    #[error("unexpected transport reply: {0}")]
    Protocol(String),
}

/// Failure reported by a task handler.
///
/// Every handler failure is treated as transient and goes through the retry
/// policy; the handler has no way to short-circuit retries.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Failure of the status store.
#[derive(Debug, Clone, Error)]
#[error("status store error: {0}")]
pub struct StatusStoreError(pub String);

/// Returned by `Producer::enqueue` when the task could not be appended.
/// The status record has already been set to FAILED when this is returned.
#[derive(Debug, Clone, Error)]
#[error("enqueue failed for entity {entity_id}: {source}")]
pub struct EnqueueError {
    pub entity_id: super::EntityId,
    #[source]
    pub source: TransportError,
}
