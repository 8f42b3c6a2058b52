//! Retry controller: decides requeue vs. give up after a handler failure.
//!
//! Pure functions only. The consumer loop executes the decision (append / ack /
//! status update); nothing here touches the transport.
//!
//! Retries always go to the tail of the same stream. There is no separate
//! retry stream and no priority lane, so a retried task is processed after
//! everything enqueued before its failure.

use crate::domain::{HandlerError, TaskDescriptor};

/// `retry_count < max_retry`
pub fn should_retry(retry_count: u32, max_retry: u32) -> bool {
    retry_count < max_retry
}

/// Same `entity_id`/`content`, new `retry_count`.
pub fn next_descriptor(original: &TaskDescriptor, incremented_count: u32) -> TaskDescriptor {
    TaskDescriptor {
        entity_id: original.entity_id,
        content: original.content.clone(),
        retry_count: incremented_count,
    }
}

/// The next action for a failed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Append `next` to the stream tail, then ack the original.
    Requeue { next: TaskDescriptor },

    /// Mark FAILED with `reason`, then ack the original.
    GiveUp { reason: String },
}

/// Retry policy for failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of requeues allowed per task. A task is handled at most
    /// `max_retry + 1` times.
    pub max_retry: u32,
}

impl RetryPolicy {
    pub fn new(max_retry: u32) -> Self {
        Self { max_retry }
    }

    pub fn decide(&self, descriptor: &TaskDescriptor, error: &HandlerError) -> Decision {
        if should_retry(descriptor.retry_count, self.max_retry) {
            Decision::Requeue {
                next: next_descriptor(descriptor, descriptor.retry_count + 1),
            }
        } else {
            Decision::GiveUp {
                reason: format!(
                    "task failed after {} retries: {}",
                    descriptor.retry_count, error
                ),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRY)
    }
}
