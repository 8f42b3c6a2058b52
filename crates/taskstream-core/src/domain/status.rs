//! Task status (外部ストアが持つ状態レコード).
//!
//! State transitions:
//! - Pending -> Processing -> Completed
//! - Pending -> Processing -> Failed
//! - Pending -> Failed (enqueue failed)
//!
//! Redelivery may move a record from a terminal state back to Processing;
//! writes are last-write-wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::EntityId;

/// Column width of the error field in the status store.
pub const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Processing => "PROCESSING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status row owned by the external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub entity_id: EntityId,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Row as created by the caller before enqueue.
    pub fn pending(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            status: TaskStatus::Pending,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Overwrite status and error. `None` clears the error.
    pub fn apply(&mut self, status: TaskStatus, error: Option<&str>) {
        self.status = status;
        self.error = error.map(truncate_error);
        self.updated_at = Utc::now();
    }
}

/// Cut `error` down to at most [`MAX_ERROR_LEN`] characters.
///
/// Counts chars, not bytes, so multi-byte messages are never split mid-codepoint.
pub fn truncate_error(error: &str) -> String {
    match error.char_indices().nth(MAX_ERROR_LEN) {
        Some((byte_idx, _)) => error[..byte_idx].to_string(),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_error_is_cut_to_exactly_500_chars() {
        let long = "e".repeat(1200);
        let cut = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_LEN);
    }

    #[test]
    fn short_error_is_untouched() {
        assert_eq!(truncate_error("boom"), "boom");
        let exact = "x".repeat(MAX_ERROR_LEN);
        assert_eq!(truncate_error(&exact), exact);
    }

    #[test]
    fn truncation_respects_multibyte_chars() {
        let long = "失".repeat(MAX_ERROR_LEN + 10);
        let cut = truncate_error(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_LEN);
        assert_eq!(cut.len(), MAX_ERROR_LEN * "失".len());
    }

    #[test]
    fn apply_overwrites_and_clears_error() {
        let mut record = StatusRecord::pending(EntityId::new(1));
        record.apply(TaskStatus::Failed, Some("bad"));
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("bad"));

        record.apply(TaskStatus::Completed, None);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.error, None);
    }

    #[test]
    fn status_serializes_as_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }
}
