//! TaskDescriptor - stream に流すメッセージ本体
//!
//! wire 上は `field -> string` の map。フィールド名はローリングデプロイ中に
//! 新旧プロセスが混在しても読めるよう固定する。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::ids::EntityId;

pub const FIELD_ENTITY_ID: &str = "entity_id";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_RETRY_COUNT: &str = "retry_count";

/// Raw field map as stored by the transport.
pub type StreamFields = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid entity_id `{value}`: {reason}")]
    InvalidEntityId { value: String, reason: String },
}

/// Typed task payload with exactly three fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub entity_id: EntityId,
    pub content: String,
    pub retry_count: u32,
}

impl TaskDescriptor {
    /// First delivery of a task (`retry_count = 0`).
    pub fn new(entity_id: EntityId, content: impl Into<String>) -> Self {
        Self {
            entity_id,
            content: content.into(),
            retry_count: 0,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn to_fields(&self) -> StreamFields {
        let mut fields = HashMap::with_capacity(3);
        fields.insert(FIELD_ENTITY_ID.to_string(), self.entity_id.to_string());
        fields.insert(FIELD_CONTENT.to_string(), self.content.clone());
        fields.insert(FIELD_RETRY_COUNT.to_string(), self.retry_count.to_string());
        fields
    }

    /// Decode a delivered message.
    ///
    /// `entity_id` and `content` are required. A missing or unparsable
    /// `retry_count` falls back to 0: that is a producer bug, and refusing the
    /// message would only wedge the stream.
    pub fn from_fields(fields: &StreamFields) -> Result<Self, DescriptorError> {
        let raw_id = fields
            .get(FIELD_ENTITY_ID)
            .ok_or(DescriptorError::MissingField(FIELD_ENTITY_ID))?;
        let content = fields
            .get(FIELD_CONTENT)
            .ok_or(DescriptorError::MissingField(FIELD_CONTENT))?;

        let entity_id =
            raw_id
                .parse::<EntityId>()
                .map_err(|e| DescriptorError::InvalidEntityId {
                    value: raw_id.clone(),
                    reason: e.to_string(),
                })?;

        let retry_count = match fields.get(FIELD_RETRY_COUNT) {
            None => 0,
            Some(raw) => raw.trim().parse::<u32>().unwrap_or_else(|_| {
                warn!(%entity_id, retry_count = %raw, "malformed retry_count, treating as 0");
                0
            }),
        };

        Ok(Self {
            entity_id,
            content: content.clone(),
            retry_count,
        })
    }
}
