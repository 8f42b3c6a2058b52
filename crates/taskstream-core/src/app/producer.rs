//! Producer - タスクを stream に積む
//!
//! transport が落ちている時にローカルでリトライすると、呼び出し元（リクエスト処理）
//! を塞いでしまう。失敗したら即 FAILED にして返す。再投入は運用側（手動・定期）。

use std::sync::Arc;

use tracing::{error, info};

use super::status::StatusProjector;
use crate::config::QueueConfig;
use crate::domain::{EnqueueError, EntityId, MessageId, TaskDescriptor, TaskStatus};
use crate::ports::StreamTransport;

#[derive(Clone)]
pub struct Producer {
    transport: Arc<dyn StreamTransport>,
    projector: StatusProjector,
    stream_key: String,
    max_len: usize,
}

impl Producer {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        projector: StatusProjector,
        config: &QueueConfig,
    ) -> Self {
        Self {
            transport,
            projector,
            stream_key: config.stream_key.clone(),
            max_len: config.stream_max_len,
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Append a fresh task (`retry_count = 0`).
    ///
    /// On transport failure the status record is set to FAILED before the
    /// error is returned; the caller does not need to touch the status itself.
    pub async fn enqueue(
        &self,
        entity_id: EntityId,
        content: impl Into<String>,
    ) -> Result<MessageId, EnqueueError> {
        let descriptor = TaskDescriptor::new(entity_id, content);

        match self
            .transport
            .append(&self.stream_key, &descriptor.to_fields(), self.max_len)
            .await
        {
            Ok(message_id) => {
                info!(
                    %entity_id,
                    %message_id,
                    stream = %self.stream_key,
                    "task enqueued"
                );
                Ok(message_id)
            }
            Err(e) => {
                error!(%entity_id, stream = %self.stream_key, error = %e, "enqueue failed");
                let reason = format!("enqueue failed: {e}");
                self.projector
                    .set_status(entity_id, TaskStatus::Failed, Some(&reason))
                    .await;
                Err(EnqueueError {
                    entity_id,
                    source: e,
                })
            }
        }
    }
}
