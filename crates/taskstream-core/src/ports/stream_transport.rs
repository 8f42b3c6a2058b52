//! StreamTransport port - consumer group 付きの永続 stream
//!
//! 実装:
//! - **InMemoryStreamTransport**: テスト・デモ・単一プロセス用
//! - **RedisStreamTransport**: 本番用（`redis` feature）
//!
//! consumer loop と retry はこの trait だけに依存する。
//! transport 固有の事情（BUSYGROUP, MAXLEN ~ など）は実装側に閉じ込める。

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{MessageId, StreamFields, TransportError};

/// Result of an idempotent group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCreated {
    Created,
    AlreadyExists,
}

/// One delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: MessageId,
    pub fields: StreamFields,
}

/// Durable, append-only, per-key ordered log with consumer groups.
///
/// # Contract
/// - `create_group` creates the stream and the group when absent. An existing
///   group is `Ok(GroupCreated::AlreadyExists)`, never an error.
/// - `append` with `max_len > 0` trims the oldest entries approximately; the
///   exact cap is not guaranteed.
/// - `read_group` returns only messages never delivered to `group`, waiting up
///   to `block` (`Duration::ZERO` waits forever). Empty on timeout.
/// - `ack` is idempotent; acking an unknown id is not an error.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreated, TransportError>;

    async fn append(
        &self,
        stream: &str,
        fields: &StreamFields,
        max_len: usize,
    ) -> Result<MessageId, TransportError>;

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError>;

    async fn ack(&self, stream: &str, group: &str, id: &MessageId) -> Result<(), TransportError>;

    /// Delivered but unacknowledged messages in `group`.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize, TransportError>;

    /// Current number of entries in `stream` (0 if it does not exist).
    async fn len(&self, stream: &str) -> Result<usize, TransportError>;
}
