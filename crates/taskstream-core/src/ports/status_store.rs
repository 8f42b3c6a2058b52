//! StatusStore port - タスク状態の正本（リレーショナル DB 側）
//!
//! 行の作成（PENDING）は enqueue する側の責務。ここでは読み込みと上書きだけ。

use async_trait::async_trait;

use crate::domain::{EntityId, StatusRecord, StatusStoreError};

/// External store owning one status row per `entity_id`.
///
/// No locking: concurrent writers race and the last `save` wins.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// `Ok(None)` when the owning row does not exist (e.g. deleted concurrently).
    async fn load(&self, entity_id: EntityId) -> Result<Option<StatusRecord>, StatusStoreError>;

    async fn save(&self, record: StatusRecord) -> Result<(), StatusStoreError>;
}
