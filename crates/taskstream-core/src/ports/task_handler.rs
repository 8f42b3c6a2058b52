//! TaskHandler port - 実際の重い処理（vectorize / resume analysis）
//!
//! at-least-once 配送 + retry の requeue があるので、同じ entity_id に対して
//! 複数回呼ばれても壊れないこと（冪等）が前提。

use async_trait::async_trait;

use crate::domain::{EntityId, HandlerError};

/// Capability invoked by the consumer loop for each delivered task.
///
/// # 使用例
/// ```ignore
/// struct VectorizeHandler { embeddings: EmbeddingClient }
///
/// #[async_trait]
/// impl TaskHandler for VectorizeHandler {
///     async fn handle(&self, entity_id: EntityId, content: &str) -> Result<(), HandlerError> {
///         self.embeddings.store(entity_id, content).await.map_err(|e| e.to_string().into())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, entity_id: EntityId, content: &str) -> Result<(), HandlerError>;
}
