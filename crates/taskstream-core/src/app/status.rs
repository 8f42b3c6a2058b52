//! StatusProjector - 状態レコードへの唯一の書き込み口
//!
//! producer / consumer / retry の全経路がここを通るので、書き込みの形は常に同じ。
//! best-effort: レコードが無ければ何もしない、ストアが落ちていればログだけ出す。

use std::sync::Arc;

use tracing::{debug, error};

use crate::domain::{EntityId, TaskStatus};
use crate::ports::StatusStore;

/// Outcome of one `set_status` call, mostly for tests and debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Written,
    /// No record for the entity; nothing written.
    Missing,
    /// The store failed; the error was logged and swallowed.
    StoreFailed,
}

#[derive(Clone)]
pub struct StatusProjector {
    store: Arc<dyn StatusStore>,
}

impl StatusProjector {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    /// Load the record for `entity_id` and overwrite its status and error.
    ///
    /// `error` is truncated to 500 characters; `None` clears it. Never fails:
    /// losing a status update is preferable to stalling the queue.
    pub async fn set_status(
        &self,
        entity_id: EntityId,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Projection {
        let mut record = match self.store.load(entity_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                debug!(%entity_id, %status, "no status record, skipping update");
                return Projection::Missing;
            }
            Err(e) => {
                error!(%entity_id, %status, error = %e, "failed to load status record");
                return Projection::StoreFailed;
            }
        };

        record.apply(status, error);

        match self.store.save(record).await {
            Ok(()) => Projection::Written,
            Err(e) => {
                error!(%entity_id, %status, error = %e, "failed to save status record");
                Projection::StoreFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MAX_ERROR_LEN;
    use crate::impls::InMemoryStatusStore;

    fn projector() -> (Arc<InMemoryStatusStore>, StatusProjector) {
        let store = Arc::new(InMemoryStatusStore::new());
        let projector = StatusProjector::new(store.clone());
        (store, projector)
    }

    #[tokio::test]
    async fn missing_record_is_a_noop() {
        let (store, projector) = projector();
        let result = projector
            .set_status(EntityId::new(1), TaskStatus::Processing, None)
            .await;
        assert_eq!(result, Projection::Missing);
        assert!(store.get(EntityId::new(1)).await.is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn overwrites_status_and_truncates_error() {
        let (store, projector) = projector();
        store.insert_pending(EntityId::new(2)).await;

        let long = "x".repeat(MAX_ERROR_LEN * 3);
        let result = projector
            .set_status(EntityId::new(2), TaskStatus::Failed, Some(&long))
            .await;
        assert_eq!(result, Projection::Written);

        let record = store.get(EntityId::new(2)).await.unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.error.unwrap().chars().count(), MAX_ERROR_LEN);
    }

    #[tokio::test]
    async fn none_clears_previous_error() {
        let (store, projector) = projector();
        store.insert_pending(EntityId::new(3)).await;
        projector
            .set_status(EntityId::new(3), TaskStatus::Failed, Some("first"))
            .await;
        projector
            .set_status(EntityId::new(3), TaskStatus::Completed, None)
            .await;
        let record = store.get(EntityId::new(3)).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let (store, projector) = projector();
        store.insert_pending(EntityId::new(4)).await;
        store.set_unavailable(true);
        let result = projector
            .set_status(EntityId::new(4), TaskStatus::Processing, None)
            .await;
        assert_eq!(result, Projection::StoreFailed);

        store.set_unavailable(false);
        assert_eq!(store.status_of(EntityId::new(4)).await, Some(TaskStatus::Pending));
    }
}
