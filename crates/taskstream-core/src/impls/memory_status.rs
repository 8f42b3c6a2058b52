//! InMemoryStatusStore - テスト・デモ用の状態ストア
//!
//! `set_unavailable(true)` で障害を模擬できる（すべての操作がエラーになる）。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{EntityId, StatusRecord, StatusStoreError, TaskStatus};
use crate::ports::StatusStore;

#[derive(Default)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<EntityId, StatusRecord>>,
    unavailable: AtomicBool,
    saves: AtomicUsize,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the PENDING row, as the enqueuing caller would.
    pub async fn insert_pending(&self, entity_id: EntityId) {
        let mut records = self.records.lock().await;
        records.insert(entity_id, StatusRecord::pending(entity_id));
    }

    pub async fn remove(&self, entity_id: EntityId) -> Option<StatusRecord> {
        self.records.lock().await.remove(&entity_id)
    }

    pub async fn get(&self, entity_id: EntityId) -> Option<StatusRecord> {
        self.records.lock().await.get(&entity_id).cloned()
    }

    pub async fn status_of(&self, entity_id: EntityId) -> Option<TaskStatus> {
        self.get(entity_id).await.map(|r| r.status)
    }

    pub async fn all(&self) -> Vec<StatusRecord> {
        let mut records: Vec<_> = self.records.lock().await.values().cloned().collect();
        records.sort_by_key(|r| r.entity_id);
        records
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StatusStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StatusStoreError("status store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn load(&self, entity_id: EntityId) -> Result<Option<StatusRecord>, StatusStoreError> {
        self.check_available()?;
        Ok(self.records.lock().await.get(&entity_id).cloned())
    }

    async fn save(&self, record: StatusRecord) -> Result<(), StatusStoreError> {
        self.check_available()?;
        self.records.lock().await.insert(record.entity_id, record);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_none_for_unknown_entity() {
        let store = InMemoryStatusStore::new();
        assert!(store.load(EntityId::new(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_then_load() {
        let store = InMemoryStatusStore::new();
        store.insert_pending(EntityId::new(1)).await;

        let mut record = store.load(EntityId::new(1)).await.unwrap().unwrap();
        record.apply(TaskStatus::Processing, None);
        store.save(record).await.unwrap();

        assert_eq!(store.status_of(EntityId::new(1)).await, Some(TaskStatus::Processing));
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemoryStatusStore::new();
        store.set_unavailable(true);
        assert!(store.load(EntityId::new(1)).await.is_err());
        assert!(store.save(StatusRecord::pending(EntityId::new(1))).await.is_err());
        assert_eq!(store.save_count(), 0);
    }
}
