use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use taskstream_core::app::{ConsumerLoop, Producer, StatusProjector};
use taskstream_core::config::QueueConfig;
use taskstream_core::domain::{
    EntityId, HandlerError, MAX_ERROR_LEN, TaskDescriptor, TaskKind, TaskStatus,
};
use taskstream_core::impls::{InMemoryStatusStore, InMemoryStreamTransport};
use taskstream_core::ports::{StreamTransport, TaskHandler};
use tokio::time::Instant;

struct CountingHandler {
    fail: bool,
    calls: AtomicU32,
    error: String,
}

impl CountingHandler {
    fn succeeding() -> Self {
        Self {
            fail: false,
            calls: AtomicU32::new(0),
            error: String::new(),
        }
    }

    fn failing(error: impl Into<String>) -> Self {
        Self {
            fail: true,
            calls: AtomicU32::new(0),
            error: error.into(),
        }
    }
}

#[async_trait]
impl TaskHandler for CountingHandler {
    async fn handle(&self, _entity_id: EntityId, _content: &str) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HandlerError::new(self.error.clone()));
        }
        Ok(())
    }
}

struct Harness {
    transport: Arc<InMemoryStreamTransport>,
    store: Arc<InMemoryStatusStore>,
    config: QueueConfig,
    producer: Producer,
}

impl Harness {
    fn new(max_retry: u32) -> Self {
        let transport = Arc::new(InMemoryStreamTransport::new());
        let store = Arc::new(InMemoryStatusStore::new());
        let mut config = QueueConfig::for_kind(TaskKind::Vectorize);
        config.max_retry = max_retry;
        config.block_timeout_ms = 50;
        let producer = Producer::new(
            transport.clone(),
            StatusProjector::new(store.clone()),
            &config,
        );
        Self {
            transport,
            store,
            config,
            producer,
        }
    }

    fn consumer(&self, handler: Arc<dyn TaskHandler>) -> ConsumerLoop {
        ConsumerLoop::new(
            self.transport.clone(),
            StatusProjector::new(self.store.clone()),
            handler,
            self.config.clone(),
        )
    }

    async fn wait_terminal(&self, entity_id: EntityId) -> TaskStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(status) = self.store.status_of(entity_id).await
                && status.is_terminal()
            {
                return status;
            }
            assert!(Instant::now() < deadline, "entity {entity_id} never finished");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn messages_for(&self, entity_id: EntityId) -> Vec<TaskDescriptor> {
        self.transport
            .entries(&self.config.stream_key)
            .await
            .iter()
            .filter_map(|e| TaskDescriptor::from_fields(&e.fields).ok())
            .filter(|d| d.entity_id == entity_id)
            .collect()
    }
}

#[tokio::test]
async fn scenario_a_success_completes_and_acks() {
    let h = Harness::new(3);
    let id = EntityId::new(42);
    h.store.insert_pending(id).await;

    let mut consumer = h.consumer(Arc::new(CountingHandler::succeeding()));
    consumer.start().await.unwrap();

    h.producer.enqueue(id, "abc").await.unwrap();
    assert_eq!(h.wait_terminal(id).await, TaskStatus::Completed);
    assert!(consumer.stop().await.clean);

    let record = h.store.get(id).await.unwrap();
    assert!(record.error.is_none());
    assert_eq!(
        h.transport
            .pending_count(&h.config.stream_key, &h.config.group)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        h.transport
            .ack_calls(&h.config.stream_key, &h.config.group)
            .await
            .len(),
        1
    );
}

#[tokio::test]
async fn scenario_b_exhausted_retries_mark_failed() {
    let h = Harness::new(2);
    let id = EntityId::new(7);
    h.store.insert_pending(id).await;

    let handler = Arc::new(CountingHandler::failing("model backend unavailable"));
    let mut consumer = h.consumer(handler.clone());
    consumer.start().await.unwrap();

    h.producer.enqueue(id, "x").await.unwrap();
    assert_eq!(h.wait_terminal(id).await, TaskStatus::Failed);
    consumer.stop().await;

    // original plus two retries
    assert_eq!(handler.calls.load(Ordering::SeqCst), 3);

    let record = h.store.get(id).await.unwrap();
    let error = record.error.unwrap();
    assert!(error.contains('2'), "error = {error}");
    assert!(error.contains("model backend unavailable"));

    let retry_counts: Vec<u32> = h.messages_for(id).await.iter().map(|d| d.retry_count).collect();
    assert_eq!(retry_counts, vec![0, 1, 2]);

    let stats = consumer.stats();
    assert_eq!(stats.requeued, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(
        h.transport
            .pending_count(&h.config.stream_key, &h.config.group)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn scenario_c_enqueue_failure_marks_failed_without_message() {
    let h = Harness::new(3);
    let id = EntityId::new(9);
    h.store.insert_pending(id).await;
    h.transport.set_unavailable(true);

    let err = h.producer.enqueue(id, "doc").await.unwrap_err();
    assert_eq!(err.entity_id, id);
    assert_eq!(h.store.status_of(id).await, Some(TaskStatus::Failed));

    h.transport.set_unavailable(false);
    assert_eq!(h.transport.len(&h.config.stream_key).await.unwrap(), 0);
}

#[tokio::test]
async fn long_handler_error_is_truncated() {
    let h = Harness::new(0);
    let id = EntityId::new(11);
    h.store.insert_pending(id).await;

    let mut consumer = h.consumer(Arc::new(CountingHandler::failing("e".repeat(2_000))));
    consumer.start().await.unwrap();

    h.producer.enqueue(id, "doc").await.unwrap();
    assert_eq!(h.wait_terminal(id).await, TaskStatus::Failed);
    consumer.stop().await;

    let error = h.store.get(id).await.unwrap().error.unwrap();
    assert_eq!(error.chars().count(), MAX_ERROR_LEN);
}

#[tokio::test]
async fn two_consumers_in_one_group_share_the_work() {
    let h = Harness::new(3);
    let ids: Vec<EntityId> = (1..=20).map(EntityId::new).collect();
    for id in &ids {
        h.store.insert_pending(*id).await;
    }

    let handler = Arc::new(CountingHandler::succeeding());
    let mut first = h.consumer(handler.clone());
    let mut second = h.consumer(handler.clone());
    first.start().await.unwrap();
    second.start().await.unwrap();
    assert_ne!(first.consumer_name(), second.consumer_name());

    for id in &ids {
        h.producer.enqueue(*id, "doc").await.unwrap();
    }
    for id in &ids {
        assert_eq!(h.wait_terminal(*id).await, TaskStatus::Completed);
    }
    first.stop().await;
    second.stop().await;

    // each message delivered to exactly one consumer
    assert_eq!(handler.calls.load(Ordering::SeqCst), 20);
    assert_eq!(first.stats().completed + second.stats().completed, 20);
}

#[tokio::test]
async fn backlog_enqueued_before_start_is_consumed() {
    let h = Harness::new(3);
    let id = EntityId::new(5);
    h.store.insert_pending(id).await;
    h.producer.enqueue(id, "early").await.unwrap();

    let mut consumer = h.consumer(Arc::new(CountingHandler::succeeding()));
    consumer.start().await.unwrap();
    assert_eq!(h.wait_terminal(id).await, TaskStatus::Completed);
    consumer.stop().await;
}
