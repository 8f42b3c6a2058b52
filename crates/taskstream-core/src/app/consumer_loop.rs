//! ConsumerLoop - consumer group からタスクを読んで処理するループ
//!
//! # フロー
//! 1. `start()`: consumer 名を生成 → group 作成（冪等）→ worker task を 1 本 spawn
//! 2. worker: `read_group`（blocking）→ 取れたメッセージを 1 件ずつ順番に処理
//! 3. 各メッセージ: PROCESSING → handler → COMPLETED / requeue / FAILED → ack
//! 4. `stop()`: shutdown を通知 → 猶予時間付きで join
//!
//! 同一 consumer 内では並列化しない（順序を保つ）。スループットは同じ group に
//! プロセスを増やして稼ぐ。配送の振り分けは transport 側の仕事。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::retry::{Decision, RetryPolicy};
use super::status::StatusProjector;
use crate::config::QueueConfig;
use crate::domain::{
    ConsumerName, HandlerError, MessageId, TaskDescriptor, TaskStatus, TransportError,
};
use crate::observability::{ConsumerCounts, ConsumerStats};
use crate::ports::{GroupCreated, StreamEntry, StreamTransport, TaskHandler};

/// Pause after a read that failed without blocking, when no block timeout is set.
/// Only reads that return an error hit this; an empty read already waited.
const READ_ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Lifecycle: `Stopped -> Starting -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer loop can only be started when stopped (current state: {0:?})")]
    AlreadyRunning(ConsumerState),
}

/// What happened to one delivered message. Every variant ends with an ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Completed,
    /// Handler failed; a copy with `retry_count` was appended to the tail.
    Requeued { retry_count: u32, new_id: MessageId },
    /// Terminal: retries exhausted or the requeue itself failed.
    Failed,
    /// Missing or invalid required fields; dropped without a status update.
    Malformed,
}

/// Result of `stop()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The worker exited on its own within the grace period.
    pub clean: bool,
    pub elapsed: Duration,
}

/// Per-message handling, shared between the loop and tests.
pub struct MessageProcessor {
    transport: Arc<dyn StreamTransport>,
    projector: StatusProjector,
    handler: Arc<dyn TaskHandler>,
    retry: RetryPolicy,
    stream_key: String,
    group: String,
    max_len: usize,
    requeue_attempts: u32,
    stats: Arc<ConsumerStats>,
}

impl MessageProcessor {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        projector: StatusProjector,
        handler: Arc<dyn TaskHandler>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            transport,
            projector,
            handler,
            retry: RetryPolicy::new(config.max_retry),
            stream_key: config.stream_key.clone(),
            group: config.group.clone(),
            max_len: config.stream_max_len,
            requeue_attempts: config.requeue_attempts.max(1),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn stats(&self) -> ConsumerCounts {
        self.stats.snapshot()
    }

    /// Handle one delivered message and ack it, whatever the outcome.
    pub async fn process_message(&self, entry: &StreamEntry) -> MessageOutcome {
        self.stats.record_received();
        let message_id = &entry.id;

        let descriptor = match TaskDescriptor::from_fields(&entry.fields) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(%message_id, error = %e, "malformed message, dropping");
                self.stats.record_malformed();
                self.ack(message_id).await;
                return MessageOutcome::Malformed;
            }
        };

        let entity_id = descriptor.entity_id;
        info!(
            %entity_id,
            %message_id,
            retry_count = descriptor.retry_count,
            "processing task"
        );

        self.projector
            .set_status(entity_id, TaskStatus::Processing, None)
            .await;

        let outcome = match self.invoke_handler(&descriptor).await {
            Ok(()) => {
                self.projector
                    .set_status(entity_id, TaskStatus::Completed, None)
                    .await;
                self.stats.record_completed();
                info!(%entity_id, %message_id, "task completed");
                MessageOutcome::Completed
            }
            Err(err) => self.on_handler_failure(&descriptor, &err).await,
        };

        // the original is superseded (completed, requeued or dropped) in every case
        self.ack(message_id).await;
        outcome
    }

    /// A panic inside the handler is reported as a failure instead of taking
    /// the loop down. The handler stays on the worker task, so aborting the
    /// worker cancels it too.
    async fn invoke_handler(&self, descriptor: &TaskDescriptor) -> Result<(), HandlerError> {
        let handling = self
            .handler
            .handle(descriptor.entity_id, &descriptor.content);

        match AssertUnwindSafe(handling).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::new(format!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn on_handler_failure(
        &self,
        descriptor: &TaskDescriptor,
        err: &HandlerError,
    ) -> MessageOutcome {
        let entity_id = descriptor.entity_id;
        warn!(
            %entity_id,
            retry_count = descriptor.retry_count,
            error = %err,
            "handler failed"
        );

        match self.retry.decide(descriptor, err) {
            Decision::Requeue { next } => match self.requeue(&next).await {
                Ok(new_id) => {
                    info!(
                        %entity_id,
                        message_id = %new_id,
                        retry_count = next.retry_count,
                        "task requeued"
                    );
                    self.stats.record_requeued();
                    MessageOutcome::Requeued {
                        retry_count: next.retry_count,
                        new_id,
                    }
                }
                Err(e) => {
                    // favour liveness: mark FAILED and still ack the original
                    error!(%entity_id, error = %e, "requeue failed, giving up on task");
                    let reason = format!("requeue failed: {e}");
                    self.projector
                        .set_status(entity_id, TaskStatus::Failed, Some(&reason))
                        .await;
                    self.stats.record_failed();
                    MessageOutcome::Failed
                }
            },
            Decision::GiveUp { reason } => {
                warn!(%entity_id, retry_count = descriptor.retry_count, "retries exhausted");
                self.projector
                    .set_status(entity_id, TaskStatus::Failed, Some(&reason))
                    .await;
                self.stats.record_failed();
                MessageOutcome::Failed
            }
        }
    }

    /// Append the retry descriptor, trying up to `requeue_attempts` times.
    async fn requeue(&self, next: &TaskDescriptor) -> Result<MessageId, TransportError> {
        let fields = next.to_fields();
        let mut attempt = 1;
        loop {
            match self
                .transport
                .append(&self.stream_key, &fields, self.max_len)
                .await
            {
                Ok(id) => return Ok(id),
                Err(e) if attempt < self.requeue_attempts => {
                    warn!(
                        entity_id = %next.entity_id,
                        attempt,
                        error = %e,
                        "requeue append failed, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn ack(&self, message_id: &MessageId) {
        if let Err(e) = self
            .transport
            .ack(&self.stream_key, &self.group, message_id)
            .await
        {
            self.stats.record_ack_error();
            error!(%message_id, error = %e, "ack failed");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

struct Worker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Background consumer for one stream/group pair.
///
/// Dropping a running `ConsumerLoop` drops the shutdown sender, which also
/// stops the worker; `stop()` is still the way to get a bounded, observed drain.
pub struct ConsumerLoop {
    processor: Arc<MessageProcessor>,
    config: QueueConfig,
    state: ConsumerState,
    consumer_name: Option<ConsumerName>,
    worker: Option<Worker>,
}

impl ConsumerLoop {
    pub fn new(
        transport: Arc<dyn StreamTransport>,
        projector: StatusProjector,
        handler: Arc<dyn TaskHandler>,
        config: QueueConfig,
    ) -> Self {
        let processor = MessageProcessor::new(transport, projector, handler, &config);
        Self {
            processor: Arc::new(processor),
            config,
            state: ConsumerState::Stopped,
            consumer_name: None,
            worker: None,
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// Identity of the current (or last) run.
    pub fn consumer_name(&self) -> Option<&ConsumerName> {
        self.consumer_name.as_ref()
    }

    pub fn stats(&self) -> ConsumerCounts {
        self.processor.stats()
    }

    pub async fn start(&mut self) -> Result<(), ConsumerError> {
        if self.state != ConsumerState::Stopped {
            return Err(ConsumerError::AlreadyRunning(self.state));
        }
        self.state = ConsumerState::Starting;

        let consumer = ConsumerName::generate(&self.config.consumer_prefix);
        let stream = &self.config.stream_key;
        let group = &self.config.group;

        match self.processor.transport.create_group(stream, group).await {
            Ok(GroupCreated::Created) => info!(%stream, %group, "consumer group created"),
            Ok(GroupCreated::AlreadyExists) => debug!(%stream, %group, "consumer group exists"),
            // not fatal: reads will fail loudly if the group is really missing
            Err(e) => warn!(%stream, %group, error = %e, "could not create consumer group"),
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(run(
            Arc::clone(&self.processor),
            consumer.clone(),
            self.config.batch_size,
            self.config.block_timeout(),
            shutdown_rx,
        ));

        info!(%stream, %group, %consumer, "consumer loop started");
        self.worker = Some(Worker { shutdown_tx, join });
        self.consumer_name = Some(consumer);
        self.state = ConsumerState::Running;
        Ok(())
    }

    /// Signal shutdown and wait up to `shutdown_grace` for the worker.
    ///
    /// A message already being processed runs to completion within the grace
    /// period. Past it the worker is aborted together with the handler, and
    /// the message stays pending unacked.
    pub async fn stop(&mut self) -> ShutdownReport {
        let started = Instant::now();
        let Some(worker) = self.worker.take() else {
            return ShutdownReport {
                clean: true,
                elapsed: Duration::ZERO,
            };
        };
        self.state = ConsumerState::Stopping;

        // ignore send error: the worker may already have exited
        let _ = worker.shutdown_tx.send(true);

        let mut join = worker.join;
        let clean = match tokio::time::timeout(self.config.shutdown_grace(), &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "consumer worker ended abnormally");
                false
            }
            Err(_) => {
                warn!(
                    grace_ms = self.config.shutdown_grace_ms,
                    "consumer worker did not stop in time, aborting"
                );
                join.abort();
                false
            }
        };

        self.state = ConsumerState::Stopped;
        let elapsed = started.elapsed();
        info!(
            consumer = ?self.consumer_name.as_ref().map(ConsumerName::as_str),
            clean,
            elapsed_ms = elapsed.as_millis() as u64,
            "consumer loop stopped"
        );
        ShutdownReport { clean, elapsed }
    }
}

async fn run(
    processor: Arc<MessageProcessor>,
    consumer: ConsumerName,
    batch_size: usize,
    block: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let stream = processor.stream_key.clone();
    let group = processor.group.clone();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // blocking read は shutdown と競合させる。処理中のメッセージは中断しない
        let read = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    // sender dropped together with the ConsumerLoop
                    break;
                }
                continue;
            }
            read = processor.transport.read_group(
                &stream,
                &group,
                consumer.as_str(),
                batch_size,
                block,
            ) => read,
        };

        match read {
            Ok(entries) => {
                if !entries.is_empty() {
                    debug!(%consumer, count = entries.len(), "read batch");
                }
                // finish the whole batch: those messages are already pending
                // for this consumer
                for entry in &entries {
                    processor.process_message(entry).await;
                }
            }
            Err(e) => {
                processor.stats.record_read_error();
                error!(%stream, %group, %consumer, error = %e, "read from stream failed");

                // only immediate failures get here; a timed-out read returns Ok(empty)
                let pause = if block.is_zero() { READ_ERROR_PAUSE } else { block };
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!(%consumer, "consumer worker exiting");
}
