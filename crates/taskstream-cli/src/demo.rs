//! demo - in-memory transport で 3 つのシナリオを流す
//!
//! - A: 成功 → COMPLETED
//! - B: 毎回失敗 → max_retry 回 requeue した後 FAILED
//! - C: enqueue 自体が失敗 → その場で FAILED、stream には何も残らない

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use taskstream_core::app::AppBuilder;
use taskstream_core::config::QueueConfig;
use taskstream_core::domain::{EntityId, StatusRecord, TaskKind};
use taskstream_core::impls::{InMemoryStatusStore, InMemoryStreamTransport};
use taskstream_core::observability::ConsumerCounts;
use taskstream_core::ports::StreamTransport;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::handlers::DemoHandler;

const SUCCEEDING: EntityId = EntityId::new(42);
const FAILING: EntityId = EntityId::new(7);
const UNENQUEUEABLE: EntityId = EntityId::new(9);

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub records: Vec<StatusRecord>,
    pub stats: BTreeMap<TaskKind, ConsumerCounts>,
    pub stream_len: usize,
    pub enqueue_error: Option<String>,
}

pub async fn run(max_retry: u32, timeout: Duration) -> Result<DemoReport> {
    let transport = Arc::new(InMemoryStreamTransport::new());
    let store = Arc::new(InMemoryStatusStore::new());

    let mut config = QueueConfig::for_kind(TaskKind::Vectorize);
    config.max_retry = max_retry;
    config.block_timeout_ms = 100;
    let stream_key = config.stream_key.clone();

    let mut app = AppBuilder::new()
        .transport(transport.clone())
        .status_store(store.clone())
        .config(TaskKind::Vectorize, config)
        .register(TaskKind::Vectorize, Arc::new(DemoHandler::new([FAILING])))?
        .expect_kinds(&[TaskKind::Vectorize])
        .build()?;
    app.start_all().await?;

    let producer = app
        .producer(TaskKind::Vectorize)
        .context("vectorize producer missing")?
        .clone();

    for id in [SUCCEEDING, FAILING, UNENQUEUEABLE] {
        store.insert_pending(id).await;
    }

    // A
    producer.enqueue(SUCCEEDING, "abc").await?;
    // B
    producer.enqueue(FAILING, "x").await?;
    // C
    transport.fail_appends(1);
    let enqueue_error = match producer.enqueue(UNENQUEUEABLE, "doc").await {
        Ok(id) => bail!("enqueue unexpectedly succeeded with {id}"),
        Err(e) => Some(e.to_string()),
    };

    let deadline = Instant::now() + timeout;
    loop {
        let a = store.status_of(SUCCEEDING).await;
        let b = store.status_of(FAILING).await;
        if a.is_some_and(|s| s.is_terminal()) && b.is_some_and(|s| s.is_terminal()) {
            break;
        }
        if Instant::now() >= deadline {
            warn!(?a, ?b, "scenarios did not finish in time");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for (kind, report) in app.stop_all().await {
        info!(%kind, clean = report.clean, "consumer stopped");
    }

    Ok(DemoReport {
        records: store.all().await,
        stats: app.stats(),
        stream_len: transport.len(&stream_key).await?,
        enqueue_error,
    })
}
