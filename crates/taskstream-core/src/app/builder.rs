//! AppBuilder - transport / status store / handler のワイヤリング
//!
//! # Fail-fast
//! - 同じ TaskKind に handler を 2 回登録したらエラー
//! - `expect_kinds()` で指定した種類に handler が無ければ `build()` でエラー
//! - 設定値の検証も `build()` で行う（起動後に気付かないように）

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::info;

use super::consumer_loop::{ConsumerError, ConsumerLoop, ShutdownReport};
use super::producer::Producer;
use super::status::StatusProjector;
use crate::config::{ConfigError, QueueConfig};
use crate::domain::TaskKind;
use crate::observability::ConsumerCounts;
use crate::ports::{StatusStore, StreamTransport, TaskHandler};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no stream transport configured")]
    MissingTransport,

    #[error("no status store configured")]
    MissingStatusStore,

    #[error("handler for task kind `{0}` registered twice")]
    DuplicateHandler(TaskKind),

    #[error("missing handlers for task kinds: {0:?}")]
    MissingTaskKinds(Vec<TaskKind>),

    #[error("invalid configuration for `{kind}`: {source}")]
    InvalidConfig {
        kind: TaskKind,
        #[source]
        source: ConfigError,
    },
}

/// # 使用例
/// ```ignore
/// let mut app = AppBuilder::new()
///     .transport(transport)
///     .status_store(store)
///     .register(TaskKind::Vectorize, Arc::new(VectorizeHandler))?
///     .expect_kinds(&[TaskKind::Vectorize])
///     .build()?;
/// app.start_all().await?;
/// ```
#[derive(Default)]
pub struct AppBuilder {
    transport: Option<Arc<dyn StreamTransport>>,
    status_store: Option<Arc<dyn StatusStore>>,
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    configs: HashMap<TaskKind, QueueConfig>,
    expected: Vec<TaskKind>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.status_store = Some(store);
        self
    }

    /// Override the queue configuration of one kind (default: `QueueConfig::for_kind`).
    pub fn config(mut self, kind: TaskKind, config: QueueConfig) -> Self {
        self.configs.insert(kind, config);
        self
    }

    /// Register the handler consuming `kind`. One handler per kind.
    pub fn register(
        mut self,
        kind: TaskKind,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, BuildError> {
        if self.handlers.contains_key(&kind) {
            return Err(BuildError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    /// Kinds that must have a handler when `build()` is called.
    pub fn expect_kinds(mut self, kinds: &[TaskKind]) -> Self {
        self.expected = kinds.to_vec();
        self
    }

    pub fn build(mut self) -> Result<App, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        let store = self.status_store.ok_or(BuildError::MissingStatusStore)?;

        let mut missing: Vec<TaskKind> = self
            .expected
            .iter()
            .filter(|kind| !self.handlers.contains_key(*kind))
            .copied()
            .collect();
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(BuildError::MissingTaskKinds(missing));
        }

        let projector = StatusProjector::new(store);
        let mut producers = BTreeMap::new();
        let mut consumers = BTreeMap::new();

        // every kind gets a producer; only kinds with a handler get a consumer
        for kind in TaskKind::ALL {
            let config = self
                .configs
                .remove(&kind)
                .unwrap_or_else(|| QueueConfig::for_kind(kind));
            config
                .validate()
                .map_err(|source| BuildError::InvalidConfig { kind, source })?;

            producers.insert(
                kind,
                Producer::new(Arc::clone(&transport), projector.clone(), &config),
            );
            if let Some(handler) = self.handlers.remove(&kind) {
                consumers.insert(
                    kind,
                    ConsumerLoop::new(Arc::clone(&transport), projector.clone(), handler, config),
                );
            }
        }

        Ok(App {
            producers,
            consumers,
        })
    }
}

/// Producers for every kind plus one consumer loop per registered handler.
pub struct App {
    producers: BTreeMap<TaskKind, Producer>,
    consumers: BTreeMap<TaskKind, ConsumerLoop>,
}

impl App {
    pub fn producer(&self, kind: TaskKind) -> Option<&Producer> {
        self.producers.get(&kind)
    }

    pub fn consumer(&self, kind: TaskKind) -> Option<&ConsumerLoop> {
        self.consumers.get(&kind)
    }

    pub fn consumer_kinds(&self) -> Vec<TaskKind> {
        self.consumers.keys().copied().collect()
    }

    /// Start every stopped consumer loop.
    pub async fn start_all(&mut self) -> Result<(), ConsumerError> {
        for (kind, consumer) in self.consumers.iter_mut() {
            consumer.start().await?;
            info!(%kind, "consumer started");
        }
        Ok(())
    }

    /// Stop all consumer loops, in kind order.
    pub async fn stop_all(&mut self) -> Vec<(TaskKind, ShutdownReport)> {
        let mut reports = Vec::with_capacity(self.consumers.len());
        for (kind, consumer) in self.consumers.iter_mut() {
            reports.push((*kind, consumer.stop().await));
        }
        reports
    }

    pub fn stats(&self) -> BTreeMap<TaskKind, ConsumerCounts> {
        self.consumers
            .iter()
            .map(|(kind, consumer)| (*kind, consumer.stats()))
            .collect()
    }
}
