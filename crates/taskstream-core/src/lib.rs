//! taskstream-core
//!
//! Stream-backed asynchronous task dispatch with consumer groups,
//! bounded retries and a best-effort status projection.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, descriptor, status, task_kind, errors）
//! - **ports**: 抽象化レイヤー（StreamTransport, StatusStore, TaskHandler）
//! - **app**: アプリケーションロジック（builder, producer, consumer_loop, retry, status）
//! - **impls**: 実装（in-memory、`redis` feature で Redis Streams）
//! - **config**: キューごとの設定
//! - **observability**: consumer のカウンタ

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
