//! App - アプリケーション層
//!
//! ports を組み合わせてタスク配送のロジックを実装する。
//!
//! # 主要コンポーネント
//! - **AppBuilder / App**: ワイヤリングと起動時検証
//! - **Producer**: タスクを stream に積む
//! - **ConsumerLoop**: read → handle → retry/ack のループ
//! - **RetryPolicy**: requeue するか諦めるかの判定
//! - **StatusProjector**: 状態レコードへの best-effort な書き込み

pub mod builder;
pub mod consumer_loop;
pub mod producer;
pub mod retry;
pub mod status;

pub use self::builder::{App, AppBuilder, BuildError};
pub use self::consumer_loop::{
    ConsumerError, ConsumerLoop, ConsumerState, MessageOutcome, MessageProcessor, ShutdownReport,
};
pub use self::producer::Producer;
pub use self::retry::{Decision, RetryPolicy, next_descriptor, should_retry};
pub use self::status::{Projection, StatusProjector};
