//! Ports - 抽象化レイヤー
//!
//! 外部システムへのインターフェース。consumer loop はこれらの trait だけに
//! 依存するので、broker なしの in-memory 実装でテストできる。
//!
//! - **StreamTransport**: 配送（Redis Streams または InMemory）
//! - **StatusStore**: 状態レコードの正本
//! - **TaskHandler**: ドメイン側の処理

pub mod status_store;
pub mod stream_transport;
pub mod task_handler;

pub use self::status_store::StatusStore;
pub use self::stream_transport::{GroupCreated, StreamEntry, StreamTransport};
pub use self::task_handler::TaskHandler;
