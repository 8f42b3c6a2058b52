//! Impls - ports の実装
//!
//! - **InMemoryStreamTransport**: 開発・テスト用の stream
//! - **InMemoryStatusStore**: 開発・テスト用の状態レコード
//! - **RedisStreamTransport** (`redis` feature): Redis Streams

pub mod memory_status;
pub mod memory_stream;
#[cfg(feature = "redis")]
pub mod redis_stream;

pub use self::memory_status::InMemoryStatusStore;
pub use self::memory_stream::InMemoryStreamTransport;
#[cfg(feature = "redis")]
pub use self::redis_stream::RedisStreamTransport;
