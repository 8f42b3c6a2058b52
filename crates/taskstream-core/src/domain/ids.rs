//! Domain identifiers (strongly-typed IDs).
//!
//! - `EntityId`: 業務行（knowledge base / resume）の ID。i64 を文字列でやり取りする
//! - `MessageId`: transport が採番するメッセージ ID。アプリ側では絶対に作らない
//! - `ConsumerName`: プロセス起動ごとに作り直す一時的な consumer 名

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of the domain row a task operates on.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(i64);

impl EntityId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl FromStr for EntityId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Transport-assigned message identifier.
///
/// Opaque to the application: it is only ever handed back to the transport
/// (for `ack`) or written to logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Number of random hex characters appended to the consumer prefix.
const CONSUMER_SUFFIX_LEN: usize = 8;

/// Ephemeral consumer identity used for transport-side delivery bookkeeping.
///
/// 永続化しない。`start()` のたびに新しい値を生成する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerName(String);

impl ConsumerName {
    /// `<prefix><8 lowercase hex chars>`
    pub fn generate(prefix: &str) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..CONSUMER_SUFFIX_LEN)
            .map(|_| {
                let nibble = rng.gen_range(0..16u32);
                char::from_digit(nibble, 16).unwrap_or('0')
            })
            .collect();
        Self(format!("{prefix}{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConsumerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_parses_and_displays() {
        let id: EntityId = "42".parse().unwrap();
        assert_eq!(id, EntityId::new(42));
        assert_eq!(id.to_string(), "42");

        let negative: EntityId = "-7".parse().unwrap();
        assert_eq!(negative.get(), -7);
    }

    #[test]
    fn entity_id_rejects_garbage() {
        assert!("abc".parse::<EntityId>().is_err());
        assert!("".parse::<EntityId>().is_err());
        assert!("99999999999999999999".parse::<EntityId>().is_err());
    }

    #[test]
    fn consumer_name_has_prefix_and_hex_suffix() {
        let name = ConsumerName::generate("kb-vectorize-consumer-");
        let suffix = name
            .as_str()
            .strip_prefix("kb-vectorize-consumer-")
            .unwrap();
        assert_eq!(suffix.len(), CONSUMER_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn consumer_names_differ_between_generations() {
        // 32 bit の乱数なので衝突はまず起きない
        let a = ConsumerName::generate("c-");
        let b = ConsumerName::generate("c-");
        assert_ne!(a, b);
    }
}
