//! TaskKind - どの stream / group に流すか
//!
//! 種類ごとに stream key, consumer group, consumer 名の prefix を 1 組ずつ持つ。
//! 処理ロジック（consumer loop / retry）は全種類で共通。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Knowledge-base document vectorization.
    Vectorize,
    /// Resume analysis / grading.
    Analyze,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::Vectorize, TaskKind::Analyze];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Vectorize => "vectorize",
            TaskKind::Analyze => "analyze",
        }
    }

    pub fn default_stream_key(self) -> &'static str {
        match self {
            TaskKind::Vectorize => "kb:vectorize:stream",
            TaskKind::Analyze => "resume:analyze:stream",
        }
    }

    pub fn default_group(self) -> &'static str {
        match self {
            TaskKind::Vectorize => "kb-vectorize-group",
            TaskKind::Analyze => "resume-analyze-group",
        }
    }

    pub fn default_consumer_prefix(self) -> &'static str {
        match self {
            TaskKind::Vectorize => "kb-vectorize-consumer-",
            TaskKind::Analyze => "resume-analyze-consumer-",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task kind `{0}` (expected `vectorize` or `analyze`)")]
pub struct UnknownTaskKind(pub String);

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vectorize" => Ok(TaskKind::Vectorize),
            "analyze" => Ok(TaskKind::Analyze),
            other => Err(UnknownTaskKind(other.to_string())),
        }
    }
}
