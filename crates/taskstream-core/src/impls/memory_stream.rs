//! InMemoryStreamTransport - 開発用の stream transport
//!
//! # 実装詳細
//! - stream ごとに `VecDeque` のログを持つ。各エントリには内部 offset（単調増加）を振る
//! - consumer group は「どこまで配送したか」の cursor と pending（未 ack）集合を持つ
//! - append 時に `Notify::notify_waiters` で blocking read を起こす
//! - メッセージ ID は Redis と同じ `<millis>-<seq>` 形式で単調増加
//!
//! # 障害注入
//! - `fail_appends(n)`: 次の n 回の append を失敗させる
//! - `fail_acks(n)`: 次の n 回の ack を失敗させる
//! - `set_unavailable(true)`: すべての操作を失敗させる

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};

use crate::domain::{MessageId, StreamFields, TransportError};
use crate::ports::{GroupCreated, StreamEntry, StreamTransport};

#[derive(Debug, Clone)]
struct LogEntry {
    offset: u64,
    id: MessageId,
    fields: StreamFields,
}

#[derive(Debug, Default)]
struct GroupState {
    /// Highest offset handed out to any consumer of this group.
    delivered_upto: u64,
    /// Delivered, not yet acknowledged: id -> consumer name.
    pending: HashMap<MessageId, String>,
    /// Every `ack` call, in order, including repeats.
    ack_calls: Vec<MessageId>,
}

#[derive(Debug, Default)]
struct StreamLog {
    entries: VecDeque<LogEntry>,
    next_offset: u64,
    last_ms: u64,
    last_seq: u64,
    groups: HashMap<String, GroupState>,
}

impl StreamLog {
    fn next_id(&mut self) -> MessageId {
        let now_ms = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        if now_ms > self.last_ms {
            self.last_ms = now_ms;
            self.last_seq = 0;
        } else {
            self.last_seq += 1;
        }
        MessageId::new(format!("{}-{}", self.last_ms, self.last_seq))
    }

    fn push(&mut self, fields: StreamFields) -> MessageId {
        let id = self.next_id();
        self.next_offset += 1;
        self.entries.push_back(LogEntry {
            offset: self.next_offset,
            id: id.clone(),
            fields,
        });
        id
    }

    /// Approximate trim: only kicks in once the log exceeds `max_len` by a
    /// slack of a tenth of the bound, then cuts back down to `max_len`.
    fn trim_approx(&mut self, max_len: usize) {
        if max_len == 0 {
            return;
        }
        let slack = (max_len / 10).max(1);
        if self.entries.len() <= max_len + slack {
            return;
        }
        while self.entries.len() > max_len {
            self.entries.pop_front();
        }
    }
}

pub struct InMemoryStreamTransport {
    streams: Mutex<HashMap<String, StreamLog>>,
    notify: Notify,
    failing_appends: AtomicUsize,
    failing_acks: AtomicUsize,
    unavailable: AtomicBool,
}

impl InMemoryStreamTransport {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            failing_appends: AtomicUsize::new(0),
            failing_acks: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make the next `n` appends fail with a connection error.
    pub fn fail_appends(&self, n: usize) {
        self.failing_appends.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` acks fail with a connection error.
    pub fn fail_acks(&self, n: usize) {
        self.failing_acks.store(n, Ordering::SeqCst);
    }

    /// Simulate a broker outage: every operation fails until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
        // blocked readers re-check and fail fast
        self.notify.notify_waiters();
    }

    /// Snapshot of the entries currently retained in `stream`.
    pub async fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .map(|log| {
                log.entries
                    .iter()
                    .map(|e| StreamEntry {
                        id: e.id.clone(),
                        fields: e.fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every id passed to `ack` for `group`, in call order.
    pub async fn ack_calls(&self, stream: &str, group: &str) -> Vec<MessageId> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|g| g.ack_calls.clone())
            .unwrap_or_default()
    }

    pub async fn group_count(&self, stream: &str) -> usize {
        let streams = self.streams.lock().await;
        streams.get(stream).map(|log| log.groups.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Connection("stream transport unavailable".to_string()));
        }
        Ok(())
    }

    /// Consume one unit of an injected failure budget.
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryStreamTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamTransport for InMemoryStreamTransport {
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreated, TransportError> {
        self.check_available()?;
        let mut streams = self.streams.lock().await;
        let log = streams.entry(stream.to_string()).or_default();
        if log.groups.contains_key(group) {
            return Ok(GroupCreated::AlreadyExists);
        }
        // start at the beginning of the stream, so a backlog enqueued before
        // the group existed is still delivered
        log.groups.insert(group.to_string(), GroupState::default());
        Ok(GroupCreated::Created)
    }

    async fn append(
        &self,
        stream: &str,
        fields: &StreamFields,
        max_len: usize,
    ) -> Result<MessageId, TransportError> {
        self.check_available()?;
        if Self::take_failure(&self.failing_appends) {
            return Err(TransportError::Connection("injected append failure".to_string()));
        }

        let id = {
            let mut streams = self.streams.lock().await;
            let log = streams.entry(stream.to_string()).or_default();
            let id = log.push(fields.clone());
            log.trim_approx(max_len);
            id
        };

        // Notify outside the lock
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let deadline = (!block.is_zero()).then(|| tokio::time::Instant::now() + block);

        loop {
            // register interest before looking at the log, so an append that
            // lands between the check and the wait is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_available()?;
            {
                let mut streams = self.streams.lock().await;
                let no_group = || TransportError::NoSuchGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                };
                let log = streams.get_mut(stream).ok_or_else(no_group)?;
                let StreamLog {
                    entries, groups, ..
                } = log;
                let state = groups.get_mut(group).ok_or_else(no_group)?;

                let batch: Vec<&LogEntry> = entries
                    .iter()
                    .filter(|e| e.offset > state.delivered_upto)
                    .take(count.max(1))
                    .collect();

                if let Some(last) = batch.last() {
                    state.delivered_upto = last.offset;
                    let mut delivered = Vec::with_capacity(batch.len());
                    for entry in batch {
                        state.pending.insert(entry.id.clone(), consumer.to_string());
                        delivered.push(StreamEntry {
                            id: entry.id.clone(),
                            fields: entry.fields.clone(),
                        });
                    }
                    return Ok(delivered);
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(Vec::new());
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &MessageId) -> Result<(), TransportError> {
        self.check_available()?;
        if Self::take_failure(&self.failing_acks) {
            return Err(TransportError::Connection("injected ack failure".to_string()));
        }

        let mut streams = self.streams.lock().await;
        if let Some(state) = streams
            .get_mut(stream)
            .and_then(|log| log.groups.get_mut(group))
        {
            state.pending.remove(id);
            state.ack_calls.push(id.clone());
        }
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize, TransportError> {
        self.check_available()?;
        let streams = self.streams.lock().await;
        Ok(streams
            .get(stream)
            .and_then(|log| log.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0))
    }

    async fn len(&self, stream: &str) -> Result<usize, TransportError> {
        self.check_available()?;
        let streams = self.streams.lock().await;
        Ok(streams.get(stream).map(|log| log.entries.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::Instant;

    const S: &str = "test:stream";
    const G: &str = "test-group";

    fn fields(v: &str) -> StreamFields {
        StreamFields::from([("v".to_string(), v.to_string())])
    }

    #[tokio::test]
    async fn create_group_is_idempotent() {
        let t = InMemoryStreamTransport::new();
        assert_eq!(t.create_group(S, G).await.unwrap(), GroupCreated::Created);
        assert_eq!(t.create_group(S, G).await.unwrap(), GroupCreated::AlreadyExists);
        assert_eq!(t.group_count(S).await, 1);
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let t = InMemoryStreamTransport::new();
        let mut ids = Vec::new();
        for i in 0..50 {
            ids.push(t.append(S, &fields(&i.to_string()), 0).await.unwrap());
        }
        let parsed: Vec<(u64, u64)> = ids
            .iter()
            .map(|id| {
                let (ms, seq) = id.as_str().split_once('-').unwrap();
                (ms.parse().unwrap(), seq.parse().unwrap())
            })
            .collect();
        assert!(parsed.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn read_group_delivers_each_message_once_per_group() {
        let t = InMemoryStreamTransport::new();
        t.create_group(S, G).await.unwrap();
        t.append(S, &fields("a"), 0).await.unwrap();
        t.append(S, &fields("b"), 0).await.unwrap();

        let first = t
            .read_group(S, G, "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].fields["v"], "a");

        let second = t
            .read_group(S, G, "c2", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(t.pending_count(S, G).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn backlog_before_group_creation_is_delivered() {
        let t = InMemoryStreamTransport::new();
        t.append(S, &fields("early"), 0).await.unwrap();
        t.create_group(S, G).await.unwrap();
        let got = t
            .read_group(S, G, "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn read_group_respects_count() {
        let t = InMemoryStreamTransport::new();
        t.create_group(S, G).await.unwrap();
        for i in 0..5 {
            t.append(S, &fields(&i.to_string()), 0).await.unwrap();
        }
        let got = t
            .read_group(S, G, "c1", 2, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(got.len(), 2);
        let rest = t
            .read_group(S, G, "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].fields["v"], "2");
    }

    #[tokio::test]
    async fn read_group_times_out_empty() {
        let t = InMemoryStreamTransport::new();
        t.create_group(S, G).await.unwrap();
        let start = Instant::now();
        let got = t
            .read_group(S, G, "c1", 10, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(got.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn append_wakes_blocked_reader() {
        let t = Arc::new(InMemoryStreamTransport::new());
        t.create_group(S, G).await.unwrap();

        let reader = tokio::spawn({
            let t = t.clone();
            async move { t.read_group(S, G, "c1", 10, Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        let start = Instant::now();
        t.append(S, &fields("late"), 0).await.unwrap();

        let got = reader.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn read_without_group_fails() {
        let t = InMemoryStreamTransport::new();
        t.append(S, &fields("a"), 0).await.unwrap();
        let err = t
            .read_group(S, "missing", "c1", 10, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoSuchGroup { .. }));
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let t = InMemoryStreamTransport::new();
        t.create_group(S, G).await.unwrap();
        let id = t.append(S, &fields("a"), 0).await.unwrap();
        t.read_group(S, G, "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();

        t.ack(S, G, &id).await.unwrap();
        t.ack(S, G, &id).await.unwrap();
        t.ack(S, G, &MessageId::new("0-999")).await.unwrap();

        assert_eq!(t.pending_count(S, G).await.unwrap(), 0);
        // acked messages are never handed out again
        let again = t
            .read_group(S, G, "c1", 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn trim_is_approximate_but_bounded() {
        let t = InMemoryStreamTransport::new();
        for i in 0..100 {
            t.append(S, &fields(&i.to_string()), 20).await.unwrap();
        }
        let len = t.len(S).await.unwrap();
        assert!(len >= 20 && len <= 22, "len = {len}");

        // oldest entries are the ones dropped
        let entries = t.entries(S).await;
        assert_eq!(entries.last().unwrap().fields["v"], "99");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let t = InMemoryStreamTransport::new();
        t.fail_appends(1);
        assert!(t.append(S, &fields("a"), 0).await.is_err());
        assert!(t.append(S, &fields("b"), 0).await.is_ok());
        assert_eq!(t.len(S).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unavailable_transport_fails_everything() {
        let t = InMemoryStreamTransport::new();
        t.set_unavailable(true);
        assert!(t.create_group(S, G).await.is_err());
        assert!(t.append(S, &fields("a"), 0).await.is_err());
        t.set_unavailable(false);
        assert!(t.create_group(S, G).await.is_ok());
    }
}
