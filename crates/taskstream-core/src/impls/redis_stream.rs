//! Redis Streams transport (`redis` feature).
//!
//! - `create_group`: `XGROUP CREATE <stream> <group> 0 MKSTREAM`, `BUSYGROUP` → AlreadyExists
//! - `append`: `XADD <stream> MAXLEN ~ <n> * field value ...`
//! - `read_group`: `XREADGROUP GROUP <group> <consumer> COUNT <n> BLOCK <ms> STREAMS <stream> >`
//! - `ack`: `XACK`, `pending_count`: `XPENDING` (summary form), `len`: `XLEN`
//!
//! Blocking reads never run on the shared command connection: a blocked
//! `XREADGROUP` would stall every other command multiplexed behind it.
//! Each read checks out a dedicated connection from a small idle pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::streams::{StreamPendingReply, StreamReadReply};
use redis::{Client, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::{MessageId, StreamFields, TransportError};
use crate::ports::{GroupCreated, StreamEntry, StreamTransport};

#[derive(Clone)]
pub struct RedisStreamTransport {
    client: Arc<Client>,
    commands: ConnectionManager,
    /// Idle connections reserved for blocking reads.
    readers: Arc<Mutex<Vec<MultiplexedConnection>>>,
}

impl RedisStreamTransport {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: &str) -> Result<Self, TransportError> {
        let client = Client::open(redis_url).map_err(|e| TransportError::Connection(e.to_string()))?;
        let commands = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        debug!(url = %redis_url, "connected to redis");

        Ok(Self {
            client: Arc::new(client),
            commands,
            readers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    async fn checkout_reader(&self) -> Result<MultiplexedConnection, TransportError> {
        if let Some(conn) = self.readers.lock().await.pop() {
            return Ok(conn);
        }
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))
    }

    async fn checkin_reader(&self, conn: MultiplexedConnection) {
        self.readers.lock().await.push(conn);
    }
}

fn map_redis_error(op: &str, e: RedisError) -> TransportError {
    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
        TransportError::Connection(format!("{op}: {e}"))
    } else {
        TransportError::Command(format!("{op} failed: {e}"))
    }
}

fn is_no_group(e: &RedisError) -> bool {
    e.code() == Some("NOGROUP")
}

fn xadd_cmd(stream: &str, fields: &StreamFields, max_len: usize) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(stream);
    if max_len > 0 {
        cmd.arg("MAXLEN").arg("~").arg(max_len);
    }
    cmd.arg("*");

    // deterministic field order on the wire
    let mut pairs: Vec<(&String, &String)> = fields.iter().collect();
    pairs.sort();
    for (key, value) in pairs {
        cmd.arg(key).arg(value);
    }
    cmd
}

fn xreadgroup_cmd(
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block: Duration,
) -> redis::Cmd {
    let mut cmd = redis::cmd("XREADGROUP");
    cmd.arg("GROUP")
        .arg(group)
        .arg(consumer)
        .arg("COUNT")
        .arg(count.max(1))
        .arg("BLOCK")
        .arg(block.as_millis() as u64)
        .arg("STREAMS")
        .arg(stream)
        .arg(">");
    cmd
}

fn into_entries(reply: StreamReadReply) -> Result<Vec<StreamEntry>, TransportError> {
    let mut entries = Vec::new();
    for key in reply.keys {
        for item in key.ids {
            let mut fields = StreamFields::with_capacity(item.map.len());
            for (name, value) in &item.map {
                let value: String = redis::from_redis_value(value).map_err(|e| {
                    TransportError::Protocol(format!("field `{name}` of {}: {e}", item.id))
                })?;
                fields.insert(name.clone(), value);
            }
            entries.push(StreamEntry {
                id: MessageId::new(item.id),
                fields,
            });
        }
    }
    Ok(entries)
}

#[async_trait]
impl StreamTransport for RedisStreamTransport {
    #[instrument(skip(self), err)]
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupCreated, TransportError> {
        let mut conn = self.commands.clone();
        // start at "0" so a backlog appended before the group existed is delivered
        let result: redis::RedisResult<String> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => Ok(GroupCreated::Created),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(GroupCreated::AlreadyExists),
            Err(e) => Err(map_redis_error("XGROUP CREATE", e)),
        }
    }

    async fn append(
        &self,
        stream: &str,
        fields: &StreamFields,
        max_len: usize,
    ) -> Result<MessageId, TransportError> {
        let mut conn = self.commands.clone();
        let id: String = xadd_cmd(stream, fields, max_len)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("XADD", e))?;
        Ok(MessageId::new(id))
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, TransportError> {
        let mut conn = self.checkout_reader().await?;
        // If this future is dropped mid-BLOCK (shutdown), the connection is
        // dropped with it and never returns to the pool.
        let result: redis::RedisResult<Option<StreamReadReply>> =
            xreadgroup_cmd(stream, group, consumer, count, block)
                .query_async(&mut conn)
                .await;

        match result {
            Ok(reply) => {
                self.checkin_reader(conn).await;
                match reply {
                    Some(reply) => into_entries(reply),
                    // BLOCK timed out
                    None => Ok(Vec::new()),
                }
            }
            Err(e) if is_no_group(&e) => {
                self.checkin_reader(conn).await;
                Err(TransportError::NoSuchGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })
            }
            Err(e) => {
                warn!(%stream, %group, error = %e, "XREADGROUP failed, dropping reader connection");
                Err(map_redis_error("XREADGROUP", e))
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, id: &MessageId) -> Result<(), TransportError> {
        let mut conn = self.commands.clone();
        let _acked: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(id.as_str())
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("XACK", e))?;
        Ok(())
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<usize, TransportError> {
        let mut conn = self.commands.clone();
        let result: redis::RedisResult<StreamPendingReply> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await;
        match result {
            Ok(reply) => Ok(reply.count()),
            Err(e) if is_no_group(&e) => Ok(0),
            Err(e) => Err(map_redis_error("XPENDING", e)),
        }
    }

    async fn len(&self, stream: &str) -> Result<usize, TransportError> {
        let mut conn = self.commands.clone();
        redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("XLEN", e))
    }
}
