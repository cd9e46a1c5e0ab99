//! Redis Streams-backed work queue (durable, at-least-once delivery).
//!
//! - **Stream**: one stream per queue name; each entry carries the JSON work
//!   item in its `payload` field.
//! - **Consumer group**: all workers share one group, so each entry goes to
//!   exactly one worker at a time.
//! - **Acknowledgment**: entries stay in the group's pending list until the
//!   worker acks them (XACK + XDEL).
//! - **Redelivery**: a consumer first re-reads its own pending entries (after
//!   a restart, a release or a reconnect), and periodically claims entries
//!   held longer than the visibility timeout (XAUTOCLAIM over the whole
//!   pending list).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use redis::streams::{StreamClaimReply, StreamId, StreamReadOptions, StreamReadReply};
use redis::{Commands, Connection, ErrorKind, FromRedisValue, RedisError, RedisResult, Value};
use tracing::{debug, info, instrument, warn};

use scanqueue_core::WorkItem;

use super::{QueueError, QueueMessage, WorkConsumer, WorkQueue, encode_item};
use crate::redis_conn::{RedisConnector, is_transient};
use crate::retry::RetryPolicy;

/// Consumer group shared by every worker.
pub const DEFAULT_CONSUMER_GROUP: &str = "workers";

/// Default visibility timeout before another consumer may claim an entry.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Longest single BLOCK; longer receive timeouts are truncated.
const MAX_BLOCK: Duration = Duration::from_secs(5);

/// How often a consumer looks for stale entries held by others.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);

const PAYLOAD_FIELD: &str = "payload";

/// XAUTOCLAIM cursor for the start of the pending list.
const SCAN_START: &str = "0-0";

fn unavailable(e: RedisError) -> QueueError {
    QueueError::Unavailable(e.to_string())
}

/// XGROUP CREATE ... MKSTREAM, treating an existing group as success.
fn ensure_group(conn: &mut Connection, stream: &str, group: &str) -> RedisResult<()> {
    match conn.xgroup_create_mkstream::<_, _, _, ()>(stream, group, "0") {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Producer handle.
#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    conn: Arc<RedisConnector>,
    redis_url: String,
    stream: String,
    group: String,
    declared: Arc<AtomicBool>,
}

impl RedisStreamsQueue {
    pub fn new(redis_url: impl Into<String>, stream: impl Into<String>) -> Result<Self, QueueError> {
        let redis_url = redis_url.into();
        let conn = RedisConnector::new(&redis_url, RetryPolicy::default()).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(conn),
            redis_url,
            stream: stream.into(),
            group: DEFAULT_CONSUMER_GROUP.to_string(),
            declared: Arc::new(AtomicBool::new(false)),
        })
    }

    /// A consumer with its own connection (XREADGROUP blocks it).
    pub fn consumer(
        &self,
        name: impl Into<String>,
        visibility_timeout: Duration,
    ) -> Result<RedisStreamsConsumer, QueueError> {
        let conn = RedisConnector::new(&self.redis_url, RetryPolicy::no_retry())
            .map_err(unavailable)?
            .with_read_timeout(MAX_BLOCK + Duration::from_secs(5));
        Ok(RedisStreamsConsumer {
            conn,
            stream: self.stream.clone(),
            group: self.group.clone(),
            name: name.into(),
            visibility_timeout,
            in_flight: None,
            state: ReadState::new(),
        })
    }
}

impl WorkQueue for RedisStreamsQueue {
    #[instrument(skip(self), fields(stream = %self.stream, group = %self.group), err)]
    fn declare(&self) -> Result<(), QueueError> {
        self.conn
            .run(|conn| ensure_group(conn, &self.stream, &self.group))
            .map_err(unavailable)?;
        self.declared.store(true, Ordering::Release);
        Ok(())
    }

    #[instrument(skip(self, item), fields(stream = %self.stream, job_id = %item.id), err)]
    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        let payload = encode_item(item)?;
        if !self.declared.load(Ordering::Acquire) {
            self.declare()?;
        }
        let result: RedisResult<String> = self
            .conn
            .run(|conn| conn.xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload.as_slice())]));
        match result {
            Ok(entry_id) => {
                debug!(entry_id = %entry_id, "work item appended");
                Ok(())
            }
            Err(e) => {
                if is_transient(&e) {
                    // Broker may have restarted without persistence.
                    self.declared.store(false, Ordering::Release);
                }
                Err(unavailable(e))
            }
        }
    }
}

/// What a consumer has to do before it reads new entries.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadState {
    /// Create the group (again) before reading.
    needs_declare: bool,
    /// Re-read this consumer's own pending entries before new ones.
    read_pending: bool,
    last_reclaim: Option<Instant>,
}

impl ReadState {
    fn new() -> Self {
        Self {
            needs_declare: true,
            read_pending: true,
            last_reclaim: None,
        }
    }

    fn declared(&mut self) {
        self.needs_declare = false;
    }

    fn pending_drained(&mut self) {
        self.read_pending = false;
    }

    /// True when a reclaim pass is due at `now`; the pass counts as started.
    fn start_reclaim(&mut self, now: Instant) -> bool {
        let due = self
            .last_reclaim
            .is_none_or(|at| now.saturating_duration_since(at) >= RECLAIM_INTERVAL);
        if due {
            self.last_reclaim = Some(now);
        }
        due
    }

    /// A read failed. After a lost connection the broker may have restarted
    /// without the group, and an entry may have been delivered but not seen.
    fn read_failed(&mut self, transient: bool) {
        if transient {
            self.needs_declare = true;
            self.read_pending = true;
        }
    }

    /// The entry stays pending for this consumer.
    fn released(&mut self) {
        self.read_pending = true;
    }

    /// The entry is still pending on the broker.
    fn ack_failed(&mut self, transient: bool) {
        self.read_pending = true;
        if transient {
            self.needs_declare = true;
        }
    }
}

/// Split an XAUTOCLAIM reply into the next cursor and the claimed entries.
///
/// Redis 7 appends a third element (ids of deleted entries); Redis 6.2
/// reports those as nil entries instead. Both are skipped.
fn parse_autoclaim(reply: &Value) -> RedisResult<(String, Vec<StreamId>)> {
    let (cursor, entries) = match reply {
        Value::Bulk(parts) if parts.len() >= 2 => (&parts[0], &parts[1]),
        _ => return Err(RedisError::from((ErrorKind::TypeError, "unexpected XAUTOCLAIM reply"))),
    };
    let cursor = String::from_redis_value(cursor)?;
    let entries = match entries {
        Value::Bulk(items) => Value::Bulk(
            items
                .iter()
                .filter(|item| !matches!(item, Value::Nil))
                .cloned()
                .collect(),
        ),
        other => other.clone(),
    };
    Ok((cursor, StreamClaimReply::from_redis_value(&entries)?.ids))
}

/// Consumer handle. Not shared between threads: one per worker.
#[derive(Debug)]
pub struct RedisStreamsConsumer {
    conn: RedisConnector,
    stream: String,
    group: String,
    name: String,
    visibility_timeout: Duration,
    in_flight: Option<String>,
    state: ReadState,
}

impl RedisStreamsConsumer {
    fn next_entry(&mut self, timeout: Duration) -> RedisResult<Option<(StreamId, bool)>> {
        if self.state.needs_declare {
            self.conn.run(|conn| ensure_group(conn, &self.stream, &self.group))?;
            self.state.declared();
            info!(stream = %self.stream, group = %self.group, consumer = %self.name, "queue declared");
        }

        if self.state.read_pending {
            if let Some(entry) = self.read_group("0", None)? {
                return Ok(Some((entry, true)));
            }
            self.state.pending_drained();
        }

        if self.state.start_reclaim(Instant::now()) {
            if let Some(entry) = self.reclaim_stale()? {
                return Ok(Some((entry, true)));
            }
        }

        let block = timeout.min(MAX_BLOCK);
        Ok(self.read_group(">", Some(block))?.map(|entry| (entry, false)))
    }

    fn read_group(&self, id: &str, block: Option<Duration>) -> RedisResult<Option<StreamId>> {
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.name)
            .count(1);
        if let Some(block) = block {
            // BLOCK 0 would wait forever.
            opts = opts.block((block.as_millis() as usize).max(1));
        }
        let reply: Option<StreamReadReply> = self
            .conn
            .run(|conn| conn.xread_options(&[&self.stream], &[id], &opts))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next())
    }

    /// Claim one entry held past the visibility timeout, scanning the whole
    /// pending list with XAUTOCLAIM until one is found or the cursor wraps.
    fn reclaim_stale(&self) -> RedisResult<Option<StreamId>> {
        let min_idle_ms = self.visibility_timeout.as_millis() as u64;
        let mut cursor = SCAN_START.to_string();
        loop {
            let reply: Value = self.conn.run(|conn| {
                redis::cmd("XAUTOCLAIM")
                    .arg(&self.stream)
                    .arg(&self.group)
                    .arg(&self.name)
                    .arg(min_idle_ms)
                    .arg(&cursor)
                    .arg("COUNT")
                    .arg(1)
                    .query(conn)
            })?;
            let (next, claimed) = parse_autoclaim(&reply)?;
            if let Some(entry) = claimed.into_iter().next() {
                warn!(entry_id = %entry.id, consumer = %self.name, "reclaimed stale delivery");
                return Ok(Some(entry));
            }
            if next == SCAN_START {
                return Ok(None);
            }
            cursor = next;
        }
    }

    fn take_in_flight(&mut self, delivery_tag: &str) -> Result<String, QueueError> {
        match self.in_flight.take() {
            Some(tag) if tag == delivery_tag => Ok(tag),
            other => {
                self.in_flight = other;
                Err(QueueError::UnknownDelivery(delivery_tag.to_string()))
            }
        }
    }
}

impl WorkConsumer for RedisStreamsConsumer {
    fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(tag) = &self.in_flight {
            return Err(QueueError::Unacked(tag.clone()));
        }

        match self.next_entry(timeout) {
            Ok(Some((entry, redelivered))) => {
                // A missing payload decodes as malformed and is dropped by the worker.
                let body: Vec<u8> = entry.get(PAYLOAD_FIELD).unwrap_or_default();
                self.in_flight = Some(entry.id.clone());
                Ok(Some(QueueMessage {
                    delivery_tag: entry.id,
                    body,
                    redelivered,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                self.state.read_failed(is_transient(&e));
                Err(unavailable(e))
            }
        }
    }

    #[instrument(skip(self), fields(stream = %self.stream, consumer = %self.name), err)]
    fn ack(&mut self, delivery_tag: &str) -> Result<(), QueueError> {
        let tag = self.take_in_flight(delivery_tag)?;
        let result = self.conn.run(|conn| {
            redis::pipe()
                .atomic()
                .xack(&self.stream, &self.group, &[&tag])
                .ignore()
                .xdel(&self.stream, &[&tag])
                .ignore()
                .query::<()>(conn)
        });
        if let Err(e) = result {
            // Comes back on the next pending read.
            self.state.ack_failed(is_transient(&e));
            return Err(unavailable(e));
        }
        Ok(())
    }

    fn release(&mut self, delivery_tag: &str) -> Result<(), QueueError> {
        self.take_in_flight(delivery_tag)?;
        // Streams have no nack: the entry stays pending for this consumer and
        // is picked up again by the next pending read.
        self.state.released();
        Ok(())
    }
}
