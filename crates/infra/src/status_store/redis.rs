//! Redis-backed status store.
//!
//! Records live in one hash per job (`job:{id}`) with the fields `id`,
//! `arguments`, `status`, `task` and, for failures, `reason`. A write replaces
//! the whole hash in a single MULTI/EXEC so readers never see a half-written
//! record.
//!
//! Change events go out over Redis pub/sub on the `events` channel. Pub/sub is
//! not durable: subscribers that are offline (or reconnecting) miss messages.
//! That matches the fan-out contract; the hash is the record of truth.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, SyncSender};
use std::thread;
use std::time::Duration;

use redis::{Commands, RedisError, RedisResult};
use tracing::{debug, instrument, warn};

use scanqueue_core::{ChangeEvent, JobId, JobRecord, JobStatus, StatusKind, Task};
use scanqueue_events::{
    DEFAULT_SUBSCRIPTION_CAPACITY, Delivery, SubscriberSink, Subscription, subscription_channel,
};

use super::{EVENTS_CHANNEL, JOB_KEY_PREFIX, StatusStore, StoreError, job_key};
use crate::redis_conn::RedisConnector;
use crate::retry::RetryPolicy;

/// How often a pub/sub reader wakes up to check whether its subscriber left.
const SUBSCRIBER_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RedisStatusStore {
    conn: Arc<RedisConnector>,
    channel: String,
    resubscribe: RetryPolicy,
}

impl RedisStatusStore {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let conn = RedisConnector::new(redis_url, RetryPolicy::default()).map_err(unavailable)?;
        Ok(Self {
            conn: Arc::new(conn),
            channel: EVENTS_CHANNEL.to_string(),
            resubscribe: RetryPolicy::forever(Duration::from_millis(100), Duration::from_secs(5)),
        })
    }
}

fn unavailable(e: RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// Hash fields for a record.
fn encode_record(record: &JobRecord) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("id", record.id.to_string()),
        ("arguments", record.arguments.clone()),
        ("status", record.status.kind().to_string()),
        ("task", record.task.to_string()),
    ];
    if let Some(reason) = record.status.reason() {
        fields.push(("reason", reason.to_string()));
    }
    fields
}

/// Rebuild a record from its hash fields. `None` when the hash does not exist.
fn decode_record(key: &str, mut fields: HashMap<String, String>) -> Result<Option<JobRecord>, StoreError> {
    if fields.is_empty() {
        return Ok(None);
    }
    let corrupt = |reason: String| StoreError::Corrupt {
        key: key.to_string(),
        reason,
    };

    let id: JobId = fields
        .get("id")
        .ok_or_else(|| corrupt("missing field `id`".to_string()))?
        .parse()
        .map_err(|e| corrupt(format!("{e}")))?;
    let kind: StatusKind = fields
        .get("status")
        .ok_or_else(|| corrupt("missing field `status`".to_string()))?
        .parse()
        .map_err(|e| corrupt(format!("{e}")))?;
    let task: Task = fields
        .get("task")
        .ok_or_else(|| corrupt("missing field `task`".to_string()))?
        .parse()
        .map_err(|e| corrupt(format!("{e}")))?;

    Ok(Some(JobRecord {
        id,
        arguments: fields.remove("arguments").unwrap_or_default(),
        status: JobStatus::from_parts(kind, fields.remove("reason")),
        task,
    }))
}

impl StatusStore for RedisStatusStore {
    #[instrument(skip(self, record), fields(job_id = %record.id), err)]
    fn put(&self, record: &JobRecord) -> Result<(), StoreError> {
        let key = job_key(record.id);
        let fields = encode_record(record);
        self.conn
            .run(|conn| {
                redis::pipe()
                    .atomic()
                    .del(&key)
                    .ignore()
                    .hset_multiple(&key, &fields)
                    .ignore()
                    .query::<()>(conn)
            })
            .map_err(unavailable)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    fn get(&self, id: JobId) -> Result<Option<JobRecord>, StoreError> {
        let key = job_key(id);
        let fields: HashMap<String, String> =
            self.conn.run(|conn| conn.hgetall(&key)).map_err(unavailable)?;
        decode_record(&key, fields)
    }

    #[instrument(skip(self), err)]
    fn list(&self) -> Result<Vec<JobRecord>, StoreError> {
        let pattern = format!("{JOB_KEY_PREFIX}*");
        let hashes = self
            .conn
            .run(|conn| {
                let keys: Vec<String> = conn.scan_match::<_, String>(&pattern)?.collect();
                let mut hashes = Vec::with_capacity(keys.len());
                for key in keys {
                    let fields: HashMap<String, String> = conn.hgetall(&key)?;
                    hashes.push((key, fields));
                }
                Ok(hashes)
            })
            .map_err(unavailable)?;

        let mut records = Vec::with_capacity(hashes.len());
        for (key, fields) in hashes {
            match decode_record(&key, fields) {
                Ok(Some(record)) => records.push(record),
                // Deleted between SCAN and HGETALL.
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable job record"),
            }
        }
        Ok(records)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    fn delete(&self, id: JobId) -> Result<bool, StoreError> {
        let key = job_key(id);
        let removed: i64 = self.conn.run(|conn| conn.del(&key)).map_err(unavailable)?;
        Ok(removed > 0)
    }

    #[instrument(skip(self, event), fields(job_id = %event.id, task = %event.task), err)]
    fn publish(&self, event: &ChangeEvent) -> Result<(), StoreError> {
        let payload =
            serde_json::to_string(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let _receivers: i64 = self
            .conn
            .run(|conn| conn.publish(&self.channel, &payload))
            .map_err(unavailable)?;
        Ok(())
    }

    fn subscribe(&self) -> Result<Subscription<ChangeEvent>, StoreError> {
        let (sink, subscription) = subscription_channel(DEFAULT_SUBSCRIPTION_CAPACITY);
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let conn = self.conn.clone();
        let channel = self.channel.clone();
        let resubscribe = self.resubscribe.clone();
        thread::Builder::new()
            .name("redis-events".to_string())
            .spawn(move || pump_events(&conn, &channel, &resubscribe, sink, ready_tx))
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        // Only hand out the subscription once SUBSCRIBE has been acknowledged,
        // so events published after this call returns are not missed.
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(subscription),
            Ok(Err(e)) => Err(unavailable(e)),
            Err(_) => Err(StoreError::Unavailable("event subscriber exited".to_string())),
        }
    }

    fn ping(&self) -> Result<(), StoreError> {
        self.conn
            .run(|conn| redis::cmd("PING").query::<String>(conn))
            .map(|_| ())
            .map_err(unavailable)
    }
}

/// Body of a subscriber thread: forward pub/sub messages into `sink` until the
/// subscription is dropped, resubscribing after connection loss.
fn pump_events(
    conn: &RedisConnector,
    channel: &str,
    resubscribe: &RetryPolicy,
    sink: SubscriberSink<ChangeEvent>,
    ready: SyncSender<RedisResult<()>>,
) {
    let mut ready = Some(ready);
    let mut attempt = 0u32;

    while !sink.is_closed() {
        let result = conn.connect().and_then(|mut connection| {
            let mut pubsub = connection.as_pubsub();
            pubsub.subscribe(channel)?;
            pubsub.set_read_timeout(Some(SUBSCRIBER_POLL))?;
            if let Some(tx) = ready.take() {
                let _ = tx.send(Ok(()));
            }
            attempt = 0;
            forward(&mut pubsub, &sink)
            // Dropping `pubsub` unsubscribes.
        });

        match result {
            Ok(()) => return,
            Err(e) => {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Err(e));
                    return;
                }
                attempt += 1;
                let delay = resubscribe.delay_for_attempt(attempt);
                warn!(attempt, error = %e, "event subscription lost, resubscribing");
                thread::sleep(delay);
            }
        }
    }
}

/// Returns `Ok` once the subscriber is gone, `Err` on connection failure.
fn forward(pubsub: &mut redis::PubSub<'_>, sink: &SubscriberSink<ChangeEvent>) -> RedisResult<()> {
    loop {
        if sink.is_closed() {
            return Ok(());
        }
        let msg = match pubsub.get_message() {
            Ok(msg) => msg,
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        };
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "non-text event payload");
                continue;
            }
        };
        let event: ChangeEvent = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "undecodable change event");
                continue;
            }
        };
        match sink.deliver(event) {
            Delivery::Delivered => {}
            Delivery::Lagged => debug!("subscriber lagging, event dropped"),
            Delivery::Closed => return Ok(()),
        }
    }
}
