//! In-memory work queue for tests/dev.
//!
//! Behaves like a single durable queue inside one process: FIFO delivery,
//! per-consumer prefetch of one, and redelivery of anything released or left
//! outstanding by a dropped consumer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use scanqueue_core::WorkItem;

use super::{QueueError, QueueMessage, WorkConsumer, WorkQueue, encode_item};

#[derive(Debug)]
struct Entry {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<Entry>,
    unacked: HashMap<u64, Vec<u8>>,
    next_tag: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn requeue(&self, tag: u64) -> bool {
        let mut state = self.lock();
        match state.unacked.remove(&tag) {
            Some(body) => {
                state.ready.push_front(Entry {
                    body,
                    redelivered: true,
                });
                self.available.notify_one();
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryWorkQueue {
    shared: Arc<Shared>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new consumer attached to this queue.
    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            shared: self.shared.clone(),
            in_flight: None,
        }
    }

    /// Messages waiting for a consumer.
    pub fn ready_len(&self) -> usize {
        self.shared.lock().ready.len()
    }

    /// Messages delivered but not yet acknowledged.
    pub fn unacked_len(&self) -> usize {
        self.shared.lock().unacked.len()
    }

    /// Append a raw body (bypasses work item encoding).
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) {
        let mut state = self.shared.lock();
        state.ready.push_back(Entry {
            body: body.into(),
            redelivered: false,
        });
        self.shared.available.notify_one();
    }
}

impl WorkQueue for InMemoryWorkQueue {
    fn declare(&self) -> Result<(), QueueError> {
        Ok(())
    }

    fn enqueue(&self, item: &WorkItem) -> Result<(), QueueError> {
        self.push_raw(encode_item(item)?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct InMemoryConsumer {
    shared: Arc<Shared>,
    in_flight: Option<u64>,
}

impl InMemoryConsumer {
    fn take_in_flight(&mut self, delivery_tag: &str) -> Result<u64, QueueError> {
        match self.in_flight {
            Some(tag) if tag.to_string() == delivery_tag => {
                self.in_flight = None;
                Ok(tag)
            }
            _ => Err(QueueError::UnknownDelivery(delivery_tag.to_string())),
        }
    }
}

impl WorkConsumer for InMemoryConsumer {
    fn receive(&mut self, timeout: Duration) -> Result<Option<QueueMessage>, QueueError> {
        if let Some(tag) = self.in_flight {
            return Err(QueueError::Unacked(tag.to_string()));
        }

        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(entry) = state.ready.pop_front() {
                let tag = state.next_tag;
                state.next_tag += 1;
                state.unacked.insert(tag, entry.body.clone());
                self.in_flight = Some(tag);
                return Ok(Some(QueueMessage {
                    delivery_tag: tag.to_string(),
                    body: entry.body,
                    redelivered: entry.redelivered,
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn ack(&mut self, delivery_tag: &str) -> Result<(), QueueError> {
        let tag = self.take_in_flight(delivery_tag)?;
        self.shared.lock().unacked.remove(&tag);
        Ok(())
    }

    fn release(&mut self, delivery_tag: &str) -> Result<(), QueueError> {
        let tag = self.take_in_flight(delivery_tag)?;
        self.shared.requeue(tag);
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if let Some(tag) = self.in_flight.take() {
            self.shared.requeue(tag);
        }
    }
}
