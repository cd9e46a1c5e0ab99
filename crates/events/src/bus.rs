//! Event publishing/subscription abstraction (mechanics only).
//!
//! This module provides the **event bus pattern**: a pub/sub mechanism for
//! distributing change events to many independent consumers (live observer
//! streams, tests, tooling).
//!
//! ## Delivery model
//!
//! - **Best-effort fan-out**: every live subscription receives a copy of each
//!   published message. Subscribers that connect later miss earlier messages
//!   (no replay).
//! - **Bounded buffers**: each subscription has a fixed-capacity buffer. A
//!   subscriber that does not keep up loses messages (it lags); the publisher
//!   never blocks on it.
//! - **Per-subscription order**: messages arrive in the order the bus accepted
//!   them. Nothing is guaranteed across publishers.
//!
//! The store of record is written *before* publishing, so a lost notification
//! never loses state: observers can always fall back to listing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;

/// Default number of messages buffered per subscription.
pub const DEFAULT_SUBSCRIPTION_CAPACITY: usize = 256;

/// Create a connected (publisher side, subscription) pair with a bounded buffer.
pub fn subscription_channel<M>(capacity: usize) -> (SubscriberSink<M>, Subscription<M>) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    let closed = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicU64::new(0));

    let sink = SubscriberSink {
        sender: tx,
        closed: closed.clone(),
        dropped: dropped.clone(),
    };
    let subscription = Subscription {
        receiver: rx,
        closed,
        dropped,
    };
    (sink, subscription)
}

/// Outcome of handing one message to a subscriber.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Buffer full; the message was dropped for this subscriber only.
    Lagged,
    /// The subscription is gone; the sink should be discarded.
    Closed,
}

/// Publisher-side handle feeding exactly one [`Subscription`].
#[derive(Debug)]
pub struct SubscriberSink<M> {
    sender: SyncSender<M>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl<M> SubscriberSink<M> {
    /// Non-blocking delivery.
    pub fn deliver(&self, message: M) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Delivery::Lagged
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Closed,
        }
    }

    /// True once the subscription side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A subscription to an event stream.
///
/// A subscription provides a way to receive events from an event bus. Each
/// subscription gets a copy of all events published while it is alive.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = bus.subscribe();
///
/// loop {
///     while let Ok(event) = subscription.try_recv() {
///         forward(event)?;
///     }
///     sleep(poll_interval);
/// }
/// ```
///
/// Dropping the subscription unsubscribes it: publishers notice on their next
/// delivery attempt (or sooner, for transports that watch [`SubscriberSink::is_closed`]).
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    closed: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl<M> Subscription<M> {
    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Messages dropped for this subscriber because its buffer was full.
    pub fn lagged(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// mutation -> status store (write) -> EventBus (publish) -> subscriptions
///                                                            ├─ live observer streams
///                                                            └─ tests / tooling
/// ```
///
/// `publish()` can fail (lock poisoning, network error). Failures are surfaced to
/// the caller; since the record is already persisted, retrying is safe.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
