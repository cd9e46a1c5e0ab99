//! Live change-event stream (Server-Sent Events).
//!
//! Each observer gets its own store subscription and a forwarding task. The
//! task drains the subscription on a short fixed interval and pushes every
//! change event, as JSON, into a small per-observer buffer. An observer whose
//! buffer is full is disconnected rather than allowed to hold up anyone else.
//! The task ends when the client goes away, when the feed closes, or when the
//! connection registry is shut down; dropping its guard and subscription is
//! all the cleanup there is.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::mpsc::TryRecvError;
use std::time::Duration;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse,
    },
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use scanqueue_core::ChangeEvent;
use scanqueue_events::Subscription;

use crate::app::errors;
use crate::app::registry::ConnectionGuard;
use crate::app::routes::blocking;
use crate::app::services::AppServices;

/// How often a subscription is drained.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(100);

/// Events buffered per observer before it counts as too slow.
pub const OBSERVER_BUFFER: usize = 256;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

type SseItem = Result<SseEvent, Infallible>;

/// GET /api/subscribe
pub async fn subscribe(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    let guard = match services.registry.register() {
        Ok(g) => g,
        Err(e) => return errors::json_error(StatusCode::SERVICE_UNAVAILABLE, "shutting_down", e.to_string()),
    };

    // Subscribe before answering so nothing published after the response
    // starts can be missed.
    let store = services.store.clone();
    let subscription = match blocking(move || store.subscribe()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => return errors::store_error_to_response(e),
        Err(resp) => return resp,
    };

    let (tx, rx) = mpsc::channel::<SseItem>(OBSERVER_BUFFER);
    // Gets the headers and a first chunk out right away.
    let _ = tx.try_send(Ok(SseEvent::default().comment("connected")));

    info!(connection = guard.id(), observers = services.registry.len(), "observer connected");
    tokio::spawn(forward_events(guard, subscription, tx));

    Sse::new(ReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
        .into_response()
}

/// Why a forwarding task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    ClientGone,
    TooSlow,
    FeedClosed,
    Shutdown,
}

/// Forward change events from `subscription` to `tx` until the stream ends.
pub async fn forward_events(
    guard: ConnectionGuard,
    subscription: Subscription<ChangeEvent>,
    tx: mpsc::Sender<SseItem>,
) -> StreamEnd {
    let mut tick = tokio::time::interval(DRAIN_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let end = loop {
        tokio::select! {
            _ = guard.cancelled() => break StreamEnd::Shutdown,
            _ = tx.closed() => break StreamEnd::ClientGone,
            _ = tick.tick() => {}
        }
        if let Err(end) = drain(&subscription, &tx) {
            break end;
        }
    };

    match end {
        StreamEnd::TooSlow => warn!(connection = guard.id(), "observer too slow; disconnecting"),
        StreamEnd::FeedClosed => warn!(connection = guard.id(), "event feed closed"),
        _ => debug!(connection = guard.id(), reason = ?end, "observer stream ended"),
    }
    if subscription.lagged() > 0 {
        debug!(connection = guard.id(), lagged = subscription.lagged(), "observer missed events");
    }
    end
}

fn drain(subscription: &Subscription<ChangeEvent>, tx: &mpsc::Sender<SseItem>) -> Result<(), StreamEnd> {
    loop {
        let event = match subscription.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => return Err(StreamEnd::FeedClosed),
        };
        let data = match serde_json::to_string(&event) {
            Ok(d) => d,
            Err(e) => {
                warn!(job_id = %event.id, error = %e, "failed to encode change event");
                continue;
            }
        };
        match tx.try_send(Ok(SseEvent::default().data(data))) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => return Err(StreamEnd::TooSlow),
            Err(TrySendError::Closed(_)) => return Err(StreamEnd::ClientGone),
        }
    }
}
