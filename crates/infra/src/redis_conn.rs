//! Shared Redis connection with reconnect-on-failure.
//!
//! Every Redis-backed adapter goes through [`RedisConnector::run`]: the cached
//! connection is reused while healthy, dropped on connectivity errors, and the
//! operation is retried under the adapter's [`RetryPolicy`].

use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use redis::{Client, Connection, RedisError, RedisResult};
use tracing::warn;

use crate::retry::RetryPolicy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// True for errors that a fresh connection may fix.
pub fn is_transient(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

pub struct RedisConnector {
    client: Client,
    conn: Mutex<Option<Connection>>,
    retry: RetryPolicy,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for RedisConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnector")
            .field("client", &self.client)
            .field("retry", &self.retry)
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisConnector {
    pub fn new(redis_url: impl AsRef<str>, retry: RetryPolicy) -> RedisResult<Self> {
        Ok(Self {
            client: Client::open(redis_url.as_ref())?,
            conn: Mutex::new(None),
            retry,
            read_timeout: None,
        })
    }

    /// Socket read timeout for commands (must exceed any `BLOCK` used).
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// A fresh, uncached connection (pub/sub needs its own).
    pub fn connect(&self) -> RedisResult<Connection> {
        let conn = self.client.get_connection_with_timeout(CONNECT_TIMEOUT)?;
        conn.set_read_timeout(self.read_timeout)?;
        Ok(conn)
    }

    /// Run `op` on the shared connection, reconnecting and retrying transient
    /// failures. Non-transient errors are returned immediately.
    pub fn run<T>(&self, mut op: impl FnMut(&mut Connection) -> RedisResult<T>) -> RedisResult<T> {
        let mut attempt = 0u32;
        loop {
            match self.try_once(&mut op) {
                Ok(v) => return Ok(v),
                Err(e) if is_transient(&e) && self.retry.should_retry(attempt) => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "redis operation failed, reconnecting");
                    thread::sleep(delay);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_once<T>(&self, op: &mut impl FnMut(&mut Connection) -> RedisResult<T>) -> RedisResult<T> {
        let mut guard = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect()?,
        };
        let result = op(&mut conn);
        // A broken connection is dropped; the next call reconnects.
        if !matches!(&result, Err(e) if is_transient(e)) {
            *guard = Some(conn);
        }
        result
    }
}
