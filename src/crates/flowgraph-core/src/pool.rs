//! Keyed, bounded connection pooling
//!
//! I/O operators that hold long-lived connections (SQL executors, the
//! music-daemon executor) share their connections through a [`Pool`]. Each
//! pool is registered once under the operator's configured name, so every
//! operator instance with the same name draws from the same pool.
//!
//! A pool combines a bounded semaphore of capacity `max_size` with a FIFO
//! queue of idle live connections. Checkout acquires the semaphore, then
//! pops idle connections and probes each with a cheap protocol-specific
//! liveness check; the first live one is returned, dead ones are dropped.
//! When the queue runs dry a fresh connection is opened. Release pushes the
//! connection back and frees the semaphore.
//!
//! Invariants: `in_flight + idle` never exceeds `max_size`; a connection is
//! never held by two callers; a dead connection is never handed out.
//!
//! Protocol specifics (connect, probe, close) live behind the
//! [`ManagedConnection`] strategy trait.

use crate::error::{FlowError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Protocol strategy for pooled connections
#[async_trait]
pub trait ManagedConnection: Send + Sized + 'static {
    /// Connection parameters
    type Config: Clone + Send + Sync + 'static;

    /// Open a fresh connection
    async fn connect(config: &Self::Config) -> Result<Self>;

    /// Cheap liveness probe; `false` discards the connection
    async fn is_alive(&mut self) -> bool;

    /// Close the connection
    async fn close(self);
}

/// A bounded pool of connections for one key
pub struct Pool<C: ManagedConnection> {
    name: String,
    config: C::Config,
    permits: Semaphore,
    idle: tokio::sync::Mutex<VecDeque<C>>,
    closed: AtomicBool,
}

impl<C: ManagedConnection> Pool<C> {
    /// Create a pool holding at most `max_size` connections
    pub fn new(name: impl Into<String>, config: C::Config, max_size: usize) -> Self {
        Self {
            name: name.into(),
            config,
            permits: Semaphore::new(max_size.max(1)),
            idle: tokio::sync::Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Pool key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check out a live connection.
    ///
    /// Waits on the semaphore when `max_size` connections are already in
    /// flight. Every idle connection popped is probed; dead ones are
    /// discarded. Opening a fresh connection on an empty queue releases the
    /// permit again on failure.
    pub async fn get(&self) -> Result<C> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FlowError::pool(&self.name, "pool is closed"));
        }

        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FlowError::pool(&self.name, "pool is closed"))?;
        // The permit is tracked manually so the caller can hold the bare
        // connection; release() adds it back.
        permit.forget();

        loop {
            let popped = self.idle.lock().await.pop_front();
            match popped {
                Some(mut conn) => {
                    if conn.is_alive().await {
                        tracing::debug!(pool = %self.name, "checkout from idle queue");
                        return Ok(conn);
                    }
                    tracing::debug!(pool = %self.name, "discarding dead connection");
                    conn.close().await;
                }
                None => break,
            }
        }

        match C::connect(&self.config).await {
            Ok(conn) => {
                tracing::debug!(pool = %self.name, "opened fresh connection");
                Ok(conn)
            }
            Err(err) => {
                self.permits.add_permits(1);
                Err(err)
            }
        }
    }

    /// Return a connection to the idle queue and free its permit
    pub async fn release(&self, conn: C) {
        if self.closed.load(Ordering::Acquire) {
            conn.close().await;
            return;
        }
        self.idle.lock().await.push_back(conn);
        self.permits.add_permits(1);
        tracing::debug!(pool = %self.name, "connection released");
    }

    /// Close the pool: drain and close every idle connection.
    ///
    /// Later checkouts fail; connections still in flight are closed when
    /// released.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut idle = self.idle.lock().await;
        while let Some(conn) = idle.pop_front() {
            conn.close().await;
        }
    }
}

/// Process-wide directory of pools for one protocol.
///
/// Each protocol module owns a `static` registry; operators register their
/// pool under their configured name at construction, so same-named
/// instances share connections. The first registration for a name wins.
pub struct PoolRegistry<C: ManagedConnection> {
    inner: OnceLock<parking_lot::Mutex<HashMap<String, Arc<Pool<C>>>>>,
}

impl<C: ManagedConnection> PoolRegistry<C> {
    /// Empty registry, const-constructible for `static` use
    pub const fn new() -> Self {
        Self {
            inner: OnceLock::new(),
        }
    }

    fn map(&self) -> &parking_lot::Mutex<HashMap<String, Arc<Pool<C>>>> {
        self.inner
            .get_or_init(|| parking_lot::Mutex::new(HashMap::new()))
    }

    /// Register a pool for `name`, or return the existing one
    pub fn register(&self, name: &str, config: C::Config, max_size: usize) -> Arc<Pool<C>> {
        self.map()
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Pool::new(name, config, max_size)))
            .clone()
    }

    /// Look up the pool for `name`
    pub fn lookup(&self, name: &str) -> Option<Arc<Pool<C>>> {
        self.map().lock().get(name).cloned()
    }

    /// Remove and close the pool for `name`
    pub async fn unregister(&self, name: &str) {
        let pool = self.map().lock().remove(name);
        if let Some(pool) = pool {
            pool.close().await;
        }
    }
}

impl<C: ManagedConnection> Default for PoolRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
