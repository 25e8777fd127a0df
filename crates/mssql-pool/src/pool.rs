//! Connection pool implementation.
//!
//! Mirrors the connection lifecycle semantics described in ARCHITECTURE.md
//! §4.3: an idle dequeue, an active count, a pinned subset held by open
//! transactions, and a background reaper that respects `min_connections`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mssql_client::{Client, Config as ClientConfig};
use mssql_client::state::Ready;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::lifecycle::ConnectionMetadata;

/// A connection pool for SQL Server.
///
/// The pool manages a set of database connections, providing automatic
/// connection reuse, health checking, and lifecycle management.
pub struct Pool {
    config: PoolConfig,
    client_config: ClientConfig,
    inner: Arc<PoolInner>,
}

struct IdleSlot {
    client: Client<Ready>,
    metadata: ConnectionMetadata,
}

struct PoolState {
    idle: VecDeque<IdleSlot>,
    /// Connections currently checked out (includes pinned ones).
    active: u32,
    /// Subset of `active` held by an open transaction.
    pinned: u32,
    total: u32,
}

struct PoolInner {
    state: Mutex<PoolState>,
    release_notify: Notify,
    closed: AtomicBool,
    next_id: AtomicU64,

    connections_created: AtomicU64,
    connections_closed: AtomicU64,
    checkouts_successful: AtomicU64,
    checkouts_failed: AtomicU64,
    acquire_wait_total_ms: AtomicU64,
    health_checks_performed: AtomicU64,
    health_checks_failed: AtomicU64,
    resets_performed: AtomicU64,
    resets_failed: AtomicU64,
}

impl Pool {
    /// Create a new pool, validating `pool_config` and spawning the idle
    /// reaper. Does not eagerly open `min_connections`; those are created
    /// lazily on first acquire (kept simple and dependency-free of a runtime
    /// handle at construction time).
    pub async fn new(pool_config: PoolConfig, client_config: ClientConfig) -> Result<Self, PoolError> {
        pool_config.validate()?;

        let inner = Arc::new(PoolInner {
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                pinned: 0,
                total: 0,
            }),
            release_notify: Notify::new(),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            connections_created: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            checkouts_successful: AtomicU64::new(0),
            checkouts_failed: AtomicU64::new(0),
            acquire_wait_total_ms: AtomicU64::new(0),
            health_checks_performed: AtomicU64::new(0),
            health_checks_failed: AtomicU64::new(0),
            resets_performed: AtomicU64::new(0),
            resets_failed: AtomicU64::new(0),
        });

        spawn_idle_reaper(Arc::clone(&inner), pool_config.clone());

        Ok(Self {
            config: pool_config,
            client_config,
            inner,
        })
    }

    /// Start building a pool with explicit configuration.
    #[must_use]
    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Acquire a connection, waiting up to `connection_timeout` for one to
    /// become available. Returns `PoolError::PoolClosed` if the pool has
    /// been closed, `PoolError::Timeout` if the wait budget is exhausted.
    pub async fn get(&self) -> Result<PooledConnection, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let wait_start = Instant::now();
        let deadline = wait_start + self.config.connection_timeout;

        loop {
            if let Some(conn) = self.try_take_idle() {
                self.inner
                    .acquire_wait_total_ms
                    .fetch_add(wait_start.elapsed().as_millis() as u64, Ordering::Relaxed);
                self.inner.checkouts_successful.fetch_add(1, Ordering::Relaxed);
                return Ok(conn);
            }

            let can_create = {
                let state = self.inner.state.lock();
                state.total < self.config.max_connections
            };

            if can_create {
                match self.create_connection().await {
                    Ok(conn) => {
                        self.inner
                            .acquire_wait_total_ms
                            .fetch_add(wait_start.elapsed().as_millis() as u64, Ordering::Relaxed);
                        self.inner.checkouts_successful.fetch_add(1, Ordering::Relaxed);
                        return Ok(conn);
                    }
                    Err(e) => {
                        self.inner.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                        return Err(e);
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.inner.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Timeout);
            }

            if tokio::time::timeout(remaining, self.inner.release_notify.notified())
                .await
                .is_err()
            {
                self.inner.checkouts_failed.fetch_add(1, Ordering::Relaxed);
                return Err(PoolError::Timeout);
            }
        }
    }

    /// Take an idle connection without waiting or creating a new one.
    /// Returns `Ok(None)` if none is immediately available.
    pub fn try_get(&self) -> Result<Option<PooledConnection>, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        Ok(self.try_take_idle())
    }

    fn try_take_idle(&self) -> Option<PooledConnection> {
        let mut state = self.inner.state.lock();
        let mut slot = state.idle.pop_front()?;
        slot.metadata.mark_checkout();
        state.active += 1;
        drop(state);

        Some(PooledConnection {
            client: Some(slot.client),
            metadata: slot.metadata,
            inner: Arc::clone(&self.inner),
            pinned: false,
            sp_reset_connection: self.config.sp_reset_connection,
        })
    }

    async fn create_connection(&self) -> Result<PooledConnection, PoolError> {
        {
            let mut state = self.inner.state.lock();
            state.total += 1;
            state.active += 1;
        }

        let client = Client::connect(self.client_config.clone()).await.map_err(|e| {
            let mut state = self.inner.state.lock();
            state.total -= 1;
            state.active -= 1;
            PoolError::ConnectionCreation(e.to_string())
        })?;

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.connections_created.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection_id = id, "created pooled connection");

        let mut metadata = ConnectionMetadata::new(id);
        metadata.mark_checkout();

        Ok(PooledConnection {
            client: Some(client),
            metadata,
            inner: Arc::clone(&self.inner),
            pinned: false,
            sp_reset_connection: self.config.sp_reset_connection,
        })
    }

    /// Current point-in-time status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            available: state.idle.len() as u32,
            in_use: state.active,
            pinned: state.pinned,
            total: state.total,
            max: self.config.max_connections,
        }
    }

    /// Cumulative counters since the pool was created.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            connections_created: self.inner.connections_created.load(Ordering::Relaxed),
            connections_closed: self.inner.connections_closed.load(Ordering::Relaxed),
            checkouts_successful: self.inner.checkouts_successful.load(Ordering::Relaxed),
            checkouts_failed: self.inner.checkouts_failed.load(Ordering::Relaxed),
            acquire_wait_total_ms: self.inner.acquire_wait_total_ms.load(Ordering::Relaxed),
            health_checks_performed: self.inner.health_checks_performed.load(Ordering::Relaxed),
            health_checks_failed: self.inner.health_checks_failed.load(Ordering::Relaxed),
            resets_performed: self.inner.resets_performed.load(Ordering::Relaxed),
            resets_failed: self.inner.resets_failed.load(Ordering::Relaxed),
        }
    }

    /// Close the pool, dropping all idle connections. Connections currently
    /// checked out are closed as they're returned.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let drained: Vec<IdleSlot> = {
            let mut state = self.inner.state.lock();
            state.idle.drain(..).collect()
        };

        for slot in drained {
            let _ = slot.client.close().await;
            self.inner.connections_closed.fetch_add(1, Ordering::Relaxed);
            let mut state = self.inner.state.lock();
            state.total = state.total.saturating_sub(1);
        }

        self.inner.release_notify.notify_waiters();
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

fn spawn_idle_reaper(inner: Arc<PoolInner>, config: PoolConfig) {
    if config.idle_timeout.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            if inner.closed.load(Ordering::Acquire) {
                return;
            }

            let expired: Vec<IdleSlot> = {
                let mut state = inner.state.lock();
                let floor = config.min_connections;
                let mut kept = VecDeque::new();
                let mut reaped = Vec::new();
                while let Some(slot) = state.idle.pop_front() {
                    let total_if_reaped = state.total.saturating_sub(reaped.len() as u32 + 1);
                    if slot.metadata.is_idle_expired(config.idle_timeout) && total_if_reaped >= floor {
                        reaped.push(slot);
                    } else {
                        kept.push_back(slot);
                    }
                }
                state.idle = kept;
                state.total = state.total.saturating_sub(reaped.len() as u32);
                reaped
            };

            for slot in expired {
                tracing::trace!(connection_id = slot.metadata.id, "reaping idle connection");
                let _ = slot.client.close().await;
                inner.connections_closed.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
}

/// Builder for [`Pool`].
#[derive(Default)]
pub struct PoolBuilder {
    client_config: Option<ClientConfig>,
    pool_config: PoolConfig,
}

impl PoolBuilder {
    /// Start with default pool settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client_config: None,
            pool_config: PoolConfig::default(),
        }
    }

    /// Set the connection configuration used to open new connections.
    #[must_use]
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.pool_config.max_connections = count;
        self
    }

    /// Set the minimum number of connections the reaper will preserve.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.pool_config.min_connections = count;
        self
    }

    /// Set the connection acquisition timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.connection_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_config.idle_timeout = timeout;
        self
    }

    /// Build the pool.
    pub async fn build(self) -> Result<Pool, PoolError> {
        let client_config = self
            .client_config
            .ok_or_else(|| PoolError::Configuration("client_config is required".into()))?;
        Pool::new(self.pool_config, client_config).await
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolStatus {
    /// Number of idle connections available.
    pub available: u32,
    /// Number of connections currently in use (includes pinned).
    pub in_use: u32,
    /// Number of connections pinned by an open transaction.
    pub pinned: u32,
    /// Total number of connections.
    pub total: u32,
    /// Maximum allowed connections.
    pub max: u32,
}

impl PoolStatus {
    /// Percentage of `max` currently in use, in `[0.0, 100.0]`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            (self.in_use as f64 / self.max as f64) * 100.0
        }
    }
}

/// Cumulative pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolMetrics {
    /// Connections created over the pool's lifetime.
    pub connections_created: u64,
    /// Connections closed (reaped, returned-while-closed, or broken).
    pub connections_closed: u64,
    /// Successful `get`/`try_get` calls.
    pub checkouts_successful: u64,
    /// Failed `get`/`try_get` calls (timeout, pool closed, connection error).
    pub checkouts_failed: u64,
    /// Cumulative time callers spent waiting in `get`.
    pub acquire_wait_total_ms: u64,
    /// Health checks performed on checkout/checkin.
    pub health_checks_performed: u64,
    /// Health checks that failed.
    pub health_checks_failed: u64,
    /// `sp_reset_connection` executions performed on return.
    pub resets_performed: u64,
    /// `sp_reset_connection` executions that failed.
    pub resets_failed: u64,
}

impl PoolMetrics {
    /// Fraction of checkouts that succeeded, in `[0.0, 1.0]`.
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            1.0
        } else {
            self.checkouts_successful as f64 / total as f64
        }
    }
}

/// A connection retrieved from the pool.
///
/// When dropped, the connection is returned to the pool unless it was
/// `detach`ed or the pool has been closed, in which case it is closed
/// instead. Returning a connection runs `sp_reset_connection` first (if
/// enabled) on a spawned task so `Drop` itself stays synchronous.
pub struct PooledConnection {
    client: Option<Client<Ready>>,
    metadata: ConnectionMetadata,
    inner: Arc<PoolInner>,
    pinned: bool,
    sp_reset_connection: bool,
}

impl PooledConnection {
    /// Metadata about this connection (id, checkout count, timestamps).
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Detach the connection from the pool.
    ///
    /// The connection will not be returned to the pool when dropped; the
    /// caller is responsible for closing it.
    pub fn detach(mut self) -> Client<Ready> {
        let mut state = self.inner.state.lock();
        state.active = state.active.saturating_sub(1);
        state.total = state.total.saturating_sub(1);
        if self.pinned {
            state.pinned = state.pinned.saturating_sub(1);
        }
        drop(state);
        self.client.take().expect("client present until drop")
    }

    /// Mark this connection as pinned to an open transaction. Subsequent
    /// drops return it to the pool as usual, but it is reported separately
    /// in `PoolStatus::pinned` while the flag is set.
    pub fn pin(&mut self) {
        if !self.pinned {
            self.pinned = true;
            self.inner.state.lock().pinned += 1;
        }
    }

    /// Clear the pinned flag set by `pin` (call on transaction commit/rollback).
    pub fn unpin(&mut self) {
        if self.pinned {
            self.pinned = false;
            let mut state = self.inner.state.lock();
            state.pinned = state.pinned.saturating_sub(1);
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Client<Ready>;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref().expect("client present until drop")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().expect("client present until drop")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        let inner = Arc::clone(&self.inner);
        let mut metadata = self.metadata.clone();
        let was_pinned = self.pinned;
        let sp_reset_connection = self.sp_reset_connection;
        metadata.mark_checkin();

        let closed = inner.closed.load(Ordering::Acquire);

        let task = async move {
            let mut client = client;
            let mut broken = false;

            if !closed && sp_reset_connection {
                match client.execute("EXEC sp_reset_connection", &[]).await {
                    Ok(_) => {
                        inner.resets_performed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        inner.resets_failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(error = %e, "sp_reset_connection failed; closing connection");
                        broken = true;
                    }
                }
            }

            let mut state = inner.state.lock();
            state.active = state.active.saturating_sub(1);
            if was_pinned {
                state.pinned = state.pinned.saturating_sub(1);
            }

            if closed || broken {
                state.total = state.total.saturating_sub(1);
                drop(state);
                let _ = client.close().await;
                inner.connections_closed.fetch_add(1, Ordering::Relaxed);
            } else {
                state.idle.push_back(IdleSlot { client, metadata });
                drop(state);
            }

            inner.release_notify.notify_one();
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
            }
            Err(_) => {
                // No runtime available (e.g. dropped during shutdown); best
                // effort: just drop counters consistent without the reset.
                let mut state = inner.state.lock();
                state.active = state.active.saturating_sub(1);
                state.total = state.total.saturating_sub(1);
                if was_pinned {
                    state.pinned = state.pinned.saturating_sub(1);
                }
            }
        }
    }
}
