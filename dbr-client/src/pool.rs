//! # Connection Pool
//!
//! Purpose: Keep a bounded set of reusable connections to one store index.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections;
//!    connect, health-check and close run with the lock released.
//! 3. **Bounded Waiting**: When the pool is at capacity, `acquire` waits on a
//!    condition variable up to `max_wait`, then fails with `AcquireTimeout`.
//! 4. **RAII Return**: `PooledConnection` hands its connection back on drop,
//!    so release happens on every exit path, including panics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dbr_common::StoreIndex;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::connection::{Connector, Execute};
use crate::error::{ClientResult, ReleaseError, RouteError, RouteResult};
use crate::resp::RespValue;

/// Sizing and borrow policy for one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Connections opened eagerly when the pool is created.
    pub min_idle: usize,
    /// How long `acquire` may block when the pool is at capacity.
    pub max_wait: Duration,
    /// Run the connector's health check before handing out an idle connection.
    pub test_on_borrow: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_total: 100,
            max_idle: 20,
            min_idle: 5,
            max_wait: Duration::from_millis(3000),
            test_on_borrow: true,
        }
    }
}

/// Point-in-time occupancy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub total: usize,
    pub max_total: usize,
    pub closed: bool,
}

impl PoolStatus {
    /// Connections currently borrowed.
    pub fn in_use(&self) -> usize {
        self.total.saturating_sub(self.idle)
    }
}

/// Lifetime counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened.
    pub created: u64,
    /// Successful borrows.
    pub acquired: u64,
    /// Borrowed connections handed back, whether kept or discarded.
    pub released: u64,
    /// Connections that left the pool (broken, surplus, or shutdown).
    pub closed: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    acquired: AtomicU64,
    released: AtomicU64,
    closed: AtomicU64,
}

struct PoolState<T> {
    idle: VecDeque<T>,
    total: usize,
    closed: bool,
}

struct PoolInner<C: Connector> {
    index: StoreIndex,
    connector: Arc<C>,
    config: PoolConfig,
    state: Mutex<PoolState<C::Connection>>,
    available: Condvar,
    counters: Counters,
}

/// Connection pool handle for one store index.
///
/// Cloning is cheap; clones share the same underlying pool.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("index", &self.inner.index)
            .field("status", &self.status())
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Creates a pool for `index` and opens its initial connections.
    ///
    /// The first connection must succeed, otherwise the pool is not created
    /// and `RouteError::PoolCreation` is returned. Further prefill failures
    /// only stop the prefill.
    pub fn new(index: StoreIndex, connector: Arc<C>, config: PoolConfig) -> RouteResult<Self> {
        if config.max_total == 0 {
            return Err(RouteError::InvalidConfig("max_total must be at least 1".into()));
        }

        let prefill = config.min_idle.clamp(1, config.max_total.min(config.max_idle.max(1)));
        let mut idle = VecDeque::with_capacity(config.max_idle);

        let first = connector
            .connect(index)
            .map_err(|source| RouteError::PoolCreation { index, source })?;
        idle.push_back(first);

        while idle.len() < prefill {
            match connector.connect(index) {
                Ok(conn) => idle.push_back(conn),
                Err(err) => {
                    tracing::warn!(index = index.get(), error = %err, "stopped prefilling pool");
                    break;
                }
            }
        }

        let counters = Counters::default();
        counters.created.store(idle.len() as u64, Ordering::Relaxed);
        tracing::debug!(index = index.get(), idle = idle.len(), "created connection pool");

        Ok(ConnectionPool {
            inner: Arc::new(PoolInner {
                index,
                connector,
                state: Mutex::new(PoolState {
                    total: idle.len(),
                    idle,
                    closed: false,
                }),
                config,
                available: Condvar::new(),
                counters,
            }),
        })
    }

    pub fn index(&self) -> StoreIndex {
        self.inner.index
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns true when both handles point at the same pool.
    pub fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Borrows a connection, waiting up to `max_wait` when at capacity.
    ///
    /// **Logic**:
    /// 1. Reuse the most recently returned idle connection, health-checking
    ///    it when `test_on_borrow` is set; failed checks are discarded.
    /// 2. Otherwise open a new connection if under `max_total`.
    /// 3. Otherwise wait for a return or a freed slot until the deadline.
    pub fn acquire(&self) -> RouteResult<PooledConnection<C>> {
        let inner = &self.inner;
        let index = inner.index;
        let deadline = Instant::now() + inner.config.max_wait;
        let mut state = inner.state.lock();

        loop {
            if state.closed {
                return Err(RouteError::PoolClosed { index });
            }

            if let Some(mut conn) = state.idle.pop_back() {
                if !inner.config.test_on_borrow {
                    return Ok(self.lend(conn));
                }
                let checked = MutexGuard::unlocked(&mut state, || inner.connector.check(&mut conn));
                match checked {
                    Ok(()) => return Ok(self.lend(conn)),
                    Err(err) => {
                        tracing::debug!(index = index.get(), error = %err, "discarding connection that failed health check");
                        state.total -= 1;
                        MutexGuard::unlocked(&mut state, || self.close_logged(conn));
                        continue;
                    }
                }
            }

            if state.total < inner.config.max_total {
                state.total += 1;
                let opened = MutexGuard::unlocked(&mut state, || inner.connector.connect(index));
                return match opened {
                    Ok(conn) => {
                        inner.counters.created.fetch_add(1, Ordering::Relaxed);
                        Ok(self.lend(conn))
                    }
                    Err(source) => {
                        state.total -= 1;
                        inner.available.notify_one();
                        Err(RouteError::Connect { index, source })
                    }
                };
            }

            if inner.available.wait_until(&mut state, deadline).timed_out()
                && state.idle.is_empty()
                && state.total >= inner.config.max_total
                && !state.closed
            {
                return Err(RouteError::AcquireTimeout {
                    index,
                    waited: inner.config.max_wait,
                });
            }
        }
    }

    /// Returns current occupancy.
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            total: state.total,
            max_total: self.inner.config.max_total,
            closed: state.closed,
        }
    }

    /// Returns lifetime counters.
    pub fn stats(&self) -> PoolStats {
        let counters = &self.inner.counters;
        PoolStats {
            created: counters.created.load(Ordering::Relaxed),
            acquired: counters.acquired.load(Ordering::Relaxed),
            released: counters.released.load(Ordering::Relaxed),
            closed: counters.closed.load(Ordering::Relaxed),
        }
    }

    /// Closes the pool: idle connections are closed now, borrowed ones when
    /// they are returned, and waiters fail with `PoolClosed`.
    ///
    /// Returns the number of idle connections closed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<C::Connection> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return 0;
            }
            state.closed = true;
            let drained: Vec<_> = state.idle.drain(..).collect();
            state.total -= drained.len();
            drained
        };
        self.inner.available.notify_all();

        let count = drained.len();
        for conn in drained {
            self.close_logged(conn);
        }
        count
    }

    fn lend(&self, conn: C::Connection) -> PooledConnection<C> {
        self.inner.counters.acquired.fetch_add(1, Ordering::Relaxed);
        PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            broken: false,
        }
    }

    /// Takes a borrowed connection back.
    ///
    /// Healthy connections are recycled into the idle set when there is room;
    /// everything else is closed and its slot freed.
    fn release(&self, mut conn: C::Connection, broken: bool) -> Result<(), ReleaseError> {
        let inner = &self.inner;
        let index = inner.index;
        inner.counters.released.fetch_add(1, Ordering::Relaxed);

        let mut recycle_err = None;
        if !broken {
            if let Err(source) = inner.connector.recycle(&mut conn) {
                recycle_err = Some(ReleaseError::Recycle { index, source });
            }
        }

        {
            let mut state = inner.state.lock();
            let keep = !broken
                && recycle_err.is_none()
                && !state.closed
                && state.idle.len() < inner.config.max_idle;
            if keep {
                state.idle.push_back(conn);
                drop(state);
                inner.available.notify_one();
                return Ok(());
            }
            state.total -= 1;
        }
        inner.available.notify_one();

        let closed = self.close(conn);
        match recycle_err {
            Some(err) => Err(err),
            None => closed,
        }
    }

    fn close(&self, conn: C::Connection) -> Result<(), ReleaseError> {
        self.inner.counters.closed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .connector
            .close(conn)
            .map_err(|source| ReleaseError::Close {
                index: self.inner.index,
                source,
            })
    }

    fn close_logged(&self, conn: C::Connection) {
        if let Err(err) = self.close(conn) {
            tracing::warn!(index = self.inner.index.get(), error = %err, "failed to close connection");
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection<C: Connector> {
    pool: ConnectionPool<C>,
    conn: Option<C::Connection>,
    broken: bool,
}

impl<C: Connector> PooledConnection<C> {
    /// Store index of the owning pool.
    pub fn index(&self) -> StoreIndex {
        self.pool.index()
    }

    /// Mutable access to the underlying connection.
    pub fn get_mut(&mut self) -> &mut C::Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_mut().expect("connection exists until drop")
    }

    /// Marks the connection as unusable so it is closed instead of reused.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    pub fn is_broken(&self) -> bool {
        self.broken
    }
}

impl<C: Connector> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("index", &self.pool.index())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<C> Execute for PooledConnection<C>
where
    C: Connector,
    C::Connection: Execute,
{
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let response = self.get_mut().exec(args);
        if let Err(err) = &response {
            // If IO/protocol fails, do not return this connection to the pool.
            if err.is_fatal() {
                self.broken = true;
            }
        }
        response
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        // A panic mid-command leaves the stream in an unknown state.
        let broken = self.broken || std::thread::panicking();
        if let Err(err) = self.pool.release(conn, broken) {
            tracing::warn!(index = self.pool.index().get(), error = %err, "failed to release connection");
        }
    }
}
