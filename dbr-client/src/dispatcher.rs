//! # Dispatcher
//!
//! Purpose: Run a unit of work against a connection to the store index its
//! call resolves to, and give the connection back afterwards no matter how
//! the unit of work ends.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Callers see `execute`; resolution, pooling and
//!    release stay behind it.
//! 2. **Explicit Scope**: The connection is handed to the unit of work as
//!    `&mut ScopedConnection`. It is never stored in shared or thread-local
//!    state, so concurrent calls cannot observe each other's connections.
//! 3. **Unconditional Release**: Release is driven by `Drop`, so early
//!    returns, errors and panics inside the unit of work all return the
//!    connection exactly once.
//! 4. **Transparent Results**: Whatever the unit of work returns is passed
//!    through untouched; release failures are logged, never surfaced.
//!
//! ## Call Lifecycle
//!
//! ```text
//! Unbound → Resolving → Acquiring → Bound-Executing → Releasing → Unbound
//!                          │                 │
//!                          └─ RouteError     └─ Ok / Err / panic (all release)
//! ```

use std::sync::Arc;

use dbr_common::{CallContext, IndexResolver, StoreIndex};

use crate::config::RouterConfig;
use crate::connection::{Connector, Execute, RespConnector};
use crate::error::{ClientResult, RouteError, RouteResult};
use crate::pool::PooledConnection;
use crate::registry::{PoolRegistry, SweeperHandle};
use crate::resp::RespValue;

/// Routes units of work to per-index connection pools.
pub struct Dispatcher<C: Connector = RespConnector> {
    registry: Arc<PoolRegistry<C>>,
    resolver: IndexResolver,
    // Stops the sweeper thread when the dispatcher is dropped.
    sweeper: Option<SweeperHandle>,
}

impl Dispatcher<RespConnector> {
    /// Builds a dispatcher over TCP pools and starts the idle-pool sweeper.
    pub fn from_config(config: &RouterConfig) -> RouteResult<Self> {
        let registry = Arc::new(PoolRegistry::from_config(config)?);
        Ok(Dispatcher::new(registry).with_sweeper(config.sweep_interval()))
    }
}

impl<C: Connector> Dispatcher<C> {
    /// Creates a dispatcher over an existing registry, without a sweeper.
    pub fn new(registry: Arc<PoolRegistry<C>>) -> Self {
        Dispatcher {
            registry,
            resolver: IndexResolver::new(),
            sweeper: None,
        }
    }

    /// Starts (or restarts) the background idle-pool sweeper.
    pub fn with_sweeper(mut self, interval: std::time::Duration) -> Self {
        self.sweeper = Some(self.registry.start_sweeper(interval));
        self
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<C>> {
        &self.registry
    }

    /// Resolves the call's store index and runs `work` on a connection to it.
    ///
    /// **Logic**:
    /// 1. Resolve the index from the call's descriptors and arguments.
    /// 2. Get (or create) the index's pool and borrow a connection, waiting
    ///    up to the pool's wait timeout.
    /// 3. Run `work` with the connection bound to this call only.
    /// 4. Return the connection, then hand back `work`'s result unchanged.
    ///
    /// # Errors
    /// Pool creation and acquisition failures are converted into `E`;
    /// errors produced by `work` are returned as-is.
    pub fn execute<T, E, F>(&self, call: &CallContext, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedConnection<C>) -> Result<T, E>,
        E: From<RouteError>,
    {
        let resolution = self.resolver.resolve_call(call);
        self.run(resolution.index, work)
    }

    /// Runs `work` against a raw index, coercing out-of-range values to 0.
    pub fn execute_on<T, E, F>(&self, raw_index: i64, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedConnection<C>) -> Result<T, E>,
        E: From<RouteError>,
    {
        let (index, _) = StoreIndex::clamp(raw_index);
        self.run(index, work)
    }

    fn run<T, E, F>(&self, index: StoreIndex, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut ScopedConnection<C>) -> Result<T, E>,
        E: From<RouteError>,
    {
        let pool = self.registry.get_or_create(index)?;
        let mut scoped = ScopedConnection::bind(pool.acquire()?);
        tracing::trace!(index = index.get(), "connection bound");

        let result = work(&mut scoped);

        scoped.release();
        tracing::trace!(index = index.get(), ok = result.is_ok(), "connection released");
        result
    }

    /// Stops the sweeper and shuts down every pool.
    pub fn shutdown(&mut self) -> usize {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
        self.registry.shutdown()
    }
}

/// One connection bound to one in-flight unit of work.
///
/// Only the dispatcher can create it; the unit of work sees it by mutable
/// reference and cannot keep it past the call.
pub struct ScopedConnection<C: Connector = RespConnector> {
    conn: PooledConnection<C>,
}

impl<C: Connector> ScopedConnection<C> {
    fn bind(conn: PooledConnection<C>) -> Self {
        ScopedConnection { conn }
    }

    /// Store index this connection is bound to.
    pub fn index(&self) -> StoreIndex {
        self.conn.index()
    }

    /// Direct access to the underlying connection.
    ///
    /// Commands sent through this reference bypass the fatal-error tracking
    /// of [`Execute::exec`] on the scoped handle. After an I/O or protocol
    /// failure on this path, call [`ScopedConnection::mark_broken`] so the
    /// connection is discarded instead of going back to the idle set.
    pub fn connection(&mut self) -> &mut C::Connection {
        self.conn.get_mut()
    }

    /// Marks the connection as unusable so it is discarded on release.
    pub fn mark_broken(&mut self) {
        self.conn.mark_broken();
    }

    fn release(self) {
        drop(self.conn);
    }
}

impl<C> Execute for ScopedConnection<C>
where
    C: Connector,
    C::Connection: Execute,
{
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.conn.exec(args)
    }
}
