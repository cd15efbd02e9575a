//! # DbRoute Client
//!
//! Purpose: Route units of work to one of the sixteen logical databases of a
//! Redis-compatible server, keeping one lazily created connection pool per
//! database and evicting pools that sit idle.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections per database to avoid
//!    repeated connects and `SELECT`s.
//! 2. **Explicit Routing Data**: Which database a call targets is declared
//!    with descriptors and resolved from the call's own arguments.
//! 3. **Scoped Ownership**: A borrowed connection belongs to exactly one unit
//!    of work and is returned when that unit of work ends, however it ends.
//! 4. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod client;
mod config;
mod connection;
mod dispatcher;
mod error;
mod ops;
mod pool;
mod registry;
mod resp;

#[cfg(test)]
mod testing;

pub use client::{RoutedClient, DB_PARAM};
pub use config::RouterConfig;
pub use connection::{ConnectSettings, Connection, Connector, Execute, RespConnector};
pub use dispatcher::{Dispatcher, ScopedConnection};
pub use error::{ClientError, ClientResult, ReleaseError, RouteError, RouteResult};
pub use ops::Commands;
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PoolStatus, PooledConnection};
pub use registry::{PoolRegistry, SweeperHandle};
pub use resp::RespValue;
