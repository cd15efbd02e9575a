//! # Error Types
//!
//! Three layers of failure:
//! - `ClientError`: a single connection failed to talk to the server.
//! - `RouteError`: routing a call failed (pool creation, acquire timeout);
//!   surfaced to the caller of `Dispatcher::execute`.
//! - `ReleaseError`: returning a connection failed; only ever logged.

use std::time::Duration;

use dbr_common::StoreIndex;
use thiserror::Error;

/// Result type for connection-level operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type for routing operations.
pub type RouteResult<T> = Result<T, RouteError>;

/// Errors raised by a single connection.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {}", String::from_utf8_lossy(.message))]
    Server { message: Vec<u8> },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Host/port did not resolve to any socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl ClientError {
    /// Returns true when the connection that produced this error can no
    /// longer be trusted and must not go back to the pool.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Protocol | ClientError::InvalidAddress(_)
        )
    }
}

/// Errors surfaced to callers of the dispatcher and registry.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A new pool could not be constructed; nothing was cached.
    #[error("failed to create pool for store index {index}: {source}")]
    PoolCreation {
        index: StoreIndex,
        #[source]
        source: ClientError,
    },
    /// No connection became available within the pool's wait timeout.
    #[error("timed out after {waited:?} waiting for a connection to store index {index}")]
    AcquireTimeout { index: StoreIndex, waited: Duration },
    /// The pool was shut down (evicted) while the call was waiting on it.
    #[error("pool for store index {index} is closed")]
    PoolClosed { index: StoreIndex },
    /// The pool had capacity but opening a fresh connection failed.
    #[error("failed to open connection to store index {index}: {source}")]
    Connect {
        index: StoreIndex,
        #[source]
        source: ClientError,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// A command issued inside a unit of work failed.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Failures on the release path. Logged by the pool, never returned.
#[derive(Debug, Error)]
pub enum ReleaseError {
    /// Restoring the connection's selected database failed.
    #[error("failed to reset connection for store index {index}: {source}")]
    Recycle {
        index: StoreIndex,
        #[source]
        source: ClientError,
    },
    /// Closing a discarded connection failed.
    #[error("failed to close connection for store index {index}: {source}")]
    Close {
        index: StoreIndex,
        #[source]
        source: ClientError,
    },
}
