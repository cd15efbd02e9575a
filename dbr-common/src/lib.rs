//! # DbRoute Common
//!
//! Shared routing types: store indices, call descriptors, and the index
//! resolver. Everything here is pure data and logic; I/O lives in
//! `dbr-client`.

pub mod descriptor;
pub mod index;
pub mod resolver;

// Re-export for convenience
pub use descriptor::*;
pub use index::*;
pub use resolver::*;
