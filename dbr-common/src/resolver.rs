//! # Index Resolver
//!
//! Purpose: Compute the effective store index for one call from its declared
//! descriptors and actual arguments.
//!
//! ## Design Principles
//! 1. **Strict Precedence**: operation descriptor > type descriptor > default;
//!    the winning descriptor is used whole, fields are never merged.
//! 2. **Parameter Beats Fixed**: a numeric argument bound by name overrides the
//!    descriptor's fixed index.
//! 3. **Never Fail**: missing or non-numeric arguments fall back silently and
//!    out-of-range results are coerced to 0 with a warning.

use crate::descriptor::{CallArguments, CallContext, IndexDescriptor};
use crate::index::{InvalidIndexWarning, StoreIndex};

/// Where the raw index of a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    /// No descriptor declared a fixed index.
    Default,
    /// The effective descriptor's fixed index.
    Fixed,
    /// A numeric call argument matched the bound parameter name.
    Parameter,
}

/// Outcome of resolving one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// The index to route to, always valid.
    pub index: StoreIndex,
    /// The value before range validation.
    pub raw: i64,
    pub source: IndexSource,
    /// Present when `raw` was out of range and replaced by 0.
    pub warning: Option<InvalidIndexWarning>,
}

/// Stateless resolver applying the descriptor precedence rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexResolver;

impl IndexResolver {
    pub const fn new() -> Self {
        IndexResolver
    }

    /// Resolves the index for a call context.
    pub fn resolve_call(&self, call: &CallContext) -> Resolution {
        self.resolve(
            call.type_descriptor(),
            call.operation_descriptor(),
            call.arguments(),
        )
    }

    /// Resolves the index from explicit descriptors and arguments.
    ///
    /// **Logic**:
    /// 1. Pick the operation descriptor, else the type descriptor, else none.
    /// 2. Start from its fixed index (0 when unset).
    /// 3. If it binds a parameter, the first numeric argument with that name
    ///    replaces the fixed index.
    /// 4. Coerce out-of-range values to 0, recording a warning.
    pub fn resolve(
        &self,
        type_descriptor: Option<&IndexDescriptor>,
        operation_descriptor: Option<&IndexDescriptor>,
        arguments: &CallArguments,
    ) -> Resolution {
        let effective = operation_descriptor.or(type_descriptor);

        let (mut raw, mut source) = match effective.and_then(IndexDescriptor::index) {
            Some(index) => (index, IndexSource::Fixed),
            None => (0, IndexSource::Default),
        };

        if let Some(name) = effective.and_then(IndexDescriptor::param_name) {
            if let Some(value) = arguments.find_numeric(name) {
                raw = value;
                source = IndexSource::Parameter;
            }
        }

        let (index, warning) = StoreIndex::clamp(raw);
        tracing::debug!(index = index.get(), raw, ?source, "resolved store index");
        Resolution {
            index,
            raw,
            source,
            warning,
        }
    }
}
