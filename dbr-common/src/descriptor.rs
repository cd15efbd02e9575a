//! # Call Descriptors
//!
//! Metadata describing which store index a unit of work targets, together
//! with the actual arguments of one call.
//!
//! ## Design Principles
//! 1. **Data, Not Reflection**: A descriptor is a plain value declared once
//!    per type or operation and passed alongside each call.
//! 2. **Two Scopes**: Type-level and operation-level descriptors are kept
//!    separately; the resolver decides which one wins.
//! 3. **Ordered Arguments**: Arguments keep declaration order so that the
//!    first matching name wins.

use serde::{Deserialize, Serialize};

/// Declares how to determine the store index for a unit of work.
///
/// A descriptor carries an optional fixed index and an optional parameter
/// name. When the parameter name is present and the call carries a numeric
/// argument with that name, the argument value outranks the fixed index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    /// Fixed index; `None` means "unset" and resolves to 0.
    #[serde(default)]
    index: Option<i64>,
    /// Name of the argument carrying the index dynamically.
    #[serde(default)]
    param_name: Option<String>,
}

impl IndexDescriptor {
    /// Descriptor with a fixed index and no parameter binding.
    pub const fn fixed(index: i64) -> Self {
        IndexDescriptor {
            index: Some(index),
            param_name: None,
        }
    }

    /// Descriptor bound to a named argument, without a fixed index.
    pub fn param(name: impl Into<String>) -> Self {
        IndexDescriptor {
            index: None,
            param_name: Some(name.into()),
        }
    }

    /// Sets the fixed index.
    pub fn with_index(mut self, index: i64) -> Self {
        self.index = Some(index);
        self
    }

    /// Sets the parameter binding.
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.param_name = Some(name.into());
        self
    }

    /// Returns the fixed index, if one was declared.
    pub fn index(&self) -> Option<i64> {
        self.index
    }

    /// Returns the bound parameter name. Blank names count as unset.
    pub fn param_name(&self) -> Option<&str> {
        self.param_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// Value of a single call argument.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

impl ArgValue {
    /// Returns the value as an index candidate when it is numeric.
    ///
    /// Floats truncate toward zero; non-finite floats are not numeric.
    pub fn as_index(&self) -> Option<i64> {
        match *self {
            ArgValue::Int(value) => Some(value),
            ArgValue::Float(value) if value.is_finite() => Some(value.trunc() as i64),
            _ => None,
        }
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<u16> for ArgValue {
    fn from(value: u16) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<u8> for ArgValue {
    fn from(value: u8) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<f32> for ArgValue {
    fn from(value: f32) -> Self {
        ArgValue::Float(f64::from(value))
    }
}

impl From<f64> for ArgValue {
    fn from(value: f64) -> Self {
        ArgValue::Float(value)
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ArgValue::Null, Into::into)
    }
}

/// Ordered `(name, value)` pairs for one invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArguments {
    items: Vec<(String, ArgValue)>,
}

impl CallArguments {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        CallArguments { items: Vec::new() }
    }

    /// Appends an argument, keeping declaration order.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        self.items.push((name.into(), value.into()));
    }

    /// Builder form of [`CallArguments::push`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.push(name, value);
        self
    }

    /// Returns the first numeric value bound to `name`.
    ///
    /// Arguments with the same name but a non-numeric value are skipped.
    pub fn find_numeric(&self, name: &str) -> Option<i64> {
        self.items
            .iter()
            .filter(|(arg_name, _)| arg_name == name)
            .find_map(|(_, value)| value.as_index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.items.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<N: Into<String>, V: Into<ArgValue>> FromIterator<(N, V)> for CallArguments {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        CallArguments {
            items: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

/// Everything the dispatcher needs to route one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallContext {
    type_descriptor: Option<IndexDescriptor>,
    operation_descriptor: Option<IndexDescriptor>,
    arguments: CallArguments,
}

impl CallContext {
    pub fn new() -> Self {
        CallContext::default()
    }

    /// Sets the descriptor declared for the whole type.
    pub fn with_type(mut self, descriptor: IndexDescriptor) -> Self {
        self.type_descriptor = Some(descriptor);
        self
    }

    /// Sets the descriptor declared for this operation.
    pub fn with_operation(mut self, descriptor: IndexDescriptor) -> Self {
        self.operation_descriptor = Some(descriptor);
        self
    }

    /// Replaces the argument list.
    pub fn with_arguments(mut self, arguments: CallArguments) -> Self {
        self.arguments = arguments;
        self
    }

    /// Appends one argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.arguments.push(name, value);
        self
    }

    pub fn type_descriptor(&self) -> Option<&IndexDescriptor> {
        self.type_descriptor.as_ref()
    }

    pub fn operation_descriptor(&self) -> Option<&IndexDescriptor> {
        self.operation_descriptor.as_ref()
    }

    pub fn arguments(&self) -> &CallArguments {
        &self.arguments
    }
}
