//! Value Stack
//!
//! A positional frame of Lua values. Every call across the boundary moves its
//! arguments and results through a [`Stack`]: the dispatcher stores native
//! arguments from it and pushes native results onto it, and the host pushes
//! ad-hoc values onto one kept by the environment.
//!
//! Positions are 1-based, like Lua's own stack indices.

use std::fmt;

use mlua::{Lua, MultiValue, Value};

use crate::error::BindResult;
use crate::registry;

/// Positional handle into a [`Stack`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Index(usize);

impl Index {
    /// Create a handle for a 1-based position
    pub fn new(position: usize) -> Self {
        Index(position)
    }

    /// The 1-based position
    pub fn position(self) -> usize {
        self.0
    }

    /// Handle `count` slots above this one
    pub fn offset(self, count: usize) -> Self {
        Index(self.0 + count)
    }
}

impl From<usize> for Index {
    fn from(position: usize) -> Self {
        Index(position)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An argument or return frame of Lua values
#[derive(Clone, Default)]
pub struct Stack {
    values: Vec<Value>,
}

impl Stack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Create an empty stack with room for `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    /// Number of values on the stack
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the stack holds no values
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Handle to the topmost value, if any
    pub fn top(&self) -> Option<Index> {
        if self.values.is_empty() {
            None
        } else {
            Some(Index(self.values.len()))
        }
    }

    /// True when `index` refers to a value on this stack
    pub fn is_valid(&self, index: impl Into<Index>) -> bool {
        let position = index.into().0;
        position >= 1 && position <= self.values.len()
    }

    /// Push a raw Lua value
    pub fn push_value(&mut self, value: Value) -> Index {
        self.values.push(value);
        Index(self.values.len())
    }

    /// Convert a native value through the registry and push it
    pub fn push<T: 'static>(&mut self, lua: &Lua, value: &T) -> BindResult<Index> {
        let value = registry::push(lua, value)?;
        Ok(self.push_value(value))
    }

    /// Borrow the raw value at `index`
    pub fn get_value(&self, index: impl Into<Index>) -> Option<&Value> {
        let position = index.into().0;
        if position == 0 {
            return None;
        }
        self.values.get(position - 1)
    }

    /// The raw value at `index`, or `nil` when the slot is empty
    pub fn value(&self, index: impl Into<Index>) -> Value {
        self.get_value(index).cloned().unwrap_or(Value::Nil)
    }

    /// Convert the value at `index` to a native value through the registry
    pub fn get<T: 'static>(&self, lua: &Lua, index: impl Into<Index>) -> BindResult<T> {
        registry::store(lua, &self.value(index))
    }

    /// Lua type name of the value at `index`
    pub fn type_name(&self, index: impl Into<Index>) -> &'static str {
        match self.get_value(index) {
            Some(value) => value.type_name(),
            None => "no value",
        }
    }

    /// Remove and return the topmost value
    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    /// Drop every value above `len`
    pub fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }

    /// Remove every value
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Iterate over the values bottom to top
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Hand the frame to Lua
    pub fn into_multi(self) -> MultiValue {
        self.values.into_iter().collect()
    }

    /// Unwrap the frame into its values
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl From<MultiValue> for Stack {
    fn from(values: MultiValue) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }
}

impl From<Vec<Value>> for Stack {
    fn from(values: Vec<Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<Value> for Stack {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.values.iter().map(|value| value.type_name()))
            .finish()
    }
}
