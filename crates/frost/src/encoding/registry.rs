// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Type-id to factory registry used by the class decoder.

use std::collections::HashMap;
use std::fmt;

use super::exception::UserException;
use super::value::Value;

/// Creates a default instance ready for `read_slices`.
pub type ValueFactory = fn() -> Box<dyn Value>;

/// Creates a default exception ready for `read_slices`.
pub type ExceptionFactory = fn() -> Box<dyn UserException>;

/// Factories known to the local runtime.
///
/// Decoders look up each slice's type id (then compact id) here; a miss
/// makes the decoder skip that slice and try the next, less-derived one.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    values: HashMap<String, ValueFactory>,
    compact: HashMap<i32, ValueFactory>,
    exceptions: HashMap<String, ExceptionFactory>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class factory. Replaces any previous factory for `type_id`.
    pub fn register_value(&mut self, type_id: &str, factory: ValueFactory) -> &mut Self {
        self.values.insert(type_id.to_owned(), factory);
        self
    }

    /// Register a class factory reachable by compact id.
    pub fn register_compact(&mut self, compact_id: i32, factory: ValueFactory) -> &mut Self {
        self.compact.insert(compact_id, factory);
        self
    }

    pub fn register_exception(&mut self, type_id: &str, factory: ExceptionFactory) -> &mut Self {
        self.exceptions.insert(type_id.to_owned(), factory);
        self
    }

    pub fn value_factory(&self, type_id: &str) -> Option<ValueFactory> {
        self.values.get(type_id).copied()
    }

    pub fn compact_factory(&self, compact_id: i32) -> Option<ValueFactory> {
        self.compact.get(&compact_id).copied()
    }

    pub fn exception_factory(&self, type_id: &str) -> Option<ExceptionFactory> {
        self.exceptions.get(type_id).copied()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut values: Vec<_> = self.values.keys().collect();
        values.sort();
        let mut exceptions: Vec<_> = self.exceptions.keys().collect();
        exceptions.sort();
        f.debug_struct("TypeRegistry")
            .field("values", &values)
            .field("compact", &self.compact.len())
            .field("exceptions", &exceptions)
            .finish()
    }
}
