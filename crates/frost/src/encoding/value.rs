// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class instance trait.

use std::any::Any;
use std::fmt;

use super::input::InputStream;
use super::output::OutputStream;
use crate::error::Result;

/// Root of every class hierarchy. Formal type `::Frost::Object` accepts any instance.
pub const OBJECT_TYPE_ID: &str = "::Frost::Object";

/// Downcasting support, implemented for every `'static` type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A class instance that can be marshaled as a sequence of slices.
///
/// `read_slices` and `write_slices` walk the hierarchy from the most-derived
/// type to the root, bracketing each level with `start_slice`/`end_slice`:
///
/// ```ignore
/// fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()> {
///     input.start_slice()?;                 // ::Demo::Derived
///     self.extra = input.read_string()?;
///     input.end_slice()?;
///     input.start_slice()?;                 // ::Demo::Base
///     self.next = input.read_nullable_class(Some("::Demo::Base"))?;
///     input.end_slice()
/// }
/// ```
pub trait Value: AsAny + fmt::Debug + Send {
    /// Type ids of the slices this type marshals, most-derived first.
    fn type_ids(&self) -> &'static [&'static str];

    /// Numeric alias for the most-derived type (1.1 only).
    fn compact_id(&self) -> Option<i32> {
        None
    }

    fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()>;

    fn write_slices(&self, output: &mut OutputStream<'_>) -> Result<()>;

    /// Most-derived type id.
    fn ice_id(&self) -> &str {
        self.type_ids().first().copied().unwrap_or(OBJECT_TYPE_ID)
    }

    /// `true` if this instance may be assigned to a field of formal type `type_id`.
    fn is_a(&self, type_id: &str) -> bool {
        type_id == OBJECT_TYPE_ID || self.type_ids().contains(&type_id)
    }
}

/// Stand-in for an instance whose every slice was unknown to the receiver.
///
/// All of its slices are preserved in the owning graph and are re-emitted
/// verbatim when the graph is encoded in the sliced format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownSlicedValue {
    type_id: String,
}

impl UnknownSlicedValue {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
        }
    }

    pub fn unknown_type_id(&self) -> &str {
        &self.type_id
    }
}

impl Value for UnknownSlicedValue {
    fn type_ids(&self) -> &'static [&'static str] {
        &[]
    }

    fn read_slices(&mut self, _input: &mut InputStream<'_>) -> Result<()> {
        Ok(())
    }

    fn write_slices(&self, _output: &mut OutputStream<'_>) -> Result<()> {
        Ok(())
    }

    fn ice_id(&self) -> &str {
        &self.type_id
    }

    fn is_a(&self, type_id: &str) -> bool {
        type_id == OBJECT_TYPE_ID
    }
}
