// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance arena for decoded (or to-be-encoded) class graphs.
//!
//! Class-typed fields never own their targets; they hold a [`ValueRef`]
//! into the [`ValueGraph`] of the enclosing encapsulation. Cycles and shared
//! sub-objects are plain repeated handles.

use std::fmt;
use std::num::NonZeroUsize;

use super::value::Value;

/// Handle to one instance in a [`ValueGraph`].
///
/// The number is the instance's 1-based encounter order, which is also its
/// wire position (instance #n is referenced on the wire as `n + 1`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(NonZeroUsize);

impl ValueRef {
    pub(crate) fn from_index(index: usize) -> Self {
        // index + 1 never wraps for arena-sized values
        Self(NonZeroUsize::MIN.saturating_add(index))
    }

    pub(crate) fn index(self) -> usize {
        self.0.get() - 1
    }

    /// 1-based encounter number.
    pub fn number(self) -> usize {
        self.0.get()
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a slice named its type on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeIdentifier {
    /// Full type id (`::Module::Type`).
    String(String),
    /// Numeric compact id (1.1 only).
    Compact(i32),
}

impl TypeIdentifier {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            Self::Compact(_) => None,
        }
    }
}

impl fmt::Display for TypeIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Compact(id) => write!(f, "{}", id),
        }
    }
}

/// Slice flags byte.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SliceFlags(pub u8);

impl SliceFlags {
    /// Bits 0-1: type-id kind (meaning depends on encoding version).
    pub const TYPE_ID_MASK: u8 = 0x03;
    pub const HAS_TAGGED_MEMBERS: u8 = 0x04;
    pub const HAS_INDIRECTION_TABLE: u8 = 0x08;
    pub const HAS_SLICE_SIZE: u8 = 0x10;
    pub const IS_LAST_SLICE: u8 = 0x20;

    // 1.1 type-id kinds
    pub const V11_TYPE_ID_STRING: u8 = 0x01;
    pub const V11_TYPE_ID_INDEX: u8 = 0x02;
    pub const V11_TYPE_ID_COMPACT: u8 = 0x03;

    // 2.0 type-id kinds
    pub const V20_TYPE_ID_INDEX: u8 = 0x01;
    pub const V20_TYPE_ID_STRING: u8 = 0x02;
    pub const V20_TYPE_ID_SEQUENCE: u8 = 0x03;

    pub fn type_id_kind(self) -> u8 {
        self.0 & Self::TYPE_ID_MASK
    }

    pub fn has_tagged_members(self) -> bool {
        self.0 & Self::HAS_TAGGED_MEMBERS != 0
    }

    pub fn has_indirection_table(self) -> bool {
        self.0 & Self::HAS_INDIRECTION_TABLE != 0
    }

    pub fn has_slice_size(self) -> bool {
        self.0 & Self::HAS_SLICE_SIZE != 0
    }

    pub fn is_last_slice(self) -> bool {
        self.0 & Self::IS_LAST_SLICE != 0
    }

    pub fn set(&mut self, bits: u8) {
        self.0 |= bits;
    }

    pub fn clear(&mut self, bits: u8) {
        self.0 &= !bits;
    }
}

/// One inheritance level of an instance or exception as seen on the wire.
///
/// Known slices carry no payload; slices the receiver could not decode keep
/// their raw bytes (data, tagged members and end marker) plus the resolved
/// indirection table so they can be re-emitted unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice {
    pub type_id: Option<TypeIdentifier>,
    pub bytes: Option<Vec<u8>>,
    pub indirection_table: Vec<ValueRef>,
    pub flags: SliceFlags,
}

impl Slice {
    /// `true` when the slice was skipped and its bytes preserved.
    pub fn is_preserved(&self) -> bool {
        self.bytes.is_some()
    }
}

/// A materialized instance with the slices it was decoded from, base-first.
#[derive(Debug)]
pub struct InstanceRecord {
    pub value: Box<dyn Value>,
    pub slices: Vec<Slice>,
}

/// Arena owning every instance of one encapsulation.
#[derive(Debug, Default)]
pub struct ValueGraph {
    records: Vec<InstanceRecord>,
}

impl ValueGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_records(records: Vec<InstanceRecord>) -> Self {
        Self { records }
    }

    /// Add an instance; fields of other instances may then refer to it.
    pub fn add<V: Value>(&mut self, value: V) -> ValueRef {
        self.add_boxed(Box::new(value))
    }

    pub fn add_boxed(&mut self, value: Box<dyn Value>) -> ValueRef {
        self.records.push(InstanceRecord {
            value,
            slices: Vec::new(),
        });
        ValueRef::from_index(self.records.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, r: ValueRef) -> bool {
        r.index() < self.records.len()
    }

    pub fn get(&self, r: ValueRef) -> Option<&dyn Value> {
        self.records.get(r.index()).map(|rec| &*rec.value)
    }

    pub fn get_mut(&mut self, r: ValueRef) -> Option<&mut (dyn Value + 'static)> {
        self.records.get_mut(r.index()).map(|rec| &mut *rec.value)
    }

    /// Typed access; `None` if the handle is foreign or the type differs.
    pub fn downcast<T: Value>(&self, r: ValueRef) -> Option<&T> {
        self.get(r).and_then(|v| v.as_any().downcast_ref::<T>())
    }

    pub fn downcast_mut<T: Value>(&mut self, r: ValueRef) -> Option<&mut T> {
        self.get_mut(r)
            .and_then(|v| v.as_any_mut().downcast_mut::<T>())
    }

    pub fn record(&self, r: ValueRef) -> Option<&InstanceRecord> {
        self.records.get(r.index())
    }

    /// Slices of an instance, base-first. Empty for locally built instances.
    pub fn slices(&self, r: ValueRef) -> &[Slice] {
        self.records
            .get(r.index())
            .map(|rec| rec.slices.as_slice())
            .unwrap_or(&[])
    }

    /// Slices preserved because the decoder had no factory for them, base-first.
    pub fn sliced_data(&self, r: ValueRef) -> impl Iterator<Item = &Slice> {
        self.slices(r).iter().filter(|s| s.is_preserved())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueRef, &dyn Value)> {
        self.records
            .iter()
            .enumerate()
            .map(|(i, rec)| (ValueRef::from_index(i), &*rec.value))
    }
}
