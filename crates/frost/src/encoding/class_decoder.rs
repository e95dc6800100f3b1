// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class graph and exception decoding.
//!
//! # Instance Lifecycle
//!
//! ```text
//! ref == 1 ─► push placeholder ─► pick factory (skip unknown slices)
//!                                     │
//!                 read deferred tables (1.1) ◄┘
//!                                     │
//!                value.read_slices() ─► start_slice/end_slice per level
//!                                     │
//!                 fill slot ◄─────────┘
//! ```
//!
//! A slot stays a placeholder while its instance is being read, so a
//! back-reference from a descendant (a cycle) resolves to the same handle.
//! Formal-type checks against placeholders are deferred until the
//! encapsulation ends.
//!
//! 1.1 slices announce their own type id, so the decoder only learns which
//! factory applies after walking past the unknown derived slices. Tables of
//! skipped slices are parse-skipped on the way down and decoded once the
//! instance exists, in wire order, which keeps instance numbering equal to
//! the sender's. 2.0 lists all type ids up front, so the factory is picked
//! first and skipped tables are decoded in place.

use std::mem;

use super::exception::{RemoteException, RemoteExceptionKind, RemoteExceptionOrigin, UserException};
use super::graph::{InstanceRecord, Slice, SliceFlags, TypeIdentifier, ValueGraph, ValueRef};
use super::input::InputStream;
use super::value::{UnknownSlicedValue, Value, OBJECT_TYPE_ID};
use crate::error::{Error, Result};
use crate::locator::Identity;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SliceKind {
    Value,
    Exception,
}

/// Reading state of one instance or exception.
#[derive(Debug)]
struct InstanceData {
    kind: SliceKind,
    flags: SliceFlags,
    type_id: Option<TypeIdentifier>,
    /// Position of the slice size field.
    slice_start: usize,
    /// Declared slice size, 0 when absent.
    slice_size: usize,
    table: Vec<ValueRef>,
    table_end: Option<usize>,
    in_data: bool,
    /// Header of the next slice was consumed while picking a factory.
    skip_first_slice: bool,
    slice_index: usize,
    /// 2.0 type-id list from the first slice.
    type_ids: Vec<String>,
    /// Slices seen so far, wire order.
    slices: Vec<Slice>,
    /// 1.1 skipped-slice tables: (slice index, table position).
    deferred_tables: Vec<(usize, usize)>,
    message: Option<String>,
    origin: Option<RemoteExceptionOrigin>,
}

impl InstanceData {
    fn new(kind: SliceKind) -> Self {
        Self {
            kind,
            flags: SliceFlags::default(),
            type_id: None,
            slice_start: 0,
            slice_size: 0,
            table: Vec::new(),
            table_end: None,
            in_data: false,
            skip_first_slice: false,
            slice_index: 0,
            type_ids: Vec::new(),
            slices: Vec::new(),
            deferred_tables: Vec::new(),
            message: None,
            origin: None,
        }
    }
}

/// Instance list and type-id table of one encapsulation.
#[derive(Debug, Default)]
pub(crate) struct ClassDecoder {
    instances: Vec<Option<InstanceRecord>>,
    type_ids: Vec<String>,
    current: Option<InstanceData>,
    depth: usize,
    pending_checks: Vec<(ValueRef, String)>,
}

impl ClassDecoder {
    /// Registration is by value so a skip pass and the later decode of the
    /// same region agree on indices.
    fn register_type_id(&mut self, type_id: &str) {
        if !self.type_ids.iter().any(|t| t == type_id) {
            self.type_ids.push(type_id.to_owned());
        }
    }

    fn type_id_at(&self, index: usize) -> Result<String> {
        index
            .checked_sub(1)
            .and_then(|i| self.type_ids.get(i))
            .cloned()
            .ok_or_else(|| {
                Error::marshal(format!(
                    "type-id index {} out of range ({} registered)",
                    index,
                    self.type_ids.len()
                ))
            })
    }

    /// Verify every instance was completed and run deferred type checks.
    pub(crate) fn finish(self) -> Result<ValueGraph> {
        let records = self
            .instances
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| Error::marshal(format!("instance #{} was never completed", i + 1)))
            })
            .collect::<Result<Vec<_>>>()?;

        for (r, formal) in self.pending_checks {
            let record = records
                .get(r.index())
                .ok_or_else(|| Error::marshal(format!("dangling instance reference {}", r)))?;
            if !record.value.is_a(&formal) {
                return Err(type_mismatch(&formal, &*record.value));
            }
        }
        Ok(ValueGraph::from_records(records))
    }
}

fn type_mismatch(formal: &str, value: &dyn Value) -> Error {
    Error::marshal(format!(
        "expected instance of type `{}`, received `{}`",
        formal,
        value.ice_id()
    ))
}

impl<'a> InputStream<'a> {
    // ========================================================================
    // Public entry points
    // ========================================================================

    /// Read a class reference that may be null.
    ///
    /// `formal` is the declared type of the field; it enables the compact
    /// format's type-id omission and is checked against the decoded instance.
    pub fn read_nullable_class(&mut self, formal: Option<&str>) -> Result<Option<ValueRef>> {
        let index = self.read_size()?;
        if index == 0 {
            return Ok(None);
        }

        let table_slot = match self.encaps.decoder.current.as_ref() {
            Some(cur) if cur.in_data && cur.flags.has_indirection_table() => Some(
                cur.table.get(index - 1).copied().ok_or_else(|| {
                    Error::marshal(format!(
                        "indirection table index {} out of range ({} entries)",
                        index,
                        cur.table.len()
                    ))
                }),
            ),
            _ => None,
        };
        let r = match table_slot {
            Some(slot) => slot?,
            None => self.read_instance(index, formal)?,
        };
        self.check_formal_type(r, formal)?;
        Ok(Some(r))
    }

    /// Read a class reference that must not be null.
    pub fn read_class(&mut self, formal: Option<&str>) -> Result<ValueRef> {
        self.read_nullable_class(formal)?
            .ok_or_else(|| Error::marshal("unexpected null class instance"))
    }

    /// Read a user exception.
    pub fn read_exception(&mut self) -> Result<RemoteException> {
        let saved = self
            .encaps
            .decoder
            .current
            .replace(InstanceData::new(SliceKind::Exception));
        let result = self.read_exception_slices();
        self.encaps.decoder.current = saved;
        result
    }

    /// Begin the next slice of the instance being read.
    pub fn start_slice(&mut self) -> Result<()> {
        let skip_header = mem::replace(&mut self.current_mut()?.skip_first_slice, false);
        if !skip_header {
            if self.encoding().is_legacy() {
                self.read_slice_header_v11()?;
            } else {
                self.read_slice_header_v20()?;
            }
        }

        let (flags, start, size) = {
            let cur = self.current()?;
            (cur.flags, cur.slice_start, cur.slice_size)
        };
        let mut table = Vec::new();
        let mut table_end = None;
        if flags.has_indirection_table() {
            if !flags.has_slice_size() {
                return Err(Error::marshal("indirection table without slice size"));
            }
            let data = self.cursor.position();
            self.cursor.set_position(start + size)?;
            table = self.read_indirection_table()?;
            table_end = Some(self.cursor.position());
            self.cursor.set_position(data)?;
        }

        let cur = self.current_mut()?;
        cur.slices.push(Slice {
            type_id: cur.type_id.clone(),
            bytes: None,
            indirection_table: table.clone(),
            flags,
        });
        cur.table = table;
        cur.table_end = table_end;
        cur.in_data = true;
        Ok(())
    }

    /// Finish the current slice: skip unread tagged members and its table.
    pub fn end_slice(&mut self) -> Result<()> {
        let (flags, start, size, table_end) = {
            let cur = self.current()?;
            if !cur.in_data {
                return Err(Error::marshal("end_slice without start_slice"));
            }
            (cur.flags, cur.slice_start, cur.slice_size, cur.table_end)
        };
        if flags.has_tagged_members() {
            self.skip_tagged_members()?;
        }
        if flags.has_slice_size() && self.cursor.position() != start + size {
            return Err(Error::marshal(format!(
                "slice size mismatch: slice ends at {}, data ended at {}",
                start + size,
                self.cursor.position()
            )));
        }
        if let Some(end) = table_end {
            self.cursor.set_position(end)?;
        }
        let cur = self.current_mut()?;
        cur.in_data = false;
        cur.table.clear();
        cur.table_end = None;
        Ok(())
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub(super) fn current_slice_flags(&self) -> Option<SliceFlags> {
        self.encaps
            .decoder
            .current
            .as_ref()
            .filter(|cur| cur.in_data)
            .map(|cur| cur.flags)
    }

    fn current(&self) -> Result<&InstanceData> {
        self.encaps
            .decoder
            .current
            .as_ref()
            .ok_or_else(|| Error::marshal("no class instance or exception is being read"))
    }

    fn current_mut(&mut self) -> Result<&mut InstanceData> {
        self.encaps
            .decoder
            .current
            .as_mut()
            .ok_or_else(|| Error::marshal("no class instance or exception is being read"))
    }

    /// Resolve a non-null reference outside any indirection table.
    fn read_instance(&mut self, index: usize, formal: Option<&str>) -> Result<ValueRef> {
        if index > 1 {
            let position = index - 2;
            let count = self.encaps.decoder.instances.len();
            if position >= count {
                return Err(Error::marshal(format!(
                    "instance reference {} out of range ({} instances)",
                    index, count
                )));
            }
            return Ok(ValueRef::from_index(position));
        }

        let decoder = &mut self.encaps.decoder;
        decoder.depth += 1;
        if decoder.depth > self.depth_max {
            return Err(Error::DepthExceeded {
                max: self.depth_max,
            });
        }
        decoder.instances.push(None);
        let r = ValueRef::from_index(decoder.instances.len() - 1);
        let saved = decoder.current.replace(InstanceData::new(SliceKind::Value));

        let result = self.read_new_value(r, formal);

        let decoder = &mut self.encaps.decoder;
        decoder.current = saved;
        decoder.depth -= 1;
        result.map(|()| r)
    }

    fn read_new_value(&mut self, r: ValueRef, formal: Option<&str>) -> Result<()> {
        let mut value = if self.encoding().is_legacy() {
            self.select_value_v11(formal)?
        } else {
            self.select_value_v20(formal)?
        };
        self.read_deferred_tables()?;
        value.read_slices(self)?;

        let cur = self.current_mut()?;
        if cur.skip_first_slice {
            return Err(Error::marshal(format!(
                "`{}` did not read its slices",
                value.ice_id()
            )));
        }
        let mut slices = mem::take(&mut cur.slices);
        slices.reverse();
        if let Some(slot) = self.encaps.decoder.instances.get_mut(r.index()) {
            *slot = Some(InstanceRecord { value, slices });
        }
        Ok(())
    }

    /// 1.1: walk slice headers until one has a factory.
    fn select_value_v11(&mut self, formal: Option<&str>) -> Result<Box<dyn Value>> {
        let registry = self.registry;
        let mut most_derived: Option<String> = None;
        loop {
            self.read_slice_header_v11()?;
            let (type_id, flags) = {
                let cur = self.current()?;
                (cur.type_id.clone(), cur.flags)
            };
            let factory = match &type_id {
                None => {
                    let formal = formal.ok_or_else(|| {
                        Error::marshal("class instance without type id and no formal type")
                    })?;
                    let factory = registry.value_factory(formal).ok_or_else(|| {
                        Error::marshal(format!(
                            "no factory for formal type `{}` of an instance sent without type id",
                            formal
                        ))
                    })?;
                    self.current_mut()?.type_id = Some(TypeIdentifier::String(formal.to_owned()));
                    most_derived.get_or_insert_with(|| formal.to_owned());
                    Some(factory)
                }
                Some(TypeIdentifier::String(id)) => registry.value_factory(id),
                Some(TypeIdentifier::Compact(id)) => registry.compact_factory(*id),
            };
            if most_derived.is_none() {
                most_derived = type_id.as_ref().map(ToString::to_string);
            }

            if let Some(factory) = factory {
                self.current_mut()?.skip_first_slice = true;
                return Ok(factory());
            }
            self.skip_slice()?;
            if flags.is_last_slice() {
                let type_id = most_derived.unwrap_or_default();
                log::debug!("[encoding] no factory for `{}`, preserving its slices", type_id);
                return Ok(Box::new(UnknownSlicedValue::new(type_id)));
            }
        }
    }

    /// 2.0: pick the most-derived factory from the type-id list, then skip
    /// the slices above it.
    fn select_value_v20(&mut self, formal: Option<&str>) -> Result<Box<dyn Value>> {
        let registry = self.registry;
        self.read_first_slice_header_v20(SliceKind::Value)?;

        if self.current()?.type_ids.is_empty() {
            let formal = formal
                .ok_or_else(|| Error::marshal("class instance without type id and no formal type"))?;
            if registry.value_factory(formal).is_none() {
                return Err(Error::marshal(format!(
                    "no factory for formal type `{}` of an instance sent without type id",
                    formal
                )));
            }
            let cur = self.current_mut()?;
            cur.type_ids = vec![formal.to_owned()];
            cur.type_id = Some(TypeIdentifier::String(formal.to_owned()));
        }

        let type_ids = self.current()?.type_ids.clone();
        let found = type_ids
            .iter()
            .enumerate()
            .find_map(|(i, id)| registry.value_factory(id).map(|f| (i, f)));
        match found {
            Some((0, factory)) => {
                self.current_mut()?.skip_first_slice = true;
                Ok(factory())
            }
            Some((skip, factory)) => {
                self.skip_slices_v20(skip)?;
                Ok(factory())
            }
            None => {
                self.skip_remaining_slices_v20()?;
                let type_id = type_ids.into_iter().next().unwrap_or_default();
                log::debug!("[encoding] no factory for `{}`, preserving its slices", type_id);
                Ok(Box::new(UnknownSlicedValue::new(type_id)))
            }
        }
    }

    fn read_exception_slices(&mut self) -> Result<RemoteException> {
        let registry = self.registry;
        let mut exception: Option<Box<dyn UserException>> = None;
        let mut most_derived: Option<String> = None;

        if self.encoding().is_legacy() {
            loop {
                self.read_slice_header_v11()?;
                let (type_id, flags) = {
                    let cur = self.current()?;
                    (cur.type_id.clone(), cur.flags)
                };
                let id = type_id.map(|t| t.to_string()).unwrap_or_default();
                if most_derived.is_none() {
                    most_derived = Some(id.clone());
                }
                if let Some(factory) = registry.exception_factory(&id) {
                    self.current_mut()?.skip_first_slice = true;
                    exception = Some(factory());
                    break;
                }
                self.skip_slice()?;
                if flags.is_last_slice() {
                    break;
                }
            }
        } else {
            self.read_first_slice_header_v20(SliceKind::Exception)?;
            let type_ids = self.current()?.type_ids.clone();
            most_derived = type_ids.first().cloned();
            let found = type_ids
                .iter()
                .enumerate()
                .find_map(|(i, id)| registry.exception_factory(id).map(|f| (i, f)));
            match found {
                Some((0, factory)) => {
                    self.current_mut()?.skip_first_slice = true;
                    exception = Some(factory());
                }
                Some((skip, factory)) => {
                    self.skip_slices_v20(skip)?;
                    exception = Some(factory());
                }
                None => self.skip_remaining_slices_v20()?,
            }
        }

        self.read_deferred_tables()?;
        if let Some(ex) = exception.as_mut() {
            ex.read_slices(self)?;
        }

        let cur = self.current_mut()?;
        let mut slices = mem::take(&mut cur.slices);
        slices.reverse();
        let kind = match exception {
            Some(ex) => RemoteExceptionKind::User(ex),
            None => {
                let type_id = most_derived.unwrap_or_default();
                log::debug!("[encoding] unknown exception `{}`", type_id);
                RemoteExceptionKind::Unknown { type_id }
            }
        };
        Ok(RemoteException {
            kind,
            message: cur.message.take(),
            origin: cur.origin.take(),
            slices,
        })
    }

    fn check_formal_type(&mut self, r: ValueRef, formal: Option<&str>) -> Result<()> {
        let Some(formal) = formal else {
            return Ok(());
        };
        if formal == OBJECT_TYPE_ID {
            return Ok(());
        }
        let decoder = &mut self.encaps.decoder;
        match decoder.instances.get(r.index()) {
            Some(Some(record)) if record.value.is_a(formal) => Ok(()),
            Some(Some(record)) => Err(type_mismatch(formal, &*record.value)),
            Some(None) => {
                decoder.pending_checks.push((r, formal.to_owned()));
                Ok(())
            }
            None => Err(Error::marshal(format!("dangling instance reference {}", r))),
        }
    }

    // ========================================================================
    // Slice headers
    // ========================================================================

    fn read_slice_header_v11(&mut self) -> Result<()> {
        let flags = SliceFlags(self.read_byte()?);
        let kind = self.current()?.kind;
        let type_id = match (flags.type_id_kind(), kind) {
            (0, SliceKind::Value) => None,
            (SliceFlags::V11_TYPE_ID_STRING, _) => {
                let id = self.read_string()?;
                if kind == SliceKind::Value {
                    self.encaps.decoder.register_type_id(&id);
                }
                Some(TypeIdentifier::String(id))
            }
            (SliceFlags::V11_TYPE_ID_INDEX, SliceKind::Value) => {
                let index = self.read_size()?;
                Some(TypeIdentifier::String(self.encaps.decoder.type_id_at(index)?))
            }
            (SliceFlags::V11_TYPE_ID_COMPACT, SliceKind::Value) => {
                Some(TypeIdentifier::Compact(self.read_size()? as i32))
            }
            (other, _) => {
                return Err(Error::marshal(format!(
                    "invalid type-id kind {} for exception slice",
                    other
                )))
            }
        };
        self.read_slice_size(flags, type_id)
    }

    /// Subsequent 2.0 slice: flags and size only.
    fn read_slice_header_v20(&mut self) -> Result<()> {
        let flags = SliceFlags(self.read_byte()?);
        if flags.type_id_kind() != 0 {
            return Err(Error::marshal(format!(
                "type-id kind {} on a non-first slice",
                flags.type_id_kind()
            )));
        }
        let cur = self.current_mut()?;
        let type_id = cur
            .type_ids
            .get(cur.slice_index)
            .cloned()
            .map(TypeIdentifier::String);
        cur.slice_index += 1;
        self.read_slice_size(flags, type_id)
    }

    fn read_first_slice_header_v20(&mut self, kind: SliceKind) -> Result<()> {
        let flags = SliceFlags(self.read_byte()?);
        let register = kind == SliceKind::Value;
        let type_ids = match flags.type_id_kind() {
            0 if kind == SliceKind::Value => Vec::new(),
            SliceFlags::V20_TYPE_ID_INDEX if kind == SliceKind::Value => {
                let index = self.read_size()?;
                vec![self.encaps.decoder.type_id_at(index)?]
            }
            SliceFlags::V20_TYPE_ID_STRING => {
                let id = self.read_string()?;
                if register {
                    self.encaps.decoder.register_type_id(&id);
                }
                vec![id]
            }
            SliceFlags::V20_TYPE_ID_SEQUENCE => {
                let count = self.read_and_check_seq_size(1)?;
                if count == 0 {
                    return Err(Error::marshal("empty type-id sequence"));
                }
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    let id = self.read_string()?;
                    if register {
                        self.encaps.decoder.register_type_id(&id);
                    }
                    ids.push(id);
                }
                ids
            }
            other => {
                return Err(Error::marshal(format!(
                    "unsupported type-id kind {} for exception",
                    other
                )))
            }
        };

        if kind == SliceKind::Exception {
            let message = self.read_string()?;
            let name = self.read_string()?;
            let category = self.read_string()?;
            let facet = self.read_string()?;
            let operation = self.read_string()?;
            let cur = self.current_mut()?;
            cur.message = Some(message);
            if !name.is_empty() {
                cur.origin = Some(RemoteExceptionOrigin {
                    identity: Identity::new(name, category),
                    facet,
                    operation,
                });
            }
        }

        let cur = self.current_mut()?;
        let type_id = type_ids.first().cloned().map(TypeIdentifier::String);
        cur.type_ids = type_ids;
        cur.slice_index = 1;
        self.read_slice_size(flags, type_id)
    }

    fn read_slice_size(&mut self, flags: SliceFlags, type_id: Option<TypeIdentifier>) -> Result<()> {
        let start = self.cursor.position();
        let size = if flags.has_slice_size() {
            let size = self.read_int()?;
            if size < 4 {
                return Err(Error::marshal(format!("invalid slice size {}", size)));
            }
            let size = size as usize;
            if start + size > self.cursor.limit() {
                return Err(Error::marshal(format!(
                    "slice of {} bytes exceeds remaining {} bytes",
                    size,
                    self.cursor.limit() - start
                )));
            }
            size
        } else {
            0
        };

        let cur = self.current_mut()?;
        cur.flags = flags;
        cur.type_id = type_id;
        cur.slice_start = start;
        cur.slice_size = size;
        cur.table.clear();
        cur.table_end = None;
        cur.in_data = false;
        Ok(())
    }

    // ========================================================================
    // Skipping
    // ========================================================================

    /// Preserve the current slice's bytes and step over it.
    fn skip_slice(&mut self) -> Result<()> {
        let (flags, start, size, kind, type_id) = {
            let cur = self.current()?;
            (cur.flags, cur.slice_start, cur.slice_size, cur.kind, cur.type_id.clone())
        };
        if !flags.has_slice_size() {
            return Err(Error::marshal(match kind {
                SliceKind::Value => format!(
                    "no factory for `{}` and the compact format prevents slicing",
                    type_id.map(|t| t.to_string()).unwrap_or_default()
                ),
                SliceKind::Exception => format!(
                    "no factory for exception `{}` and its slice has no size",
                    type_id.map(|t| t.to_string()).unwrap_or_default()
                ),
            }));
        }

        let bytes = self.cursor.slice(start + 4, start + size)?.to_vec();
        self.cursor.set_position(start + size)?;
        log::trace!(
            "[encoding] skipped slice `{}` ({} bytes)",
            type_id.as_ref().map(ToString::to_string).unwrap_or_default(),
            bytes.len()
        );

        let legacy = self.encoding().is_legacy();
        let cur = self.current_mut()?;
        cur.slices.push(Slice {
            type_id,
            bytes: Some(bytes),
            indirection_table: Vec::new(),
            flags,
        });
        let slice = cur.slices.len() - 1;

        if flags.has_indirection_table() {
            if legacy {
                let position = self.cursor.position();
                self.current_mut()?.deferred_tables.push((slice, position));
                self.skip_indirection_table()?;
            } else {
                let table = self.read_indirection_table()?;
                if let Some(s) = self.current_mut()?.slices.get_mut(slice) {
                    s.indirection_table = table;
                }
            }
        }
        Ok(())
    }

    /// Skip `count` 2.0 slices, the first of which has its header read.
    fn skip_slices_v20(&mut self, count: usize) -> Result<()> {
        for i in 0..count {
            if i > 0 {
                self.read_slice_header_v20()?;
            }
            let flags = self.current()?.flags;
            self.skip_slice()?;
            if flags.is_last_slice() {
                return Err(Error::marshal("last slice reached before the known type"));
            }
        }
        Ok(())
    }

    fn skip_remaining_slices_v20(&mut self) -> Result<()> {
        let mut first = true;
        loop {
            if !first {
                self.read_slice_header_v20()?;
            }
            first = false;
            let flags = self.current()?.flags;
            self.skip_slice()?;
            if flags.is_last_slice() {
                return Ok(());
            }
        }
    }

    fn read_indirection_table(&mut self) -> Result<Vec<ValueRef>> {
        let count = self.read_and_check_seq_size(1)?;
        if count == 0 {
            return Err(Error::marshal("empty indirection table"));
        }
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            let index = self.read_size()?;
            if index == 0 {
                return Err(Error::marshal("null entry in indirection table"));
            }
            table.push(self.read_instance(index, None)?);
        }
        Ok(table)
    }

    /// 1.1 skip pass over a table: inline instances are walked, not created.
    fn skip_indirection_table(&mut self) -> Result<()> {
        let count = self.read_and_check_seq_size(1)?;
        if count == 0 {
            return Err(Error::marshal("empty indirection table"));
        }
        for _ in 0..count {
            match self.read_size()? {
                0 => return Err(Error::marshal("null entry in indirection table")),
                1 => self.skip_inline_instance()?,
                _ => {}
            }
        }
        Ok(())
    }

    fn skip_inline_instance(&mut self) -> Result<()> {
        let decoder = &mut self.encaps.decoder;
        decoder.depth += 1;
        if decoder.depth > self.depth_max {
            return Err(Error::DepthExceeded {
                max: self.depth_max,
            });
        }
        let result = self.skip_inline_slices();
        self.encaps.decoder.depth -= 1;
        result
    }

    fn skip_inline_slices(&mut self) -> Result<()> {
        loop {
            let flags = SliceFlags(self.read_byte()?);
            match flags.type_id_kind() {
                SliceFlags::V11_TYPE_ID_STRING => {
                    let id = self.read_string()?;
                    self.encaps.decoder.register_type_id(&id);
                }
                SliceFlags::V11_TYPE_ID_INDEX => {
                    let index = self.read_size()?;
                    self.encaps.decoder.type_id_at(index)?;
                }
                SliceFlags::V11_TYPE_ID_COMPACT => {
                    self.read_size()?;
                }
                _ => {}
            }
            if !flags.has_slice_size() {
                return Err(Error::marshal(
                    "compact format instance inside a sliced indirection table",
                ));
            }
            let size = self.read_int()?;
            if size < 4 {
                return Err(Error::marshal(format!("invalid slice size {}", size)));
            }
            self.cursor.skip(size as usize - 4)?;
            if flags.has_indirection_table() {
                self.skip_indirection_table()?;
            }
            if flags.is_last_slice() {
                return Ok(());
            }
        }
    }

    /// Decode 1.1 tables that were parse-skipped, now that the instance exists.
    fn read_deferred_tables(&mut self) -> Result<()> {
        let deferred = mem::take(&mut self.current_mut()?.deferred_tables);
        if deferred.is_empty() {
            return Ok(());
        }
        let resume = self.cursor.position();
        for (slice, position) in deferred {
            self.cursor.set_position(position)?;
            let table = self.read_indirection_table()?;
            if let Some(s) = self.current_mut()?.slices.get_mut(slice) {
                s.indirection_table = table;
            }
        }
        self.cursor.set_position(resume)
    }
}
