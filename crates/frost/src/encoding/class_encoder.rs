// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Class graph and exception encoding.
//!
//! - **Compact**: only the first slice names its type (omitted when it equals
//!   the field's formal type); references are written inline.
//! - **Sliced**: every slice carries a size, references inside slice data are
//!   indices into a per-slice indirection table written after the data, and
//!   slices preserved from an earlier decode are re-emitted first.
//!
//! Exceptions always use the sliced layout.

use std::collections::HashMap;
use std::mem;

use super::exception::{RemoteExceptionOrigin, UserException};
use super::graph::{Slice, SliceFlags, TypeIdentifier, ValueRef};
use super::output::OutputStream;
use super::value::Value;
use super::{FormatType, TAG_END_MARKER};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SliceKind {
    Value,
    Exception,
}

#[derive(Debug)]
struct WriteInstanceData {
    kind: SliceKind,
    formal: Option<String>,
    first_slice: bool,
    /// Every type id of the instance, most-derived first (2.0 first slice).
    type_ids: Vec<String>,
    message: String,
    origin: Option<RemoteExceptionOrigin>,
    flags: SliceFlags,
    flags_position: usize,
    size_position: Option<usize>,
    table: Vec<ValueRef>,
    in_data: bool,
    /// Preserved slice bytes already end with their tagged-member marker.
    raw_tagged: bool,
}

impl WriteInstanceData {
    fn new(kind: SliceKind, formal: Option<&str>, type_ids: Vec<String>) -> Self {
        Self {
            kind,
            formal: formal.map(str::to_owned),
            first_slice: true,
            type_ids,
            message: String::new(),
            origin: None,
            flags: SliceFlags::default(),
            flags_position: 0,
            size_position: None,
            table: Vec::new(),
            in_data: false,
            raw_tagged: false,
        }
    }
}

/// Marshaled-instance map and type-id table of one encapsulation.
#[derive(Debug, Default)]
pub(crate) struct ClassEncoder {
    marshaled: HashMap<ValueRef, usize>,
    type_ids: HashMap<String, usize>,
    current: Option<WriteInstanceData>,
}

impl<'g> OutputStream<'g> {
    /// Write a class reference that may be null.
    pub fn write_nullable_class(&mut self, r: Option<ValueRef>, formal: Option<&str>) -> Result<()> {
        let Some(r) = r else {
            self.write_size(0);
            return Ok(());
        };
        let sliced = self.format == FormatType::Sliced;
        if let Some(cur) = self.encoder.current.as_mut().filter(|cur| cur.in_data && sliced) {
            let position = match cur.table.iter().position(|t| *t == r) {
                Some(p) => p,
                None => {
                    cur.table.push(r);
                    cur.table.len() - 1
                }
            };
            self.write_size(position + 1);
            return Ok(());
        }
        self.write_instance(r, formal)
    }

    pub fn write_class(&mut self, r: ValueRef, formal: Option<&str>) -> Result<()> {
        self.write_nullable_class(Some(r), formal)
    }

    /// Write a user exception without message or origin.
    pub fn write_exception(&mut self, exception: &dyn UserException) -> Result<()> {
        self.write_exception_with(exception, "", None)
    }

    /// Write a user exception; message and origin are only encoded by 2.0.
    pub fn write_exception_with(
        &mut self,
        exception: &dyn UserException,
        message: &str,
        origin: Option<&RemoteExceptionOrigin>,
    ) -> Result<()> {
        let type_ids = exception.type_ids().iter().map(|s| (*s).to_owned()).collect();
        let mut data = WriteInstanceData::new(SliceKind::Exception, None, type_ids);
        data.message = message.to_owned();
        data.origin = origin.cloned();

        let saved_format = mem::replace(&mut self.format, FormatType::Sliced);
        let saved = self.encoder.current.replace(data);
        let result = exception.write_slices(self);
        self.encoder.current = saved;
        self.format = saved_format;
        result
    }

    /// Begin a slice of the instance being written.
    pub fn start_slice(&mut self, type_id: &str, compact_id: Option<i32>, is_last: bool) -> Result<()> {
        self.begin_slice(Some(type_id), compact_id, is_last)
    }

    /// Finish the current slice: tagged end marker, size and indirection table.
    pub fn end_slice(&mut self) -> Result<()> {
        let cur = self
            .encoder
            .current
            .as_mut()
            .filter(|cur| cur.in_data)
            .ok_or_else(|| Error::marshal("end_slice without start_slice"))?;
        cur.in_data = false;
        let mut flags = cur.flags;
        let flags_position = cur.flags_position;
        let size_position = cur.size_position.take();
        let table = mem::take(&mut cur.table);
        let raw_tagged = cur.raw_tagged;

        if flags.has_tagged_members() && !raw_tagged {
            self.write_byte(TAG_END_MARKER);
        }
        if let Some(position) = size_position {
            let size = self.buf.len() - position;
            self.rewrite_int(position, size as i32)?;
        }
        if !table.is_empty() {
            flags.set(SliceFlags::HAS_INDIRECTION_TABLE);
            self.write_size(table.len());
            for r in table {
                self.write_instance(r, None)?;
            }
        }
        self.buf[flags_position] = flags.0;
        Ok(())
    }

    pub(super) fn mark_tagged_members(&mut self) -> Result<()> {
        if let Some(cur) = self.encoder.current.as_mut().filter(|cur| cur.in_data) {
            cur.flags.set(SliceFlags::HAS_TAGGED_MEMBERS);
        }
        Ok(())
    }

    fn write_instance(&mut self, r: ValueRef, formal: Option<&str>) -> Result<()> {
        if let Some(&index) = self.encoder.marshaled.get(&r) {
            self.write_size(index);
            return Ok(());
        }
        let graph = self
            .graph
            .ok_or_else(|| Error::marshal("no value graph attached to the output stream"))?;
        let record = graph
            .record(r)
            .ok_or_else(|| Error::marshal(format!("instance {} is not in the graph", r)))?;
        let value: &dyn Value = &*record.value;

        let index = self.encoder.marshaled.len() + 2;
        self.encoder.marshaled.insert(r, index);
        self.write_size(1);

        // Wire order: most-derived first.
        let mut preserved: Vec<&Slice> = record.slices.iter().rev().filter(|s| s.is_preserved()).collect();
        if !preserved.is_empty() && self.format == FormatType::Compact {
            if value.type_ids().is_empty() {
                return Err(Error::marshal(format!(
                    "instance of unknown type `{}` can only be sent in the sliced format",
                    value.ice_id()
                )));
            }
            log::debug!(
                "[encoding] dropping {} preserved slices of `{}` in compact format",
                preserved.len(),
                value.ice_id()
            );
            preserved.clear();
        }

        let mut type_ids: Vec<String> = preserved
            .iter()
            .filter_map(|s| s.type_id.as_ref().map(ToString::to_string))
            .collect();
        type_ids.extend(value.type_ids().iter().map(|s| (*s).to_owned()));

        let saved = self
            .encoder
            .current
            .replace(WriteInstanceData::new(SliceKind::Value, formal, type_ids));
        let result = self.write_instance_slices(value, &preserved);
        self.encoder.current = saved;
        result
    }

    fn write_instance_slices(&mut self, value: &dyn Value, preserved: &[&Slice]) -> Result<()> {
        for slice in preserved {
            let (type_id, compact_id) = match &slice.type_id {
                Some(TypeIdentifier::String(s)) => (Some(s.as_str()), None),
                Some(TypeIdentifier::Compact(id)) => (None, Some(*id)),
                None => (None, None),
            };
            self.begin_slice(type_id, compact_id, slice.flags.is_last_slice())?;
            if let Some(bytes) = &slice.bytes {
                self.write_blob(bytes);
            }
            if let Some(cur) = self.encoder.current.as_mut() {
                if slice.flags.has_tagged_members() {
                    cur.flags.set(SliceFlags::HAS_TAGGED_MEMBERS);
                    cur.raw_tagged = true;
                }
                cur.table = slice.indirection_table.clone();
            }
            self.end_slice()?;
        }
        value.write_slices(self)
    }

    fn begin_slice(&mut self, type_id: Option<&str>, compact_id: Option<i32>, is_last: bool) -> Result<()> {
        let legacy = self.encoding.is_legacy();
        let sliced = self.format == FormatType::Sliced;
        let (kind, first, formal, type_ids, message, origin) = {
            let cur = self
                .encoder
                .current
                .as_mut()
                .ok_or_else(|| Error::marshal("start_slice outside of an instance or exception"))?;
            if cur.in_data {
                return Err(Error::marshal("start_slice inside an open slice"));
            }
            let first = mem::replace(&mut cur.first_slice, false);
            let v20_first = first && !legacy;
            (
                cur.kind,
                first,
                cur.formal.clone(),
                if v20_first { cur.type_ids.clone() } else { Vec::new() },
                if v20_first { cur.message.clone() } else { String::new() },
                if v20_first { cur.origin.clone() } else { None },
            )
        };

        let mut flags = SliceFlags::default();
        if is_last {
            flags.set(SliceFlags::IS_LAST_SLICE);
        }
        let flags_position = self.buf.len();
        self.write_byte(0);

        let omit_type_id = first && !sliced && formal.is_some() && formal.as_deref() == type_id;
        if legacy {
            if sliced || first {
                if kind == SliceKind::Exception {
                    flags.set(SliceFlags::V11_TYPE_ID_STRING);
                    self.write_string(type_id.unwrap_or_default());
                } else if let Some(id) = compact_id {
                    flags.set(SliceFlags::V11_TYPE_ID_COMPACT);
                    self.write_size(id.max(0) as usize);
                } else if !omit_type_id {
                    let type_id = type_id.ok_or_else(|| Error::marshal("slice without type id"))?;
                    let indexed = self.write_type_id(type_id);
                    flags.set(if indexed {
                        SliceFlags::V11_TYPE_ID_INDEX
                    } else {
                        SliceFlags::V11_TYPE_ID_STRING
                    });
                }
            }
        } else if first {
            if sliced || kind == SliceKind::Exception {
                flags.set(SliceFlags::V20_TYPE_ID_SEQUENCE);
                self.write_size(type_ids.len());
                for id in &type_ids {
                    if kind == SliceKind::Value {
                        self.register_type_id(id);
                    }
                    self.write_string(id);
                }
            } else if !omit_type_id {
                let type_id = type_id.ok_or_else(|| Error::marshal("slice without type id"))?;
                let indexed = self.write_type_id(type_id);
                flags.set(if indexed {
                    SliceFlags::V20_TYPE_ID_INDEX
                } else {
                    SliceFlags::V20_TYPE_ID_STRING
                });
            }
            if kind == SliceKind::Exception {
                self.write_string(&message);
                let origin = origin.unwrap_or_default();
                self.write_string(&origin.identity.name);
                self.write_string(&origin.identity.category);
                self.write_string(&origin.facet);
                self.write_string(&origin.operation);
            }
        }

        let mut size_position = None;
        if sliced {
            flags.set(SliceFlags::HAS_SLICE_SIZE);
            size_position = Some(self.buf.len());
            self.write_int(0);
        }

        let cur = self
            .encoder
            .current
            .as_mut()
            .ok_or_else(|| Error::marshal("start_slice outside of an instance or exception"))?;
        cur.flags = flags;
        cur.flags_position = flags_position;
        cur.size_position = size_position;
        cur.table.clear();
        cur.in_data = true;
        cur.raw_tagged = false;
        Ok(())
    }

    /// Write a type id as an index when already sent, else as a string.
    /// Returns `true` for an index.
    fn write_type_id(&mut self, type_id: &str) -> bool {
        if let Some(&index) = self.encoder.type_ids.get(type_id) {
            self.write_size(index);
            true
        } else {
            self.register_type_id(type_id);
            self.write_string(type_id);
            false
        }
    }

    fn register_type_id(&mut self, type_id: &str) {
        let next = self.encoder.type_ids.len() + 1;
        self.encoder.type_ids.entry(type_id.to_owned()).or_insert(next);
    }
}
