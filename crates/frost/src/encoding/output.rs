// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Encoding side of the encoding engine: primitives, encapsulations and
//! tagged members. Class and exception graphs are in `class_encoder`.

use std::mem;

use super::class_encoder::ClassEncoder;
use super::graph::ValueGraph;
use super::input::TAG_EXTENDED;
use super::{EncodingConfig, EncodingVersion, FormatType, TagFormat};
use crate::error::{Error, Result};
use crate::ser::CursorMut;

struct WriteEncaps {
    start: usize,
    encoding: EncodingVersion,
    encoder: ClassEncoder,
}

/// Growable encoder.
///
/// Class references are resolved against the attached [`ValueGraph`]; each
/// instance is marshaled once per encapsulation and later references reuse
/// its wire index.
pub struct OutputStream<'g> {
    pub(super) buf: Vec<u8>,
    pub(super) encoding: EncodingVersion,
    pub(super) format: FormatType,
    pub(super) graph: Option<&'g ValueGraph>,
    pub(super) encoder: ClassEncoder,
    enclosing: Vec<WriteEncaps>,
}

impl<'g> OutputStream<'g> {
    pub fn new(encoding: EncodingVersion) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            encoding,
            format: FormatType::default(),
            graph: None,
            encoder: ClassEncoder::default(),
            enclosing: Vec::new(),
        }
    }

    pub fn with_config(config: &EncodingConfig) -> Self {
        Self::new(config.default_encoding).with_format(config.default_format)
    }

    /// Builder: set class format
    pub fn with_format(mut self, format: FormatType) -> Self {
        self.format = format;
        self
    }

    /// Builder: attach the graph class references point into
    pub fn with_graph(mut self, graph: &'g ValueGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn encoding(&self) -> EncodingVersion {
        self.encoding
    }

    pub fn format(&self) -> FormatType {
        self.format
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn finished(self) -> Vec<u8> {
        self.buf
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    pub fn write_byte(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn write_short(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_int(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_long(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_float(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_double(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Sizes above `i32::MAX` are clamped.
    pub fn write_size(&mut self, v: usize) {
        if v < 255 {
            self.buf.push(v as u8);
        } else {
            self.buf.push(255);
            self.write_int(i32::try_from(v).unwrap_or(i32::MAX));
        }
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_size(v.len());
        self.buf.extend_from_slice(v.as_bytes());
    }

    pub fn write_string_seq(&mut self, v: &[String]) {
        self.write_size(v.len());
        for s in v {
            self.write_string(s);
        }
    }

    pub fn write_byte_seq(&mut self, v: &[u8]) {
        self.write_size(v.len());
        self.buf.extend_from_slice(v);
    }

    pub fn write_int_seq(&mut self, v: &[i32]) {
        self.write_size(v.len());
        for i in v {
            self.write_int(*i);
        }
    }

    /// Raw bytes without a size prefix.
    pub fn write_blob(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Overwrite an i32 already in the buffer.
    pub(super) fn rewrite_int(&mut self, position: usize, v: i32) -> Result<()> {
        let target = self
            .buf
            .get_mut(position..position + 4)
            .ok_or_else(|| Error::marshal(format!("rewrite at {} outside buffer", position)))?;
        CursorMut::new(target).write_i32_le(v)
    }

    // ========================================================================
    // Encapsulations
    // ========================================================================

    /// Open an encapsulation; `None` keeps the current encoding.
    pub fn start_encapsulation(&mut self, encoding: Option<EncodingVersion>) {
        let encoding = encoding.unwrap_or(self.encoding);
        self.enclosing.push(WriteEncaps {
            start: self.buf.len(),
            encoding: self.encoding,
            encoder: mem::take(&mut self.encoder),
        });
        self.write_int(0);
        self.write_byte(encoding.major);
        self.write_byte(encoding.minor);
        self.encoding = encoding;
    }

    pub fn end_encapsulation(&mut self) -> Result<()> {
        let outer = self
            .enclosing
            .pop()
            .ok_or_else(|| Error::marshal("end_encapsulation without start_encapsulation"))?;
        let size = self.buf.len() - outer.start;
        self.rewrite_int(outer.start, size as i32)?;
        self.encoding = outer.encoding;
        self.encoder = outer.encoder;
        Ok(())
    }

    pub fn write_empty_encapsulation(&mut self, encoding: EncodingVersion) {
        self.write_int(6);
        self.write_byte(encoding.major);
        self.write_byte(encoding.minor);
    }

    /// Run `write` inside an encapsulation.
    pub fn write_encapsulation(
        &mut self,
        encoding: Option<EncodingVersion>,
        write: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        self.start_encapsulation(encoding);
        write(self)?;
        self.end_encapsulation()
    }

    // ========================================================================
    // Tagged members
    // ========================================================================

    /// Write a tagged member header; the caller writes the value.
    pub fn write_tagged(&mut self, tag: u32, format: TagFormat) -> Result<()> {
        self.mark_tagged_members()?;
        if tag < u32::from(TAG_EXTENDED) {
            self.write_byte(((tag as u8) << 3) | format as u8);
        } else {
            self.write_byte((TAG_EXTENDED << 3) | format as u8);
            self.write_size(tag as usize);
        }
        Ok(())
    }

    pub fn write_tagged_int(&mut self, tag: u32, v: Option<i32>) -> Result<()> {
        if let Some(v) = v {
            self.write_tagged(tag, TagFormat::F4)?;
            self.write_int(v);
        }
        Ok(())
    }

    pub fn write_tagged_string(&mut self, tag: u32, v: Option<&str>) -> Result<()> {
        if let Some(v) = v {
            self.write_tagged(tag, TagFormat::VSize)?;
            self.write_string(v);
        }
        Ok(())
    }
}
