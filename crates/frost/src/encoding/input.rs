// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoding side of the encoding engine: primitives, encapsulations and
//! tagged members. Class and exception graphs are in `class_decoder`.

use std::mem;

use super::class_decoder::ClassDecoder;
use super::graph::ValueGraph;
use super::registry::TypeRegistry;
use super::{EncodingConfig, EncodingVersion, TagFormat, ENCAPSULATION_HEADER_SIZE, TAG_END_MARKER};
use crate::error::{Error, Result};
use crate::ser::Cursor;

/// Tag numbers from this value up are written as a size after the header byte.
pub(crate) const TAG_EXTENDED: u8 = 30;

/// Per-encapsulation decoding state.
pub(super) struct Encaps {
    pub(super) encoding: EncodingVersion,
    end: usize,
    previous_limit: usize,
    pub(super) decoder: ClassDecoder,
}

/// Reads encoded data from a borrowed buffer.
///
/// The stream starts in an implicit top-level encapsulation using the
/// encoding passed to [`InputStream::new`]; nested encapsulations carry
/// their own version and their own instance graph.
pub struct InputStream<'a> {
    pub(super) cursor: Cursor<'a>,
    pub(super) registry: &'a TypeRegistry,
    pub(super) depth_max: usize,
    pub(super) encaps: Encaps,
    enclosing: Vec<Encaps>,
}

impl<'a> InputStream<'a> {
    pub fn new(buffer: &'a [u8], encoding: EncodingVersion, registry: &'a TypeRegistry) -> Self {
        Self {
            cursor: Cursor::new(buffer),
            registry,
            depth_max: EncodingConfig::default().class_graph_depth_max,
            encaps: Encaps {
                encoding,
                end: buffer.len(),
                previous_limit: buffer.len(),
                decoder: ClassDecoder::default(),
            },
            enclosing: Vec::new(),
        }
    }

    pub fn with_config(buffer: &'a [u8], registry: &'a TypeRegistry, config: &EncodingConfig) -> Self {
        Self::new(buffer, config.default_encoding, registry)
            .with_depth_max(config.class_graph_depth_max)
    }

    /// Builder: set maximum class graph depth
    pub fn with_depth_max(mut self, depth_max: usize) -> Self {
        self.depth_max = depth_max;
        self
    }

    /// Encoding of the current encapsulation.
    pub fn encoding(&self) -> EncodingVersion {
        self.encaps.encoding
    }

    pub fn position(&self) -> usize {
        self.cursor.position()
    }

    /// Bytes left in the current encapsulation.
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    pub fn read_byte(&mut self) -> Result<u8> {
        self.cursor.read_u8()
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.cursor.read_u8()? != 0)
    }

    pub fn read_short(&mut self) -> Result<i16> {
        self.cursor.read_i16_le()
    }

    pub fn read_int(&mut self) -> Result<i32> {
        self.cursor.read_i32_le()
    }

    pub fn read_long(&mut self) -> Result<i64> {
        self.cursor.read_i64_le()
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.cursor.read_f32_le()
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.cursor.read_f64_le()
    }

    /// One byte below 255, otherwise 255 followed by an i32.
    pub fn read_size(&mut self) -> Result<usize> {
        let b = self.cursor.read_u8()?;
        if b < 255 {
            return Ok(usize::from(b));
        }
        let size = self.cursor.read_i32_le()?;
        if size < 0 {
            return Err(Error::marshal(format!("negative size {}", size)));
        }
        Ok(size as usize)
    }

    /// Reads a sequence size and rejects it if `size * min_element_size`
    /// cannot fit in the remaining data.
    pub fn read_and_check_seq_size(&mut self, min_element_size: usize) -> Result<usize> {
        let size = self.read_size()?;
        if size.saturating_mul(min_element_size) > self.cursor.remaining() {
            return Err(Error::marshal(format!(
                "sequence of {} elements exceeds remaining {} bytes",
                size,
                self.cursor.remaining()
            )));
        }
        Ok(size)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_size()?;
        let bytes = self.cursor.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::marshal(format!("invalid UTF-8 string: {}", e)))
    }

    pub fn read_string_seq(&mut self) -> Result<Vec<String>> {
        let count = self.read_and_check_seq_size(1)?;
        (0..count).map(|_| self.read_string()).collect()
    }

    pub fn read_byte_seq(&mut self) -> Result<Vec<u8>> {
        let len = self.read_and_check_seq_size(1)?;
        Ok(self.cursor.read_bytes(len)?.to_vec())
    }

    pub fn read_int_seq(&mut self) -> Result<Vec<i32>> {
        let count = self.read_and_check_seq_size(4)?;
        (0..count).map(|_| self.read_int()).collect()
    }

    /// Raw bytes without a size prefix.
    pub fn read_blob(&mut self, len: usize) -> Result<&'a [u8]> {
        self.cursor.read_bytes(len)
    }

    // ========================================================================
    // Encapsulations
    // ========================================================================

    /// Enter an encapsulation and return its encoding version.
    ///
    /// Reads are limited to the encapsulation until [`end_encapsulation`].
    ///
    /// [`end_encapsulation`]: InputStream::end_encapsulation
    pub fn start_encapsulation(&mut self) -> Result<EncodingVersion> {
        let start = self.cursor.position();
        let size = self.read_int()?;
        if size < ENCAPSULATION_HEADER_SIZE as i32 {
            return Err(Error::marshal(format!("invalid encapsulation size {}", size)));
        }
        let end = start + size as usize;
        if end > self.cursor.limit() {
            return Err(Error::marshal(format!(
                "encapsulation of {} bytes exceeds remaining {} bytes",
                size,
                self.cursor.limit() - start
            )));
        }
        let encoding = EncodingVersion::new(self.read_byte()?, self.read_byte()?);
        if !encoding.is_supported() {
            return Err(Error::marshal(format!("unsupported encoding {}", encoding)));
        }

        let previous_limit = self.cursor.limit();
        self.cursor.set_limit(end)?;
        let outer = mem::replace(
            &mut self.encaps,
            Encaps {
                encoding,
                end,
                previous_limit,
                decoder: ClassDecoder::default(),
            },
        );
        self.enclosing.push(outer);
        Ok(encoding)
    }

    /// Leave the current encapsulation and return the instances it decoded.
    ///
    /// Unread trailing tagged members are skipped; any other unread data is an error.
    pub fn end_encapsulation(&mut self) -> Result<ValueGraph> {
        if self.enclosing.is_empty() {
            return Err(Error::marshal("end_encapsulation without start_encapsulation"));
        }
        self.skip_trailing_tagged()?;
        if self.cursor.position() != self.encaps.end {
            return Err(Error::marshal(format!(
                "encapsulation not fully consumed ({} bytes left)",
                self.encaps.end - self.cursor.position()
            )));
        }

        let outer = self.enclosing.pop().ok_or_else(|| Error::marshal("no enclosing encapsulation"))?;
        let inner = mem::replace(&mut self.encaps, outer);
        self.cursor.set_limit(inner.previous_limit)?;
        inner.decoder.finish()
    }

    /// Skip an encapsulation without decoding it.
    pub fn skip_encapsulation(&mut self) -> Result<EncodingVersion> {
        let size = self.read_int()?;
        if size < ENCAPSULATION_HEADER_SIZE as i32 {
            return Err(Error::marshal(format!("invalid encapsulation size {}", size)));
        }
        let encoding = EncodingVersion::new(self.read_byte()?, self.read_byte()?);
        self.cursor.skip(size as usize - ENCAPSULATION_HEADER_SIZE)?;
        Ok(encoding)
    }

    /// Run `read` inside an encapsulation.
    pub fn read_encapsulation<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<(T, ValueGraph)> {
        self.start_encapsulation()?;
        let value = read(self)?;
        let graph = self.end_encapsulation()?;
        Ok((value, graph))
    }

    /// Complete the top-level decode and return its instances.
    pub fn finish(&mut self) -> Result<ValueGraph> {
        if !self.enclosing.is_empty() {
            return Err(Error::marshal("finish called inside an encapsulation"));
        }
        mem::take(&mut self.encaps.decoder).finish()
    }

    // ========================================================================
    // Tagged members
    // ========================================================================

    /// Position the stream on tagged member `tag` if present.
    ///
    /// Returns `false` when the member is absent; lower tags encountered on
    /// the way are skipped. Tags must be read in increasing order.
    pub fn read_tagged(&mut self, tag: u32, format: TagFormat) -> Result<bool> {
        if let Some(flags) = self.current_slice_flags() {
            if !flags.has_tagged_members() {
                return Ok(false);
            }
        }
        loop {
            if !self.cursor.has_remaining() {
                return Ok(false);
            }
            let start = self.cursor.position();
            let header = self.read_byte()?;
            if header == TAG_END_MARKER {
                self.cursor.set_position(start)?;
                return Ok(false);
            }
            let found_format = TagFormat::from_bits(header);
            let mut found = u32::from(header >> 3);
            if found == u32::from(TAG_EXTENDED) {
                found = self.read_size()? as u32;
            }
            if found > tag {
                self.cursor.set_position(start)?;
                return Ok(false);
            }
            if found < tag {
                self.skip_tagged(found_format)?;
                continue;
            }
            if found_format != format {
                return Err(Error::marshal(format!(
                    "tagged member {} encoded as {:?}, expected {:?}",
                    tag, found_format, format
                )));
            }
            return Ok(true);
        }
    }

    pub fn read_tagged_int(&mut self, tag: u32) -> Result<Option<i32>> {
        if self.read_tagged(tag, TagFormat::F4)? {
            self.read_int().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn read_tagged_string(&mut self, tag: u32) -> Result<Option<String>> {
        if self.read_tagged(tag, TagFormat::VSize)? {
            self.read_string().map(Some)
        } else {
            Ok(None)
        }
    }

    pub(super) fn skip_tagged(&mut self, format: TagFormat) -> Result<()> {
        match format {
            TagFormat::F1 => self.cursor.skip(1),
            TagFormat::F2 => self.cursor.skip(2),
            TagFormat::F4 => self.cursor.skip(4),
            TagFormat::F8 => self.cursor.skip(8),
            TagFormat::Size => self.read_size().map(|_| ()),
            TagFormat::VSize => {
                let len = self.read_size()?;
                self.cursor.skip(len)
            }
            TagFormat::FSize => {
                let len = self.read_int()?;
                if len < 0 {
                    return Err(Error::marshal(format!("negative tagged member size {}", len)));
                }
                self.cursor.skip(len as usize)
            }
            TagFormat::Class => self.read_nullable_class(None).map(|_| ()),
        }
    }

    /// Skip tagged members up to and including the end marker.
    pub(super) fn skip_tagged_members(&mut self) -> Result<()> {
        loop {
            let header = self.read_byte()?;
            if header == TAG_END_MARKER {
                return Ok(());
            }
            self.skip_tagged_header_and_value(header)?;
        }
    }

    fn skip_trailing_tagged(&mut self) -> Result<()> {
        while self.cursor.has_remaining() {
            let header = self.read_byte()?;
            if header == TAG_END_MARKER {
                break;
            }
            self.skip_tagged_header_and_value(header)?;
        }
        Ok(())
    }

    fn skip_tagged_header_and_value(&mut self, header: u8) -> Result<()> {
        if header >> 3 == TAG_EXTENDED {
            self.read_size()?;
        }
        self.skip_tagged(TagFormat::from_bits(header))
    }
}
