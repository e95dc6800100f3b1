// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Position/limit-bounded read and write cursors.
//!
//! The encoding engine reads little-endian values; the WebSocket framer reads
//! and writes big-endian (network order) header fields. Both go through these
//! cursors so every access is bounds-checked against the cursor's limit.

use crate::error::{Error, Result};

/// Generate read methods for one primitive in both byte orders.
macro_rules! impl_read {
    ($le:ident, $be:ident, $type:ty, $size:expr) => {
        pub fn $le(&mut self) -> Result<$type> {
            let bytes = self.read_array::<$size>()?;
            Ok(<$type>::from_le_bytes(bytes))
        }

        pub fn $be(&mut self) -> Result<$type> {
            let bytes = self.read_array::<$size>()?;
            Ok(<$type>::from_be_bytes(bytes))
        }
    };
}

/// Generate write methods for one primitive in both byte orders.
macro_rules! impl_write {
    ($le:ident, $be:ident, $type:ty) => {
        pub fn $le(&mut self, value: $type) -> Result<()> {
            self.write_bytes(&value.to_le_bytes())
        }

        pub fn $be(&mut self, value: $type) -> Result<()> {
            self.write_bytes(&value.to_be_bytes())
        }
    };
}

/// Read cursor over an immutable buffer.
///
/// `position` moves forward as values are read; `limit` caps how far reads
/// may go (defaults to the buffer length). The class-graph decoder narrows the
/// limit to the current encapsulation and seeks with [`Cursor::set_position`]
/// to read indirection tables that follow slice data.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    buffer: &'a [u8],
    position: usize,
    limit: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            limit: buffer.len(),
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn remaining(&self) -> usize {
        self.limit.saturating_sub(self.position)
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Moves the read position. Positions past the limit are rejected.
    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.limit {
            return Err(Error::marshal(format!(
                "position {} beyond limit {}",
                position, self.limit
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Narrows or widens the readable region. The limit never exceeds the buffer.
    pub fn set_limit(&mut self, limit: usize) -> Result<()> {
        if limit > self.buffer.len() || limit < self.position {
            return Err(Error::marshal(format!(
                "invalid limit {} (position {}, capacity {})",
                limit,
                self.position,
                self.buffer.len()
            )));
        }
        self.limit = limit;
        Ok(())
    }

    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.read_bytes(len).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        if self.position >= self.limit {
            return Err(self.eof());
        }
        let b = self.buffer[self.position];
        self.position += 1;
        Ok(b)
    }

    pub fn peek_u8(&self) -> Result<u8> {
        if self.position >= self.limit {
            return Err(self.eof());
        }
        Ok(self.buffer[self.position])
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.eof());
        }
        let slice = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(slice)
    }

    /// Returns a sub-slice of the underlying buffer without moving the cursor.
    pub fn slice(&self, start: usize, end: usize) -> Result<&'a [u8]> {
        if start > end || end > self.limit {
            return Err(Error::marshal(format!(
                "slice {}..{} outside limit {}",
                start, end, self.limit
            )));
        }
        Ok(&self.buffer[start..end])
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(self.read_bytes(N)?);
        Ok(bytes)
    }

    impl_read!(read_u16_le, read_u16_be, u16, 2);
    impl_read!(read_u32_le, read_u32_be, u32, 4);
    impl_read!(read_u64_le, read_u64_be, u64, 8);
    impl_read!(read_i16_le, read_i16_be, i16, 2);
    impl_read!(read_i32_le, read_i32_be, i32, 4);
    impl_read!(read_i64_le, read_i64_be, i64, 8);
    impl_read!(read_f32_le, read_f32_be, f32, 4);
    impl_read!(read_f64_le, read_f64_be, f64, 8);

    fn eof(&self) -> Error {
        Error::marshal(format!(
            "unexpected end of buffer at offset {}",
            self.position
        ))
    }
}

/// Write cursor over a mutable buffer.
#[derive(Debug)]
pub struct CursorMut<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> CursorMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) -> Result<()> {
        if position > self.buffer.len() {
            return Err(Error::marshal(format!(
                "position {} beyond capacity {}",
                position,
                self.buffer.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.remaining() {
            return Err(Error::marshal(format!(
                "buffer too small at offset {} ({} bytes needed)",
                self.position,
                data.len()
            )));
        }
        self.buffer[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
        Ok(())
    }

    impl_write!(write_u16_le, write_u16_be, u16);
    impl_write!(write_u32_le, write_u32_be, u32);
    impl_write!(write_u64_le, write_u64_be, u64);
    impl_write!(write_i16_le, write_i16_be, i16);
    impl_write!(write_i32_le, write_i32_be, i32);
    impl_write!(write_i64_le, write_i64_be, i64);
    impl_write!(write_f32_le, write_f32_be, f32);
    impl_write!(write_f64_le, write_f64_be, f64);
}
