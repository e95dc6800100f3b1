// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket frame header codec (RFC 6455 section 5.2).
//!
//! ```text
//!  0               1               2               3
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |        (16 or 64 bits)        |
//! |N|V|V|V|       |S|             |                               |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |      Masking key (32 bits, present when MASK is set)          |
//! +---------------------------------------------------------------+
//! ```
//!
//! Extended lengths are big-endian: 126 selects a 16-bit length, 127 a
//! 64-bit length.

use crate::error::{Error, Result};
use crate::ser::{Cursor, CursorMut};

/// FIN bit of the first header byte.
pub const FLAG_FINAL: u8 = 0x80;
/// Reserved extension bits of the first header byte.
pub const FLAG_RESERVED: u8 = 0x70;
/// MASK bit of the second header byte.
pub const FLAG_MASKED: u8 = 0x80;

const OPCODE_MASK: u8 = 0x0F;
const LENGTH_MASK: u8 = 0x7F;
const LENGTH_16: u8 = 126;
const LENGTH_64: u8 = 127;

/// Largest payload of a control frame.
pub const CONTROL_PAYLOAD_MAX: u64 = 125;

/// Longest possible header: 2 + 8 length bytes + 4 mask bytes.
pub const HEADER_LEN_MAX: usize = 14;

// Close status codes.
pub const CLOSURE_NORMAL: u16 = 1000;
pub const CLOSURE_SHUTDOWN: u16 = 1001;
pub const CLOSURE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSURE_TOO_BIG: u16 = 1009;

/// Frame opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Continuation,
    Text,
    /// Binary data.
    Data,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Data),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(Error::protocol(format!("unsupported opcode 0x{:x}", other))),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Data => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Decoded frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask: Option<[u8; 4]>,
    pub payload_len: u64,
}

impl FrameHeader {
    pub fn new(opcode: Opcode, fin: bool, payload_len: u64) -> Self {
        Self {
            fin,
            opcode,
            mask: None,
            payload_len,
        }
    }

    /// Builder: set masking key
    pub fn with_mask(mut self, mask: [u8; 4]) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Encoded header size in bytes.
    pub fn encoded_len(&self) -> usize {
        let length = match self.payload_len {
            0..=125 => 0,
            126..=0xFFFF => 2,
            _ => 8,
        };
        2 + length + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Append the encoded header to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN_MAX];
        let len = self.encoded_len();
        let mut cursor = CursorMut::new(&mut buf[..len]);

        let first = self.opcode.bits() | if self.fin { FLAG_FINAL } else { 0 };
        let masked = if self.mask.is_some() { FLAG_MASKED } else { 0 };
        cursor.write_u8(first)?;
        match self.payload_len {
            n @ 0..=125 => cursor.write_u8(masked | n as u8)?,
            n @ 126..=0xFFFF => {
                cursor.write_u8(masked | LENGTH_16)?;
                cursor.write_u16_be(n as u16)?;
            }
            n => {
                cursor.write_u8(masked | LENGTH_64)?;
                cursor.write_u64_be(n)?;
            }
        }
        if let Some(mask) = self.mask {
            cursor.write_bytes(&mask)?;
        }

        out.extend_from_slice(&buf[..len]);
        Ok(())
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed, otherwise the header
    /// and the number of bytes it occupies. Reserved bits, unknown opcodes,
    /// fragmented or oversized control frames and 64-bit lengths with the
    /// high bit set are protocol errors.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let (first, second) = (buf[0], buf[1]);
        let masked = second & FLAG_MASKED != 0;
        let length_bytes = match second & LENGTH_MASK {
            LENGTH_16 => 2,
            LENGTH_64 => 8,
            _ => 0,
        };
        let header_len = 2 + length_bytes + if masked { 4 } else { 0 };
        if buf.len() < header_len {
            return Ok(None);
        }

        if first & FLAG_RESERVED != 0 {
            return Err(Error::protocol("reserved bits set in frame header"));
        }
        let opcode = Opcode::from_bits(first & OPCODE_MASK)?;
        let fin = first & FLAG_FINAL != 0;

        let mut cursor = Cursor::new(&buf[..header_len]);
        cursor.skip(2)?;
        let payload_len = match second & LENGTH_MASK {
            LENGTH_16 => u64::from(cursor.read_u16_be()?),
            LENGTH_64 => cursor.read_u64_be()?,
            n => u64::from(n),
        };
        if payload_len >> 63 != 0 {
            return Err(Error::protocol("invalid 64-bit payload length"));
        }
        if opcode.is_control() && (!fin || payload_len > CONTROL_PAYLOAD_MAX) {
            return Err(Error::protocol("fragmented or oversized control frame"));
        }

        let mask = if masked {
            let bytes = cursor.read_bytes(4)?;
            Some([bytes[0], bytes[1], bytes[2], bytes[3]])
        } else {
            None
        };

        Ok(Some((
            Self {
                fin,
                opcode,
                mask,
                payload_len,
            },
            header_len,
        )))
    }
}

/// XOR `data` with `mask`, where `offset` is the position of `data[0]`
/// within the frame payload.
pub fn apply_mask(data: &mut [u8], mask: [u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[(offset + i) % 4];
    }
}

/// Append a complete frame (header and payload) to `out`, masking the
/// payload when `mask` is set.
pub fn encode_frame(out: &mut Vec<u8>, opcode: Opcode, payload: &[u8], mask: Option<[u8; 4]>) -> Result<()> {
    let mut header = FrameHeader::new(opcode, true, payload.len() as u64);
    header.mask = mask;
    header.encode(out)?;

    let start = out.len();
    out.extend_from_slice(payload);
    if let Some(mask) = mask {
        apply_mask(&mut out[start..], mask, 0);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(header: FrameHeader) -> FrameHeader {
        let mut out = Vec::new();
        header.encode(&mut out).expect("encode");
        assert_eq!(out.len(), header.encoded_len());
        let (decoded, used) = FrameHeader::decode(&out).expect("decode").expect("complete");
        assert_eq!(used, out.len());
        decoded
    }

    #[test]
    fn test_length_encodings() {
        for (len, header_len) in [(0u64, 2usize), (125, 2), (126, 4), (0xFFFF, 4), (0x10000, 10)] {
            let header = FrameHeader::new(Opcode::Data, true, len);
            assert_eq!(header.encoded_len(), header_len);
            assert_eq!(roundtrip(header), header);
        }
    }

    #[test]
    fn test_masked_header() {
        let header = FrameHeader::new(Opcode::Continuation, false, 300).with_mask([1, 2, 3, 4]);
        assert_eq!(header.encoded_len(), 8);
        assert_eq!(roundtrip(header), header);
    }

    #[test]
    fn test_partial_header_needs_more() {
        let mut out = Vec::new();
        FrameHeader::new(Opcode::Data, true, 70000)
            .with_mask([9, 9, 9, 9])
            .encode(&mut out)
            .expect("encode");
        for cut in 0..out.len() {
            assert!(FrameHeader::decode(&out[..cut]).expect("no error").is_none());
        }
    }

    #[test]
    fn test_rfc_example_frames() {
        // Unmasked "Hello" text frame and masked "Hello" from RFC 6455 5.7.
        let (header, used) = FrameHeader::decode(&[0x81, 0x05, b'H']).expect("ok").expect("complete");
        assert_eq!((header.opcode, header.fin, header.payload_len, used), (Opcode::Text, true, 5, 2));

        let mut frame = vec![0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58];
        let (header, used) = FrameHeader::decode(&frame).expect("ok").expect("complete");
        let mask = header.mask.expect("masked");
        apply_mask(&mut frame[used..], mask, 0);
        assert_eq!(&frame[used..], b"Hello");
    }

    #[test]
    fn test_mask_offset_continues_across_chunks() {
        let mask = [0xAA, 0xBB, 0xCC, 0xDD];
        let mut whole = b"streamed payload".to_vec();
        apply_mask(&mut whole, mask, 0);

        let mut chunked = b"streamed payload".to_vec();
        let (a, b) = chunked.split_at_mut(5);
        apply_mask(a, mask, 0);
        apply_mask(b, mask, 5);
        assert_eq!(whole, chunked);
    }

    #[test]
    fn test_invalid_headers() {
        assert!(FrameHeader::decode(&[0xC2, 0x00]).is_err()); // RSV1
        assert!(FrameHeader::decode(&[0x83, 0x00]).is_err()); // reserved opcode
        assert!(FrameHeader::decode(&[0x09, 0x00]).is_err()); // fragmented ping
        assert!(FrameHeader::decode(&[0x88, 0x7E, 0x00, 0x80]).is_err()); // 128-byte close
        let mut huge = vec![0x82, 0x7F];
        huge.extend_from_slice(&u64::MAX.to_be_bytes());
        assert!(FrameHeader::decode(&huge).is_err());
    }

    #[test]
    fn test_encode_frame_masks_payload() {
        let mut out = Vec::new();
        encode_frame(&mut out, Opcode::Ping, b"abc", Some([1, 1, 1, 1])).expect("encode");
        assert_eq!(out, vec![0x89, 0x83, 1, 1, 1, 1, b'a' ^ 1, b'b' ^ 1, b'c' ^ 1]);
    }
}
