// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket transport: HTTP upgrade handshake and binary framing.
//!
//! # Architecture
//!
//! ```text
//! WsSocket<S: ByteStream>
//!     |
//!     +-- HttpParser ..... upgrade request / 101 response
//!     +-- FrameHeader .... 2/4/10-byte headers, masking
//!     +-- write buffer ... single FIFO for handshake, data and control frames
//! ```
//!
//! Only binary data frames carry messages; text frames are rejected.

pub mod config;
pub mod frame;
pub mod http;
pub mod socket;

pub use config::{WsConfig, DEFAULT_PROTOCOL};
pub use frame::{FrameHeader, Opcode};
pub use http::{HttpMessageKind, HttpParser};
pub use socket::{compute_accept, Incoming, Received, Role, SocketState, WsSocket};
