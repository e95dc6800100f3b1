// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream transports.
//!
//! # Architecture
//!
//! ```text
//! WsConnection (EventHandler)
//!     |                 \
//!     |                  +-- Reactor ------> AsyncCompletion ---> ThreadPool
//!     v
//! WsSocket<S: ByteStream> -- HttpParser (upgrade) -- FrameHeader (framing)
//!     |
//!     v
//! ByteStream: mio TcpStream | std TcpStream | MockStream
//! ```

pub mod byte_stream;
pub mod connection;
pub mod reactor;
pub mod ws;

pub use byte_stream::ByteStream;
pub use connection::{ConnectionObserver, WsConnection};
pub use reactor::Reactor;
