// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Frost - RPC object request broker core
//!
//! The marshaling, resolution, transport and dispatch layers of an
//! object-oriented RPC runtime.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                          Invocation Layer                           |
//! |   Reference -> LocatorInfo (indirect resolution, cached)            |
//! +---------------------------------------------------------------------+
//! |                          Encoding Layer                             |
//! |   InputStream / OutputStream | class graphs (1.1, 2.0) | exceptions |
//! +---------------------------------------------------------------------+
//! |                          Transport Layer                            |
//! |   WsConnection -> WsSocket (HTTP upgrade, framing) -> ByteStream    |
//! +---------------------------------------------------------------------+
//! |                          Dispatch Layer                             |
//! |   ThreadPool (elastic workers, handler state machine) <- Reactor    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`encoding::InputStream`] | Decodes primitives, encapsulations and class graphs |
//! | [`encoding::OutputStream`] | Encodes the same, in compact or sliced format |
//! | [`locator::LocatorInfo`] | Resolves indirect references with a TTL cache |
//! | [`transport::ws::WsSocket`] | Non-blocking WebSocket endpoint |
//! | [`thread_pool::ThreadPool`] | Elastic pool servicing work items and socket handlers |
//!
//! ## Modules Overview
//!
//! - [`encoding`] - Binary encoding engine
//! - [`locator`] - Indirect reference resolution
//! - [`transport`] - WebSocket transport and readiness reactor
//! - [`thread_pool`] - Worker pool and event handler dispatch
//! - [`config`] - Property-based configuration
//! - [`ser`] - Bounds-checked byte cursors

pub mod config;
pub mod encoding;
pub mod error;
pub mod locator;
pub mod ser;
pub mod thread_pool;
pub mod transport;

pub use config::Properties;
pub use error::{Error, Result};
