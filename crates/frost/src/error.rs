// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error type shared by every frost subsystem.
//!
//! Errors fall into four categories that callers are expected to tell apart:
//!
//! | Category | Variants | Predicate |
//! |----------|----------|-----------|
//! | Invalid data | [`Error::Marshal`], [`Error::DepthExceeded`], [`Error::FrameTooLarge`], [`Error::Protocol`] | [`Error::is_invalid_data`] |
//! | Resolution | [`Error::NotRegistered`] | [`Error::is_not_registered`] |
//! | Transport | [`Error::ConnectionLost`], [`Error::ConnectionRefused`], [`Error::Io`] | [`Error::is_transport`] |
//! | Runtime | [`Error::UnknownException`], [`Error::Config`], [`Error::PoolDestroyed`] | - |
//!
//! `WouldBlock` and `Interrupted` I/O results never become an [`Error`]: the
//! socket layers retry them or report "not ready yet" instead.

use std::fmt;
use std::io;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// What a locator failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotRegisteredKind {
    /// An object adapter id.
    Adapter,
    /// A well-known object identity.
    Object,
}

impl fmt::Display for NotRegisteredKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adapter => f.write_str("object adapter"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Crate-wide error.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Invalid data
    // ========================================================================
    /// Malformed encoded data (bad slice flags, indices out of range, truncated buffer).
    Marshal(String),
    /// Class graph nested deeper than the configured maximum.
    DepthExceeded {
        /// Configured maximum depth.
        max: usize,
    },
    /// Declared payload larger than the configured maximum.
    FrameTooLarge {
        /// Declared size in bytes.
        size: u64,
        /// Maximum accepted size in bytes.
        max: usize,
    },
    /// HTTP handshake or WebSocket framing violation.
    Protocol(String),

    // ========================================================================
    // Resolution
    // ========================================================================
    /// The locator does not know the adapter or object.
    NotRegistered {
        /// Adapter or object.
        kind: NotRegisteredKind,
        /// Adapter id or stringified identity.
        id: String,
    },

    // ========================================================================
    // Transport
    // ========================================================================
    /// Peer closed or reset the connection.
    ConnectionLost(String),
    /// Connection attempt refused.
    ConnectionRefused(String),
    /// Any other I/O failure.
    Io(io::Error),

    // ========================================================================
    // Runtime
    // ========================================================================
    /// Unexpected failure caught at a dispatch boundary.
    UnknownException(String),
    /// Invalid configuration.
    Config(String),
    /// Work submitted to a thread pool after `destroy()`.
    PoolDestroyed,
}

impl Error {
    /// Creates a marshal error.
    #[inline]
    pub fn marshal(reason: impl Into<String>) -> Self {
        Self::Marshal(reason.into())
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Creates a connection-lost error.
    #[inline]
    pub fn connection_lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost(reason.into())
    }

    /// Creates a "not registered" error.
    #[inline]
    pub fn not_registered(kind: NotRegisteredKind, id: impl Into<String>) -> Self {
        Self::NotRegistered {
            kind,
            id: id.into(),
        }
    }

    /// Returns `true` for data-format, resource-limit and framing errors.
    #[inline]
    #[must_use]
    pub fn is_invalid_data(&self) -> bool {
        matches!(
            self,
            Self::Marshal(_)
                | Self::DepthExceeded { .. }
                | Self::FrameTooLarge { .. }
                | Self::Protocol(_)
        )
    }

    /// Returns `true` when a locator reported the adapter or object unknown.
    #[inline]
    #[must_use]
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }

    /// Returns `true` for connection-level failures.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost(_) | Self::ConnectionRefused(_) | Self::Io(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Marshal(reason) => write!(f, "marshal error: {}", reason),
            Self::DepthExceeded { max } => {
                write!(f, "marshal error: maximum class graph depth {} exceeded", max)
            }
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame of {} bytes exceeds maximum of {} bytes", size, max)
            }
            Self::Protocol(reason) => write!(f, "protocol error: {}", reason),
            Self::NotRegistered { kind, id } => write!(f, "{} `{}` is not registered", kind, id),
            Self::ConnectionLost(reason) => write!(f, "connection lost: {}", reason),
            Self::ConnectionRefused(reason) => write!(f, "connection refused: {}", reason),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::UnknownException(reason) => write!(f, "unknown exception: {}", reason),
            Self::Config(reason) => write!(f, "configuration error: {}", reason),
            Self::PoolDestroyed => write!(f, "thread pool destroyed"),
        }
    }
}

/// I/O errors are rebuilt from their kind and message so one failure can be
/// handed to several waiters.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Self::Marshal(r) => Self::Marshal(r.clone()),
            Self::DepthExceeded { max } => Self::DepthExceeded { max: *max },
            Self::FrameTooLarge { size, max } => Self::FrameTooLarge {
                size: *size,
                max: *max,
            },
            Self::Protocol(r) => Self::Protocol(r.clone()),
            Self::NotRegistered { kind, id } => Self::NotRegistered {
                kind: *kind,
                id: id.clone(),
            },
            Self::ConnectionLost(r) => Self::ConnectionLost(r.clone()),
            Self::ConnectionRefused(r) => Self::ConnectionRefused(r.clone()),
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::UnknownException(r) => Self::UnknownException(r.clone()),
            Self::Config(r) => Self::Config(r.clone()),
            Self::PoolDestroyed => Self::PoolDestroyed,
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused(e.to_string()),
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e),
        }
    }
}
