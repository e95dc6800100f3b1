// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User exceptions carried in replies.

use std::fmt;

use super::graph::Slice;
use super::input::InputStream;
use super::output::OutputStream;
use super::value::AsAny;
use crate::error::Result;
use crate::locator::Identity;

/// A user-defined exception marshaled as slices, most-derived first.
///
/// Exceptions are never shared, so they are not part of the instance list;
/// class members they hold still resolve into the encapsulation's graph.
pub trait UserException: AsAny + fmt::Debug + Send {
    /// Type ids of the slices this type marshals, most-derived first.
    fn type_ids(&self) -> &'static [&'static str];

    fn read_slices(&mut self, input: &mut InputStream<'_>) -> Result<()>;

    fn write_slices(&self, output: &mut OutputStream<'_>) -> Result<()>;

    fn ice_id(&self) -> &str {
        self.type_ids().first().copied().unwrap_or("")
    }
}

/// Where a 2.0 exception was raised.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteExceptionOrigin {
    pub identity: Identity,
    pub facet: String,
    pub operation: String,
}

#[derive(Debug)]
pub enum RemoteExceptionKind {
    /// Decoded with a registered factory.
    User(Box<dyn UserException>),
    /// No slice had a factory.
    Unknown { type_id: String },
}

/// Exception decoded from a reply.
#[derive(Debug)]
pub struct RemoteException {
    pub kind: RemoteExceptionKind,
    /// Message text (2.0 only).
    pub message: Option<String>,
    /// Raising site (2.0 only).
    pub origin: Option<RemoteExceptionOrigin>,
    /// Slices as decoded, base-first.
    pub slices: Vec<Slice>,
}

impl RemoteException {
    /// Most-derived type id seen on the wire.
    pub fn type_id(&self) -> &str {
        match &self.kind {
            RemoteExceptionKind::User(ex) => {
                // Prefer the wire's most-derived id over the factory's.
                self.slices
                    .last()
                    .and_then(|s| s.type_id.as_ref())
                    .and_then(|t| t.as_str())
                    .unwrap_or_else(|| ex.ice_id())
            }
            RemoteExceptionKind::Unknown { type_id } => type_id,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self.kind, RemoteExceptionKind::Unknown { .. })
    }

    pub fn downcast_ref<T: UserException>(&self) -> Option<&T> {
        match &self.kind {
            RemoteExceptionKind::User(ex) => (**ex).as_any().downcast_ref::<T>(),
            RemoteExceptionKind::Unknown { .. } => None,
        }
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_id())?;
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            write!(f, ": {}", message)?;
        }
        if let Some(origin) = &self.origin {
            write!(
                f,
                " (raised by `{}` operation `{}`)",
                origin.identity, origin.operation
            )?;
        }
        Ok(())
    }
}
