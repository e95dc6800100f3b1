// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Object identities, endpoints and references.

use std::fmt;

use crate::encoding::EncodingVersion;
use crate::error::{Error, Result};

/// Object identity: `category/name`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub name: String,
    pub category: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
        }
    }

    /// Parse `name` or `category/name`.
    pub fn parse(s: &str) -> Result<Self> {
        let (category, name) = match s.split_once('/') {
            Some((category, name)) => (category, name),
            None => ("", s),
        };
        if name.is_empty() {
            return Err(Error::config(format!("identity `{}` has an empty name", s)));
        }
        Ok(Self::new(name, category))
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.category.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.category, self.name)
        }
    }
}

/// Transport address of a server.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    /// Transport name (`tcp`, `ws`).
    pub transport: String,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: transport.into(),
            host: host.into(),
            port,
        }
    }

    pub fn ws(host: impl Into<String>, port: u16) -> Self {
        Self::new("ws", host, port)
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new("tcp", host, port)
    }

    /// `host:port`, suitable for socket address resolution.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -h {} -p {}", self.transport, self.host, self.port)
    }
}

/// How a reference reaches its object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Fixed endpoints.
    Direct(Vec<Endpoint>),
    /// Resolved through the locator. An empty adapter id means the object is
    /// well-known and resolved by identity.
    Indirect { adapter_id: String },
}

/// Addressing information for one remote object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reference {
    pub identity: Identity,
    pub facet: String,
    pub encoding: EncodingVersion,
    pub kind: ReferenceKind,
}

impl Reference {
    pub fn direct(identity: Identity, endpoints: Vec<Endpoint>) -> Self {
        Self {
            identity,
            facet: String::new(),
            encoding: EncodingVersion::default(),
            kind: ReferenceKind::Direct(endpoints),
        }
    }

    pub fn indirect(identity: Identity, adapter_id: impl Into<String>) -> Self {
        Self {
            identity,
            facet: String::new(),
            encoding: EncodingVersion::default(),
            kind: ReferenceKind::Indirect {
                adapter_id: adapter_id.into(),
            },
        }
    }

    pub fn well_known(identity: Identity) -> Self {
        Self::indirect(identity, "")
    }

    /// Builder: set facet
    pub fn with_facet(mut self, facet: impl Into<String>) -> Self {
        self.facet = facet.into();
        self
    }

    /// Builder: set encoding
    pub fn with_encoding(mut self, encoding: EncodingVersion) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn is_indirect(&self) -> bool {
        matches!(self.kind, ReferenceKind::Indirect { .. })
    }

    pub fn is_well_known(&self) -> bool {
        matches!(&self.kind, ReferenceKind::Indirect { adapter_id } if adapter_id.is_empty())
    }

    /// Adapter id of an indirect, non-well-known reference.
    pub fn adapter_id(&self) -> Option<&str> {
        match &self.kind {
            ReferenceKind::Indirect { adapter_id } if !adapter_id.is_empty() => Some(adapter_id),
            _ => None,
        }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        match &self.kind {
            ReferenceKind::Direct(endpoints) => endpoints,
            ReferenceKind::Indirect { .. } => &[],
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identity)?;
        if !self.facet.is_empty() {
            write!(f, " -f {}", self.facet)?;
        }
        write!(f, " -e {}", self.encoding)?;
        match &self.kind {
            ReferenceKind::Direct(endpoints) => {
                for endpoint in endpoints {
                    write!(f, ":{}", endpoint)?;
                }
                Ok(())
            }
            ReferenceKind::Indirect { adapter_id } if adapter_id.is_empty() => Ok(()),
            ReferenceKind::Indirect { adapter_id } => write!(f, " @ {}", adapter_id),
        }
    }
}
