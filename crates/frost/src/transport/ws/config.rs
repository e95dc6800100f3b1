// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket transport configuration.

use crate::config::{Properties, MESSAGE_SIZE_MAX};

/// Subprotocol negotiated during the upgrade handshake.
pub const DEFAULT_PROTOCOL: &str = "frost.rpc";

/// WebSocket transport configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsConfig {
    /// `Sec-WebSocket-Protocol` offered by clients and required by servers.
    pub protocol: String,

    /// Request path sent by clients.
    pub resource: String,

    /// `Host` header sent by clients. Empty means the peer address.
    pub host: String,

    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,

    /// Largest accepted handshake header block in bytes.
    pub max_header_size: usize,

    /// Bytes read from the stream per call.
    pub read_chunk_size: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            protocol: DEFAULT_PROTOCOL.to_owned(),
            resource: "/".to_owned(),
            host: String::new(),
            max_frame_size: 1024 * 1024,
            max_header_size: 16 * 1024,
            read_chunk_size: 16 * 1024,
        }
    }
}

impl WsConfig {
    /// Builder: set subprotocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Builder: set request path
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into();
        self
    }

    /// Builder: set Host header
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Builder: set maximum frame payload
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Read `Frost.MessageSizeMax` (KiB) and `Frost.WS.Protocol`.
    pub fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        Self {
            protocol: props.get_with_default("Frost.WS.Protocol", &defaults.protocol),
            resource: props.get_with_default("Frost.WS.Resource", &defaults.resource),
            max_frame_size: if props.get(MESSAGE_SIZE_MAX).is_some() {
                props.message_size_max()
            } else {
                defaults.max_frame_size
            },
            ..defaults
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.protocol.is_empty() || self.protocol.contains([',', ' ']) {
            return Err("protocol must be a single non-empty token");
        }
        if !self.resource.starts_with('/') {
            return Err("resource must start with '/'");
        }
        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0");
        }
        if self.max_header_size < 128 {
            return Err("max_header_size must be >= 128");
        }
        if self.read_chunk_size == 0 {
            return Err("read_chunk_size must be > 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(WsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_from_properties() {
        let props = Properties::parse("Frost.MessageSizeMax = 4\nFrost.WS.Resource = /rpc\n")
            .expect("valid properties");
        let config = WsConfig::from_properties(&props);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.resource, "/rpc");
        assert_eq!(config.protocol, DEFAULT_PROTOCOL);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(WsConfig::default().with_protocol("a, b").validate().is_err());
        assert!(WsConfig::default().with_resource("rpc").validate().is_err());
        assert!(WsConfig::default().with_max_frame_size(0).validate().is_err());
    }
}
