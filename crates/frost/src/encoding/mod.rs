// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Binary encoding engine.
//!
//! Marshals primitives, encapsulations and polymorphic class/exception graphs
//! in two encoding versions:
//!
//! - **1.1**: every slice carries its own flags byte and (in the sliced
//!   format) its own type id, size and indirection table.
//! - **2.0**: the first slice lists every type id of the hierarchy up front
//!   (plus message and origin for exceptions); later slices carry only flags
//!   and size.
//!
//! # Wire Summary
//!
//! ```text
//! encapsulation : i32 size | u8 major | u8 minor | payload
//! size          : u8 (< 255) | 0xFF i32
//! reference     : size  (0 = null, 1 = inline instance, n >= 2 = instance #n)
//! slice         : flags | [type id] | [i32 size] | data | [tagged .. 0xFF] | [table]
//! ```
//!
//! Decoded instances live in a [`ValueGraph`] arena owned by the
//! encapsulation; class-typed fields hold [`ValueRef`] handles into it.

mod class_decoder;
mod class_encoder;
pub mod exception;
pub mod graph;
pub mod input;
pub mod output;
pub mod registry;
pub mod value;

use std::fmt;

use crate::config::{Properties, CLASS_GRAPH_DEPTH_MAX};

pub use exception::{RemoteException, RemoteExceptionKind, RemoteExceptionOrigin, UserException};
pub use graph::{InstanceRecord, Slice, SliceFlags, TypeIdentifier, ValueGraph, ValueRef};
pub use input::InputStream;
pub use output::OutputStream;
pub use registry::{ExceptionFactory, TypeRegistry, ValueFactory};
pub use value::{AsAny, UnknownSlicedValue, Value, OBJECT_TYPE_ID};

/// Encoding version carried by every encapsulation header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EncodingVersion {
    pub major: u8,
    pub minor: u8,
}

/// Legacy class format: per-slice type ids.
pub const ENCODING_1_1: EncodingVersion = EncodingVersion { major: 1, minor: 1 };

/// Current class format: all type ids in the first slice.
pub const ENCODING_2_0: EncodingVersion = EncodingVersion { major: 2, minor: 0 };

impl EncodingVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    pub fn is_supported(&self) -> bool {
        *self == ENCODING_1_1 || *self == ENCODING_2_0
    }

    /// `true` for the 1.1 per-slice format.
    pub fn is_legacy(&self) -> bool {
        *self == ENCODING_1_1
    }
}

impl Default for EncodingVersion {
    fn default() -> Self {
        ENCODING_1_1
    }
}

impl fmt::Display for EncodingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Class and exception encoding format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FormatType {
    /// Smallest encoding; receivers must know every type.
    #[default]
    Compact,
    /// Slice sizes and per-slice indirection tables so receivers can skip
    /// unknown derived slices.
    Sliced,
}

/// Encoding of a tagged member's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TagFormat {
    /// Fixed 1 byte.
    F1 = 0,
    /// Fixed 2 bytes.
    F2 = 1,
    /// Fixed 4 bytes.
    F4 = 2,
    /// Fixed 8 bytes.
    F8 = 3,
    /// A single size.
    Size = 4,
    /// Variable length with its own size prefix.
    VSize = 5,
    /// Variable length with an i32 size prefix.
    FSize = 6,
    /// A class instance reference.
    Class = 7,
}

impl TagFormat {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Self::F1,
            1 => Self::F2,
            2 => Self::F4,
            3 => Self::F8,
            4 => Self::Size,
            5 => Self::VSize,
            6 => Self::FSize,
            _ => Self::Class,
        }
    }
}

/// Terminates the tagged-member region of a slice.
pub const TAG_END_MARKER: u8 = 0xFF;

/// Encapsulation header length: i32 size + major + minor.
pub const ENCAPSULATION_HEADER_SIZE: usize = 6;

/// Encoding limits and defaults.
#[derive(Clone, Debug)]
pub struct EncodingConfig {
    /// Maximum nesting of class instances in one decode.
    pub class_graph_depth_max: usize,
    /// Encoding used by new output streams.
    pub default_encoding: EncodingVersion,
    /// Format used by new output streams.
    pub default_format: FormatType,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            class_graph_depth_max: 100,
            default_encoding: ENCODING_1_1,
            default_format: FormatType::Compact,
        }
    }
}

impl EncodingConfig {
    /// Builder: set maximum class graph depth
    pub fn with_class_graph_depth_max(mut self, depth: usize) -> Self {
        self.class_graph_depth_max = depth;
        self
    }

    /// Builder: set default encoding
    pub fn with_encoding(mut self, encoding: EncodingVersion) -> Self {
        self.default_encoding = encoding;
        self
    }

    /// Builder: set default format
    pub fn with_format(mut self, format: FormatType) -> Self {
        self.default_format = format;
        self
    }

    /// Reads `Frost.ClassGraphDepthMax` and `Frost.Default.EncodingVersion`.
    pub fn from_properties(props: &Properties) -> Self {
        let defaults = Self::default();
        let depth = props.get_int_with_default(CLASS_GRAPH_DEPTH_MAX, defaults.class_graph_depth_max as i64);
        let encoding = match props.get("Frost.Default.EncodingVersion").as_deref() {
            Some("2.0") => ENCODING_2_0,
            _ => defaults.default_encoding,
        };
        let format = match props.get("Frost.Default.SlicedFormat").as_deref() {
            Some("1") => FormatType::Sliced,
            _ => defaults.default_format,
        };
        Self {
            // Values below 1 fall back to the default rather than disabling classes.
            class_graph_depth_max: if depth < 1 {
                defaults.class_graph_depth_max
            } else {
                depth as usize
            },
            default_encoding: encoding,
            default_format: format,
        }
    }

    /// Validate configuration, returning error message if invalid.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.class_graph_depth_max == 0 {
            return Err("class_graph_depth_max must be > 0");
        }
        if !self.default_encoding.is_supported() {
            return Err("default_encoding must be 1.1 or 2.0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_versions() {
        assert!(ENCODING_1_1.is_supported());
        assert!(ENCODING_2_0.is_supported());
        assert!(!EncodingVersion::new(1, 0).is_supported());
        assert!(ENCODING_1_1.is_legacy());
        assert!(!ENCODING_2_0.is_legacy());
        assert_eq!(ENCODING_2_0.to_string(), "2.0");
    }

    #[test]
    fn test_config_from_properties() {
        let props = Properties::new();
        props.set("Frost.ClassGraphDepthMax", "7");
        props.set("Frost.Default.EncodingVersion", "2.0");
        let config = EncodingConfig::from_properties(&props);
        assert_eq!(config.class_graph_depth_max, 7);
        assert_eq!(config.default_encoding, ENCODING_2_0);
        assert!(config.validate().is_ok());

        props.set("Frost.ClassGraphDepthMax", "-3");
        assert_eq!(EncodingConfig::from_properties(&props).class_graph_depth_max, 100);
    }

    #[test]
    fn test_tag_format_bits() {
        assert_eq!(TagFormat::from_bits(2), TagFormat::F4);
        assert_eq!(TagFormat::from_bits(0x0F), TagFormat::Class);
    }
}
