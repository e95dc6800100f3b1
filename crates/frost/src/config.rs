// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime configuration.
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: property names and defaults below
//! - **Level 2 (Dynamic)**: [`Properties`], a concurrent `key = value` store
//!   that each subsystem reads into its own typed config struct
//!   (`EncodingConfig`, `LocatorCacheConfig`, `ThreadPoolConfig`, `WsConfig`)
//!
//! # Example
//!
//! ```ignore
//! use frost::config::Properties;
//!
//! let props = Properties::parse("Frost.ThreadPool.Server.Size = 4\n")?;
//! let pool = ThreadPoolConfig::from_properties(&props, "Frost.ThreadPool.Server")?;
//! ```

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{Error, Result};

// =======================================================================
// Property Names and Defaults
// =======================================================================

/// Maximum class graph nesting accepted by the decoder.
pub const CLASS_GRAPH_DEPTH_MAX: &str = "Frost.ClassGraphDepthMax";

/// Default locator cache TTL in seconds (-1 = infinite, 0 = disabled).
pub const DEFAULT_LOCATOR_CACHE_TIMEOUT: &str = "Frost.Default.LocatorCacheTimeout";

/// Serve expired entries while refreshing in the background (0/1).
pub const BACKGROUND_LOCATOR_CACHE_UPDATES: &str = "Frost.BackgroundLocatorCacheUpdates";

/// Maximum message (and WebSocket frame) size in KiB.
pub const MESSAGE_SIZE_MAX: &str = "Frost.MessageSizeMax";

/// Default message size limit: 1 MiB.
pub const DEFAULT_MESSAGE_SIZE_MAX_KB: i64 = 1024;

// =======================================================================
// Properties
// =======================================================================

/// Concurrent property set.
///
/// Cloning is cheap (shared `Arc`); every clone sees the same entries.
#[derive(Clone, Default)]
pub struct Properties {
    entries: Arc<DashMap<Arc<str>, Arc<str>>>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key = value` lines. `#` starts a comment; blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        let props = Self::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = match raw.find('#') {
                Some(pos) => &raw[..pos],
                None => raw,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::config(format!(
                    "line {}: expected `key = value`, got `{}`",
                    lineno + 1,
                    line
                )));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::config(format!("line {}: empty key", lineno + 1)));
            }
            props.set(key, value.trim());
        }
        Ok(props)
    }

    /// Load and parse a property file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let props = Self::parse(&text)?;
        log::debug!(
            "[config] loaded {} properties from {}",
            props.len(),
            path.display()
        );
        Ok(props)
    }

    /// Set a property. An empty value removes it.
    pub fn set(&self, key: &str, value: &str) {
        if value.is_empty() {
            self.entries.remove(key);
        } else {
            self.entries.insert(Arc::from(key), Arc::from(value));
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        self.entries.get(key).map(|v| Arc::clone(&v))
    }

    #[must_use]
    pub fn get_with_default(&self, key: &str, default: &str) -> String {
        self.get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| default.to_owned())
    }

    /// Integer property; malformed values log a warning and yield `default`.
    #[must_use]
    pub fn get_int_with_default(&self, key: &str, default: i64) -> i64 {
        match self.get(key) {
            Some(v) => v.parse().unwrap_or_else(|_| {
                log::warn!(
                    "[config] property `{}` expects an integer, got `{}`; using {}",
                    key,
                    v,
                    default
                );
                default
            }),
            None => default,
        }
    }

    /// Boolean property: any non-zero integer is `true`.
    #[must_use]
    pub fn get_bool_with_default(&self, key: &str, default: bool) -> bool {
        self.get_int_with_default(key, i64::from(default)) != 0
    }

    /// Comma or whitespace separated list.
    #[must_use]
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries whose key starts with `prefix`, sorted by key.
    #[must_use]
    pub fn search_prefix(&self, prefix: &str) -> Vec<(Arc<str>, Arc<str>)> {
        let mut found: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| (Arc::clone(entry.key()), Arc::clone(entry.value())))
            .collect();
        found.sort();
        found
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Frost.MessageSizeMax` converted to bytes. Zero or negative means unlimited.
    #[must_use]
    pub fn message_size_max(&self) -> usize {
        let kb = self.get_int_with_default(MESSAGE_SIZE_MAX, DEFAULT_MESSAGE_SIZE_MAX_KB);
        if kb < 1 {
            usize::MAX
        } else {
            (kb as usize).saturating_mul(1024)
        }
    }
}

impl std::fmt::Debug for Properties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.search_prefix("").into_iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let props = Properties::parse(
            "# pool\nFrost.ThreadPool.Server.Size = 4\n\n  Frost.Trace = 1 # inline\n",
        )
        .expect("valid text");
        assert_eq!(props.len(), 2);
        assert_eq!(props.get_int_with_default("Frost.ThreadPool.Server.Size", 1), 4);
        assert!(props.get_bool_with_default("Frost.Trace", false));
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        let err = Properties::parse("Frost.Broken\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let props = Properties::new();
        props.set("Frost.Size", "abc");
        assert_eq!(props.get_int_with_default("Frost.Size", 9), 9);
        assert_eq!(props.get_with_default("Frost.Missing", "x"), "x");
        props.set("Frost.Size", "");
        assert!(props.get("Frost.Size").is_none());
    }

    #[test]
    fn test_search_prefix_sorted() {
        let props = Properties::new();
        props.set("Frost.ThreadPool.B.Size", "2");
        props.set("Frost.ThreadPool.A.Size", "1");
        props.set("Other", "3");
        let found = props.search_prefix("Frost.ThreadPool.");
        assert_eq!(found.len(), 2);
        assert_eq!(&*found[0].0, "Frost.ThreadPool.A.Size");
    }

    #[test]
    fn test_list_and_message_size() {
        let props = Properties::new();
        props.set("Frost.Protocols", "frost.rpc, chat  other");
        assert_eq!(props.get_list("Frost.Protocols"), vec!["frost.rpc", "chat", "other"]);
        assert_eq!(props.message_size_max(), 1024 * 1024);
        props.set(MESSAGE_SIZE_MAX, "0");
        assert_eq!(props.message_size_max(), usize::MAX);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "Frost.Default.LocatorCacheTimeout = 5").expect("write");
        let props = Properties::load(file.path()).expect("load");
        assert_eq!(props.get_int_with_default(DEFAULT_LOCATOR_CACHE_TIMEOUT, -1), 5);
    }
}
