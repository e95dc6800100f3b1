// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Indirect reference resolution through a locator service.
//!
//! # Architecture
//!
//! ```text
//! resolve(reference)
//!     |
//!     +-- direct ................ endpoints returned as-is
//!     +-- @ adapter-id .......... LocatorTable (adapter) --miss--> Locator::find_adapter_by_id
//!     +-- well-known identity ... LocatorTable (object)  --miss--> Locator::find_object_by_id
//!                                     |
//!                                     +-- resolved to @ adapter-id: second hop through the adapter cache
//! ```
//!
//! At most one remote lookup is in flight per adapter id or identity; every
//! caller arriving while it runs is queued on it and receives the same result.

pub mod info;
pub mod reference;
pub mod table;

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{Properties, BACKGROUND_LOCATOR_CACHE_UPDATES, DEFAULT_LOCATOR_CACHE_TIMEOUT};

pub use info::{FindCallback, Locator, LocatorInfo, Resolution, ResolveCallback};
pub use reference::{Endpoint, Identity, Reference, ReferenceKind};
pub use table::{CacheHit, LocatorTable};

// =======================================================================
// Cache TTL
// =======================================================================

/// Maximum age of a cached resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheTtl {
    /// Entries never expire.
    Infinite,
    /// Caching disabled: every resolution queries the locator.
    Disabled,
    /// Entries older than this are stale.
    Limited(Duration),
}

impl CacheTtl {
    /// Negative seconds mean infinite, zero disables caching.
    pub fn from_secs(secs: i64) -> Self {
        match secs {
            s if s < 0 => Self::Infinite,
            0 => Self::Disabled,
            s => Self::Limited(Duration::from_secs(s.unsigned_abs())),
        }
    }

    /// Whether an entry of this age may still be served.
    pub fn is_fresh(self, age: Duration) -> bool {
        match self {
            Self::Infinite => true,
            Self::Disabled => false,
            Self::Limited(ttl) => age <= ttl,
        }
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self::Infinite
    }
}

// =======================================================================
// Clock
// =======================================================================

/// Time source for cache timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Monotonic system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }
}

// =======================================================================
// Configuration
// =======================================================================

/// Locator cache configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocatorCacheConfig {
    /// TTL applied when the caller does not pass one.
    pub default_ttl: CacheTtl,
    /// Serve stale entries immediately and refresh them in the background.
    pub background_updates: bool,
}

impl Default for LocatorCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: CacheTtl::Infinite,
            background_updates: false,
        }
    }
}

impl LocatorCacheConfig {
    /// Builder: set default TTL
    pub fn with_default_ttl(mut self, ttl: CacheTtl) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Builder: enable background refresh
    pub fn with_background_updates(mut self, enabled: bool) -> Self {
        self.background_updates = enabled;
        self
    }

    pub fn from_properties(props: &Properties) -> Self {
        Self {
            default_ttl: CacheTtl::from_secs(props.get_int_with_default(DEFAULT_LOCATOR_CACHE_TIMEOUT, -1)),
            background_updates: props.get_bool_with_default(BACKGROUND_LOCATOR_CACHE_UPDATES, false),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.background_updates && self.default_ttl == CacheTtl::Infinite {
            return Err("background_updates requires a finite default_ttl");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_from_secs() {
        assert_eq!(CacheTtl::from_secs(-1), CacheTtl::Infinite);
        assert_eq!(CacheTtl::from_secs(0), CacheTtl::Disabled);
        assert_eq!(CacheTtl::from_secs(5), CacheTtl::Limited(Duration::from_secs(5)));
        assert!(!CacheTtl::Disabled.is_fresh(Duration::ZERO));
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - t0, Duration::from_secs(3));
    }

    #[test]
    fn test_config_from_properties() {
        let props = Properties::new();
        assert_eq!(LocatorCacheConfig::from_properties(&props), LocatorCacheConfig::default());

        props.set(DEFAULT_LOCATOR_CACHE_TIMEOUT, "30");
        props.set(BACKGROUND_LOCATOR_CACHE_UPDATES, "1");
        let config = LocatorCacheConfig::from_properties(&props);
        assert_eq!(config.default_ttl, CacheTtl::Limited(Duration::from_secs(30)));
        assert!(config.background_updates);
        assert!(config.validate().is_ok());

        let bad = LocatorCacheConfig::default().with_background_updates(true);
        assert!(bad.validate().is_err());
    }
}
