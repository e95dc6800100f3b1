// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timestamped adapter-endpoint and well-known-object caches.

use std::collections::HashMap;
use std::time::Instant;

use super::reference::{Endpoint, Identity, Reference};
use super::CacheTtl;

#[derive(Clone, Debug)]
struct Entry<T> {
    value: T,
    inserted: Instant,
}

/// A cached value and whether it is still within the caller's TTL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheHit<T> {
    pub value: T,
    pub fresh: bool,
}

/// Locator cache maps.
///
/// Entries are replaced on update, never mutated in place, and copied out on
/// lookup. Not synchronized; `LocatorInfo` guards it with its own mutex.
#[derive(Debug, Default)]
pub struct LocatorTable {
    adapters: HashMap<String, Entry<Vec<Endpoint>>>,
    objects: HashMap<Identity, Entry<Reference>>,
}

impl LocatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached endpoints for `adapter_id`. Always `None` when caching is disabled.
    pub fn get_adapter_endpoints(
        &self,
        adapter_id: &str,
        ttl: CacheTtl,
        now: Instant,
    ) -> Option<CacheHit<Vec<Endpoint>>> {
        if ttl == CacheTtl::Disabled {
            return None;
        }
        self.adapters.get(adapter_id).map(|entry| CacheHit {
            value: entry.value.clone(),
            fresh: ttl.is_fresh(now.saturating_duration_since(entry.inserted)),
        })
    }

    pub fn add_adapter_endpoints(&mut self, adapter_id: &str, endpoints: Vec<Endpoint>, now: Instant) {
        self.adapters.insert(
            adapter_id.to_owned(),
            Entry {
                value: endpoints,
                inserted: now,
            },
        );
    }

    pub fn remove_adapter_endpoints(&mut self, adapter_id: &str) -> Option<Vec<Endpoint>> {
        self.adapters.remove(adapter_id).map(|entry| entry.value)
    }

    /// Cached reference for a well-known identity.
    pub fn get_object_reference(
        &self,
        identity: &Identity,
        ttl: CacheTtl,
        now: Instant,
    ) -> Option<CacheHit<Reference>> {
        if ttl == CacheTtl::Disabled {
            return None;
        }
        self.objects.get(identity).map(|entry| CacheHit {
            value: entry.value.clone(),
            fresh: ttl.is_fresh(now.saturating_duration_since(entry.inserted)),
        })
    }

    pub fn add_object_reference(&mut self, identity: &Identity, reference: Reference, now: Instant) {
        self.objects.insert(
            identity.clone(),
            Entry {
                value: reference,
                inserted: now,
            },
        );
    }

    pub fn remove_object_reference(&mut self, identity: &Identity) -> Option<Reference> {
        self.objects.remove(identity).map(|entry| entry.value)
    }

    pub fn clear(&mut self) {
        self.adapters.clear();
        self.objects.clear();
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}
