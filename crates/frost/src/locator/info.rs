// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Caching, coalescing resolver in front of a remote [`Locator`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::reference::{Endpoint, Identity, Reference, ReferenceKind};
use super::table::LocatorTable;
use super::{CacheTtl, Clock, LocatorCacheConfig, SystemClock};
use crate::encoding::EncodingVersion;
use crate::error::{Error, NotRegisteredKind, Result};

/// Completion of one remote lookup: `Ok(None)` means not found.
pub type FindCallback = Box<dyn FnOnce(Result<Option<Reference>>) + Send>;

/// Remote locator service.
///
/// Each call must complete its callback exactly once, on any thread.
pub trait Locator: Send + Sync {
    fn find_adapter_by_id(&self, adapter_id: &str, done: FindCallback);
    fn find_object_by_id(&self, identity: &Identity, done: FindCallback);
}

/// Endpoints a reference resolved to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub endpoints: Vec<Endpoint>,
    /// Served from the cache without a remote lookup.
    pub cached: bool,
}

pub type ResolveCallback = Box<dyn FnOnce(Result<Resolution>) + Send>;

type ObjectWaiter = Box<dyn FnOnce(Result<Reference>) + Send>;

#[derive(Default)]
struct State {
    table: LocatorTable,
    adapter_requests: HashMap<String, Vec<ResolveCallback>>,
    object_requests: HashMap<Identity, Vec<ObjectWaiter>>,
}

struct Inner {
    locator: Arc<dyn Locator>,
    clock: Arc<dyn Clock>,
    config: LocatorCacheConfig,
    state: Mutex<State>,
    adapter_lookups: AtomicU64,
    object_lookups: AtomicU64,
}

/// Resolver for indirect references.
///
/// Cheap to clone; clones share the cache. Callbacks run either on the
/// calling thread (cache hit, direct reference) or on whichever thread
/// completes the remote lookup, never while the cache lock is held.
#[derive(Clone)]
pub struct LocatorInfo {
    inner: Arc<Inner>,
}

impl LocatorInfo {
    pub fn new(locator: Arc<dyn Locator>, config: LocatorCacheConfig) -> Self {
        Self::with_clock(locator, config, Arc::new(SystemClock))
    }

    pub fn with_clock(locator: Arc<dyn Locator>, config: LocatorCacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                locator,
                clock,
                config,
                state: Mutex::new(State::default()),
                adapter_lookups: AtomicU64::new(0),
                object_lookups: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &LocatorCacheConfig {
        &self.inner.config
    }

    /// Resolve `reference` to endpoints.
    ///
    /// Direct references complete immediately with their own endpoints.
    /// Indirect ones are served from the cache when fresh for `ttl`;
    /// otherwise the caller joins the in-flight lookup for the same key or
    /// starts one.
    pub fn resolve(&self, reference: &Reference, ttl: CacheTtl, on_complete: ResolveCallback) {
        match &reference.kind {
            ReferenceKind::Direct(endpoints) => on_complete(Ok(Resolution {
                endpoints: endpoints.clone(),
                cached: false,
            })),
            ReferenceKind::Indirect { adapter_id } if !adapter_id.is_empty() => {
                self.inner.resolve_adapter(adapter_id, ttl, on_complete);
            }
            ReferenceKind::Indirect { .. } => {
                self.inner
                    .resolve_object(reference.identity.clone(), reference.encoding, ttl, on_complete);
            }
        }
    }

    /// [`resolve`](Self::resolve) with the configured default TTL.
    pub fn resolve_with_default_ttl(&self, reference: &Reference, on_complete: ResolveCallback) {
        self.resolve(reference, self.inner.config.default_ttl, on_complete);
    }

    /// Drop the cache entry behind `reference`.
    ///
    /// For a well-known reference that resolved to an adapter id, the
    /// adapter's entry is dropped too.
    pub fn invalidate(&self, reference: &Reference) {
        let mut state = self.inner.state.lock();
        match &reference.kind {
            ReferenceKind::Direct(_) => {}
            ReferenceKind::Indirect { adapter_id } if !adapter_id.is_empty() => {
                if state.table.remove_adapter_endpoints(adapter_id).is_some() {
                    log::debug!("[locator] removed endpoints of adapter `{}` from the cache", adapter_id);
                }
            }
            ReferenceKind::Indirect { .. } => {
                if let Some(resolved) = state.table.remove_object_reference(&reference.identity) {
                    log::debug!("[locator] removed well-known object `{}` from the cache", reference.identity);
                    if let Some(adapter_id) = resolved.adapter_id() {
                        if state.table.remove_adapter_endpoints(adapter_id).is_some() {
                            log::debug!(
                                "[locator] removed endpoints of adapter `{}` from the cache",
                                adapter_id
                            );
                        }
                    }
                }
            }
        }
    }

    pub fn clear_cache(&self) {
        self.inner.state.lock().table.clear();
    }

    /// Remote adapter lookups issued so far.
    pub fn adapter_lookups(&self) -> u64 {
        self.inner.adapter_lookups.load(Ordering::Relaxed)
    }

    /// Remote well-known object lookups issued so far.
    pub fn object_lookups(&self) -> u64 {
        self.inner.object_lookups.load(Ordering::Relaxed)
    }

    /// Number of cached (adapter, object) entries.
    pub fn cached_entries(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.table.adapter_count(), state.table.object_count())
    }
}

impl fmt::Debug for LocatorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocatorInfo")
            .field("config", &self.inner.config)
            .field("adapter_lookups", &self.adapter_lookups())
            .field("object_lookups", &self.object_lookups())
            .finish()
    }
}

impl Inner {
    fn resolve_adapter(self: &Arc<Self>, adapter_id: &str, ttl: CacheTtl, done: ResolveCallback) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(hit) = state.table.get_adapter_endpoints(adapter_id, ttl, now) {
            if hit.fresh || self.config.background_updates {
                let refresh = !hit.fresh && !state.adapter_requests.contains_key(adapter_id);
                if refresh {
                    state.adapter_requests.insert(adapter_id.to_owned(), Vec::new());
                }
                drop(state);
                if refresh {
                    log::debug!(
                        "[locator] serving stale endpoints of adapter `{}`, refreshing in background",
                        adapter_id
                    );
                    self.send_adapter_request(adapter_id);
                } else {
                    log::trace!("[locator] found endpoints of adapter `{}` in the cache", adapter_id);
                }
                done(Ok(Resolution {
                    endpoints: hit.value,
                    cached: true,
                }));
                return;
            }
        }

        let start = match state.adapter_requests.entry(adapter_id.to_owned()) {
            Entry::Occupied(mut pending) => {
                pending.get_mut().push(done);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![done]);
                true
            }
        };
        drop(state);
        if start {
            self.send_adapter_request(adapter_id);
        }
    }

    fn send_adapter_request(self: &Arc<Self>, adapter_id: &str) {
        self.adapter_lookups.fetch_add(1, Ordering::Relaxed);
        log::debug!("[locator] searching for adapter `{}`", adapter_id);
        let inner = Arc::clone(self);
        let id = adapter_id.to_owned();
        self.locator.find_adapter_by_id(
            adapter_id,
            Box::new(move |result| inner.adapter_request_done(&id, result)),
        );
    }

    fn adapter_request_done(&self, adapter_id: &str, result: Result<Option<Reference>>) {
        let outcome = match result {
            Ok(Some(reference)) => Ok(reference.endpoints().to_vec()),
            Ok(None) => Err(Error::not_registered(NotRegisteredKind::Adapter, adapter_id)),
            Err(e) => Err(e),
        };

        let waiters = {
            let mut state = self.state.lock();
            match &outcome {
                Ok(endpoints) if !endpoints.is_empty() => {
                    state
                        .table
                        .add_adapter_endpoints(adapter_id, endpoints.clone(), self.clock.now());
                }
                Err(e) if e.is_not_registered() => {
                    state.table.remove_adapter_endpoints(adapter_id);
                }
                _ => {}
            }
            state.adapter_requests.remove(adapter_id).unwrap_or_default()
        };

        match &outcome {
            Ok(endpoints) => log::debug!(
                "[locator] adapter `{}` resolved to {} endpoint(s), {} waiter(s)",
                adapter_id,
                endpoints.len(),
                waiters.len()
            ),
            Err(e) => log::debug!("[locator] lookup of adapter `{}` failed: {}", adapter_id, e),
        }
        for waiter in waiters {
            waiter(outcome.clone().map(|endpoints| Resolution {
                endpoints,
                cached: false,
            }));
        }
    }

    fn resolve_object(
        self: &Arc<Self>,
        identity: Identity,
        encoding: EncodingVersion,
        ttl: CacheTtl,
        done: ResolveCallback,
    ) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(hit) = state.table.get_object_reference(&identity, ttl, now) {
            if hit.fresh || self.config.background_updates {
                let refresh = !hit.fresh && !state.object_requests.contains_key(&identity);
                if refresh {
                    state.object_requests.insert(identity.clone(), Vec::new());
                }
                drop(state);
                if refresh {
                    log::debug!(
                        "[locator] serving stale well-known object `{}`, refreshing in background",
                        identity
                    );
                    self.send_object_request(&identity);
                }
                self.resolve_second_hop(identity, hit.value, encoding, ttl, true, done);
                return;
            }
        }

        let inner = Arc::clone(self);
        let id = identity.clone();
        let waiter: ObjectWaiter = Box::new(move |result: Result<Reference>| match result {
            Ok(reference) => inner.resolve_second_hop(id, reference, encoding, ttl, false, done),
            Err(e) => done(Err(e)),
        });
        let start = match state.object_requests.entry(identity.clone()) {
            Entry::Occupied(mut pending) => {
                pending.get_mut().push(waiter);
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![waiter]);
                true
            }
        };
        drop(state);
        if start {
            self.send_object_request(&identity);
        }
    }

    fn send_object_request(self: &Arc<Self>, identity: &Identity) {
        self.object_lookups.fetch_add(1, Ordering::Relaxed);
        log::debug!("[locator] searching for well-known object `{}`", identity);
        let inner = Arc::clone(self);
        let id = identity.clone();
        self.locator.find_object_by_id(
            identity,
            Box::new(move |result| inner.object_request_done(&id, result)),
        );
    }

    fn object_request_done(&self, identity: &Identity, result: Result<Option<Reference>>) {
        let outcome = match result {
            Ok(Some(reference)) => Ok(reference),
            Ok(None) => Err(Error::not_registered(NotRegisteredKind::Object, identity.to_string())),
            Err(e) => Err(e),
        };

        let waiters = {
            let mut state = self.state.lock();
            match &outcome {
                Ok(reference) if reference.adapter_id().is_some() || !reference.endpoints().is_empty() => {
                    state
                        .table
                        .add_object_reference(identity, reference.clone(), self.clock.now());
                }
                Err(e) if e.is_not_registered() => {
                    state.table.remove_object_reference(identity);
                }
                _ => {}
            }
            state.object_requests.remove(identity).unwrap_or_default()
        };

        match &outcome {
            Ok(reference) => log::debug!(
                "[locator] well-known object `{}` resolved to `{}`, {} waiter(s)",
                identity,
                reference,
                waiters.len()
            ),
            Err(e) => log::debug!("[locator] lookup of well-known object `{}` failed: {}", identity, e),
        }
        for waiter in waiters {
            waiter(outcome.clone());
        }
    }

    /// Turn the reference a well-known object resolved to into endpoints.
    fn resolve_second_hop(
        self: &Arc<Self>,
        identity: Identity,
        reference: Reference,
        requested: EncodingVersion,
        ttl: CacheTtl,
        cached: bool,
        done: ResolveCallback,
    ) {
        if reference.encoding.major != requested.major {
            log::debug!(
                "[locator] `{}` uses encoding {}, caller requested {}",
                reference,
                reference.encoding,
                requested
            );
            done(Ok(Resolution {
                endpoints: Vec::new(),
                cached,
            }));
            return;
        }
        match reference.kind {
            ReferenceKind::Direct(endpoints) => done(Ok(Resolution { endpoints, cached })),
            ReferenceKind::Indirect { adapter_id } if adapter_id.is_empty() => done(Ok(Resolution {
                endpoints: Vec::new(),
                cached,
            })),
            ReferenceKind::Indirect { adapter_id } => {
                let inner = Arc::clone(self);
                self.resolve_adapter(
                    &adapter_id,
                    ttl,
                    Box::new(move |result| {
                        let dead = match &result {
                            Ok(r) => r.endpoints.is_empty(),
                            Err(e) => e.is_not_registered(),
                        };
                        if dead {
                            log::debug!(
                                "[locator] dropping well-known object `{}`, adapter has no endpoints",
                                identity
                            );
                            inner.state.lock().table.remove_object_reference(&identity);
                        }
                        done(result.map(|r| Resolution {
                            endpoints: r.endpoints,
                            cached: cached && r.cached,
                        }))
                    }),
                )
            }
        }
    }
}
