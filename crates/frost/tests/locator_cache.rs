// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Locator cache under concurrent callers, with a locator answering from
//! its own threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use frost::locator::{
    CacheTtl, Endpoint, FindCallback, Identity, Locator, LocatorCacheConfig, LocatorInfo,
    ManualClock, Reference, Resolution,
};
use frost::Result;

const LOOKUP_DELAY: Duration = Duration::from_millis(100);
const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Answers every lookup from a fresh thread after [`LOOKUP_DELAY`].
#[derive(Default)]
struct ThreadedLocator {
    adapters: Mutex<HashMap<String, Reference>>,
    objects: Mutex<HashMap<Identity, Reference>>,
    requests: AtomicUsize,
}

impl ThreadedLocator {
    fn answer_later(&self, result: Option<Reference>, done: FindCallback) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        thread::spawn(move || {
            thread::sleep(LOOKUP_DELAY);
            done(Ok(result));
        });
    }
}

impl Locator for ThreadedLocator {
    fn find_adapter_by_id(&self, adapter_id: &str, done: FindCallback) {
        let result = self.adapters.lock().get(adapter_id).cloned();
        self.answer_later(result, done);
    }

    fn find_object_by_id(&self, identity: &Identity, done: FindCallback) {
        let result = self.objects.lock().get(identity).cloned();
        self.answer_later(result, done);
    }
}

fn endpoints() -> Vec<Endpoint> {
    vec![Endpoint::ws("10.0.0.7", 4061), Endpoint::tcp("10.0.0.7", 4062)]
}

fn locator_with_adapter() -> Arc<ThreadedLocator> {
    let locator = Arc::new(ThreadedLocator::default());
    locator.adapters.lock().insert(
        "Catalog".to_owned(),
        Reference::direct(Identity::new("catalog", ""), endpoints()),
    );
    locator
}

fn sender(tx: &Sender<Result<Resolution>>) -> Box<dyn FnOnce(Result<Resolution>) + Send> {
    let tx = tx.clone();
    Box::new(move |result| {
        let _ = tx.send(result);
    })
}

fn collect(rx: &Receiver<Result<Resolution>>, count: usize) -> Vec<Result<Resolution>> {
    (0..count)
        .map(|i| rx.recv_timeout(WAIT).unwrap_or_else(|_| panic!("resolution {} timed out", i)))
        .collect()
}

/// Run `callers` threads that resolve `reference` at the same moment.
fn resolve_concurrently(info: &LocatorInfo, reference: &Reference, callers: usize) -> Vec<Result<Resolution>> {
    let (tx, rx) = unbounded();
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let info = info.clone();
            let reference = reference.clone();
            let barrier = Arc::clone(&barrier);
            let done = sender(&tx);
            thread::spawn(move || {
                barrier.wait();
                info.resolve_with_default_ttl(&reference, done);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("caller thread");
    }
    collect(&rx, callers)
}

#[test]
fn test_concurrent_callers_share_one_adapter_lookup() {
    init_logging();
    let locator = locator_with_adapter();
    let info = LocatorInfo::new(locator.clone(), LocatorCacheConfig::default());
    let reference = Reference::indirect(Identity::new("catalog", ""), "Catalog");

    let results = resolve_concurrently(&info, &reference, 16);
    assert_eq!(results.len(), 16);
    for result in results {
        assert_eq!(result.expect("resolved").endpoints, endpoints());
    }
    assert_eq!(info.adapter_lookups(), 1);
    assert_eq!(locator.requests.load(Ordering::SeqCst), 1);
    assert_eq!(info.cached_entries(), (1, 0));

    // Later callers are answered from the cache on their own thread.
    let (tx, rx) = unbounded();
    info.resolve_with_default_ttl(&reference, sender(&tx));
    let cached = rx.try_recv().expect("synchronous cache hit").expect("resolved");
    assert!(cached.cached);
    assert_eq!(locator.requests.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_well_known_resolution() {
    init_logging();
    let locator = locator_with_adapter();
    locator.objects.lock().insert(
        Identity::new("catalog", "shop"),
        Reference::indirect(Identity::new("catalog", "shop"), "Catalog"),
    );
    let info = LocatorInfo::new(locator.clone(), LocatorCacheConfig::default());
    let reference = Reference::well_known(Identity::new("catalog", "shop"));

    let results = resolve_concurrently(&info, &reference, 8);
    for result in results {
        assert_eq!(result.expect("resolved").endpoints, endpoints());
    }
    assert_eq!(info.object_lookups(), 1);
    assert_eq!(info.adapter_lookups(), 1);
    assert_eq!(info.cached_entries(), (1, 1));

    // Invalidating the well-known entry drops the adapter entry behind it.
    info.invalidate(&reference);
    assert_eq!(info.cached_entries(), (0, 0));
    let results = resolve_concurrently(&info, &reference, 4);
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(info.object_lookups(), 2);
    assert_eq!(info.adapter_lookups(), 2);
}

#[test]
fn test_unknown_adapter_fails_every_waiter_and_is_not_cached() {
    init_logging();
    let locator = Arc::new(ThreadedLocator::default());
    let info = LocatorInfo::new(locator.clone(), LocatorCacheConfig::default());
    let reference = Reference::indirect(Identity::new("ghost", ""), "Nowhere");

    let results = resolve_concurrently(&info, &reference, 6);
    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_not_registered(), "{}", err);
    }
    assert_eq!(info.adapter_lookups(), 1);
    assert_eq!(info.cached_entries(), (0, 0));

    // A failure is not cached; the next caller asks again.
    let (tx, rx) = unbounded();
    info.resolve_with_default_ttl(&reference, sender(&tx));
    assert!(collect(&rx, 1).remove(0).is_err());
    assert_eq!(info.adapter_lookups(), 2);
}

#[test]
fn test_expired_entry_triggers_new_lookup() {
    init_logging();
    let locator = locator_with_adapter();
    let clock = Arc::new(ManualClock::new());
    let config = LocatorCacheConfig::default().with_default_ttl(CacheTtl::Limited(Duration::from_secs(30)));
    let info = LocatorInfo::with_clock(locator.clone(), config, clock.clone());
    let reference = Reference::indirect(Identity::new("catalog", ""), "Catalog");

    let (tx, rx) = unbounded();
    info.resolve_with_default_ttl(&reference, sender(&tx));
    assert!(!collect(&rx, 1).remove(0).expect("resolved").cached);

    clock.advance(Duration::from_secs(10));
    info.resolve_with_default_ttl(&reference, sender(&tx));
    assert!(collect(&rx, 1).remove(0).expect("resolved").cached);
    assert_eq!(info.adapter_lookups(), 1);

    clock.advance(Duration::from_secs(60));
    info.resolve_with_default_ttl(&reference, sender(&tx));
    assert!(!collect(&rx, 1).remove(0).expect("resolved").cached);
    assert_eq!(info.adapter_lookups(), 2);

    // An infinite TTL accepts any cached entry.
    clock.advance(Duration::from_secs(3600));
    info.resolve(&reference, CacheTtl::Infinite, sender(&tx));
    assert!(collect(&rx, 1).remove(0).expect("resolved").cached);
    assert_eq!(info.adapter_lookups(), 2);
}

#[test]
fn test_background_refresh_answers_immediately() {
    init_logging();
    let locator = locator_with_adapter();
    let clock = Arc::new(ManualClock::new());
    let config = LocatorCacheConfig::default()
        .with_default_ttl(CacheTtl::Limited(Duration::from_secs(5)))
        .with_background_updates(true);
    assert!(config.validate().is_ok());
    let info = LocatorInfo::with_clock(locator.clone(), config, clock.clone());
    let reference = Reference::indirect(Identity::new("catalog", ""), "Catalog");

    let (tx, rx) = unbounded();
    info.resolve_with_default_ttl(&reference, sender(&tx));
    collect(&rx, 1).remove(0).expect("resolved");

    // Stale: served from the cache at once while one refresh runs.
    clock.advance(Duration::from_secs(10));
    for _ in 0..3 {
        info.resolve_with_default_ttl(&reference, sender(&tx));
        let stale = rx.try_recv().expect("answered synchronously").expect("resolved");
        assert!(stale.cached);
    }
    assert_eq!(info.adapter_lookups(), 2);

    // Once the refresh lands the entry is fresh again.
    assert_eq!(locator.requests.load(Ordering::SeqCst), 2);
    thread::sleep(LOOKUP_DELAY * 4);
    info.resolve_with_default_ttl(&reference, sender(&tx));
    assert!(rx.try_recv().expect("answered synchronously").expect("resolved").cached);
    assert_eq!(info.adapter_lookups(), 2);
}
