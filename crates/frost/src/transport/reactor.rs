// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Readiness reactor: turns mio socket events into pool completions.
//!
//! # Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      reactor thread                          |
//! |   mio::Poll (edge-triggered, READABLE | WRITABLE)            |
//! |      |                                                       |
//! |      +-- waker token ........ shutdown                       |
//! |      +-- socket token ....... Slot { waiting, ready }        |
//! |                                  |                           |
//! |                                  v                           |
//! |                 AsyncCompletion::complete()  ---> ThreadPool |
//! +--------------------------------------------------------------+
//! ```
//!
//! Events are edge-triggered, so readiness that arrives while nobody waits
//! is remembered in the slot's `ready` flag and consumed by the next
//! [`Reactor::arm`]. Handlers must drive the socket until it reports
//! `WouldBlock` before arming again.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::thread_pool::{AsyncCompletion, SocketOperation};

// ============================================================================
// Constants
// ============================================================================

/// Token for the waker
const WAKER_TOKEN: Token = Token(0);

/// Starting token for sockets
const SOCKET_TOKEN_START: usize = 1;

/// Poll timeout, bounds shutdown latency if a wake-up is lost
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 128;

// ============================================================================
// Slots
// ============================================================================

#[derive(Default)]
struct Slot {
    waiting: [Option<AsyncCompletion>; 2],
    /// Readiness seen while nobody was waiting.
    ready: [bool; 2],
}

impl Slot {
    fn signal(&mut self, op: SocketOperation, fired: &mut Vec<AsyncCompletion>) {
        let i = op.index();
        match self.waiting[i].take() {
            Some(completion) => fired.push(completion),
            None => self.ready[i] = true,
        }
    }
}

struct ReactorShared {
    slots: Mutex<HashMap<Token, Slot>>,
    running: AtomicBool,
}

// ============================================================================
// Reactor
// ============================================================================

/// Readiness reactor owning one poll thread.
pub struct Reactor {
    name: String,
    registry: Registry,
    waker: Waker,
    shared: Arc<ReactorShared>,
    next_token: AtomicUsize,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reactor {
    /// Create the poll and spawn its thread (named `<name>-reactor`).
    pub fn new(name: &str) -> Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(ReactorShared {
            slots: Mutex::new(HashMap::new()),
            running: AtomicBool::new(true),
        });

        let thread_shared = Arc::clone(&shared);
        let thread_name = format!("{}-reactor", name);
        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run(poll, thread_shared))?;

        log::debug!("[reactor] {} started", name);
        Ok(Self {
            name: name.to_owned(),
            registry,
            waker,
            shared,
            next_token: AtomicUsize::new(SOCKET_TOKEN_START),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Register `source` for read and write readiness.
    ///
    /// Both directions start out ready, so the first wait on each returns
    /// immediately and the handler probes the socket once.
    pub fn register<S: Source + ?Sized>(&self, source: &mut S) -> Result<Token> {
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(Error::config(format!("reactor {} is shut down", self.name)));
        }
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.shared.slots.lock().insert(
            token,
            Slot {
                ready: [true, true],
                ..Slot::default()
            },
        );
        if let Err(e) = self
            .registry
            .register(source, token, Interest::READABLE | Interest::WRITABLE)
        {
            self.shared.slots.lock().remove(&token);
            return Err(e.into());
        }
        Ok(token)
    }

    /// Remove `source`; pending completions are dropped.
    pub fn deregister<S: Source + ?Sized>(&self, token: Token, source: &mut S) -> Result<()> {
        self.shared.slots.lock().remove(&token);
        self.registry.deregister(source)?;
        Ok(())
    }

    /// Wait for `op` on `token`.
    ///
    /// Returns `Ok(true)` when readiness was already recorded; `completion`
    /// is then dropped and the caller proceeds at once. Otherwise the
    /// completion fires on the next readiness event.
    pub fn arm(&self, token: Token, op: SocketOperation, completion: AsyncCompletion) -> Result<bool> {
        let mut slots = self.shared.slots.lock();
        let slot = slots
            .get_mut(&token)
            .ok_or_else(|| Error::connection_lost("socket is not registered with the reactor"))?;
        let i = op.index();
        if slot.ready[i] {
            slot.ready[i] = false;
            return Ok(true);
        }
        slot.waiting[i] = Some(completion);
        Ok(false)
    }

    /// Number of registered sockets.
    pub fn registered(&self) -> usize {
        self.shared.slots.lock().len()
    }

    /// Stop and join the poll thread. Idempotent.
    pub fn shutdown(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.waker.wake() {
            log::warn!("[reactor] {}: wake failed: {}", self.name, e);
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("[reactor] {}: poll thread panicked", self.name);
            }
        }
        self.shared.slots.lock().clear();
        log::debug!("[reactor] {} stopped", self.name);
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.name)
            .field("running", &self.shared.running.load(Ordering::Relaxed))
            .field("registered", &self.registered())
            .finish()
    }
}

fn run(mut poll: Poll, shared: Arc<ReactorShared>) {
    let mut events = Events::with_capacity(MAX_EVENTS);
    let mut fired = Vec::new();

    while shared.running.load(Ordering::Acquire) {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("[reactor] poll failed: {}", e);
            break;
        }

        {
            let mut slots = shared.slots.lock();
            for event in events.iter() {
                if event.token() == WAKER_TOKEN {
                    continue;
                }
                let Some(slot) = slots.get_mut(&event.token()) else {
                    continue;
                };
                if event.is_readable() || event.is_read_closed() || event.is_error() {
                    slot.signal(SocketOperation::Read, &mut fired);
                }
                if event.is_writable() || event.is_write_closed() || event.is_error() {
                    slot.signal(SocketOperation::Write, &mut fired);
                }
            }
        }

        for completion in fired.drain(..) {
            completion.complete();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread_pool::{
        AsyncStart, EventHandler, ThreadPool, ThreadPoolConfig, ThreadPoolCurrent,
    };
    use crossbeam::channel::{unbounded, Sender};
    use std::io::{Read, Write};

    struct Probe {
        reactor: Arc<Reactor>,
        token: Mutex<Option<Token>>,
        stream: Mutex<mio::net::TcpStream>,
        tx: Sender<Vec<u8>>,
    }

    impl EventHandler for Probe {
        fn message(&self, current: &mut ThreadPoolCurrent<'_>) {
            if current.operation() != Some(SocketOperation::Read) {
                return;
            }
            let mut buf = [0u8; 64];
            let mut stream = self.stream.lock();
            loop {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let _ = self.tx.send(buf[..n].to_vec());
                    }
                }
            }
        }

        fn finished(&self, _current: &mut ThreadPoolCurrent<'_>) {}

        fn start_async(&self, op: SocketOperation, completion: AsyncCompletion) -> Result<AsyncStart> {
            let token = self.token.lock().ok_or_else(|| Error::config("not registered"))?;
            if self.reactor.arm(token, op, completion)? {
                Ok(AsyncStart::Ready)
            } else {
                Ok(AsyncStart::Pending)
            }
        }

        fn finish_async(&self, _op: SocketOperation) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_readiness_reaches_pool() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let mut client = std::net::TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (accepted, _) = listener.accept().expect("accept");
        accepted.set_nonblocking(true).expect("nonblocking");

        let reactor = Arc::new(Reactor::new("test").expect("reactor"));
        let pool = ThreadPool::new(ThreadPoolConfig::new("reactor-test").with_size(1)).expect("pool");
        let (tx, rx) = unbounded();
        let probe = Arc::new(Probe {
            reactor: Arc::clone(&reactor),
            token: Mutex::new(None),
            stream: Mutex::new(mio::net::TcpStream::from_std(accepted)),
            tx,
        });
        let token = reactor.register(&mut *probe.stream.lock()).expect("register");
        *probe.token.lock() = Some(token);
        let handler: Arc<dyn EventHandler> = probe.clone();
        pool.register(&handler, SocketOperation::Read).expect("pool register");

        client.write_all(b"ping").expect("write");
        let got = rx.recv_timeout(Duration::from_secs(5)).expect("data delivered");
        assert_eq!(got, b"ping");

        client.write_all(b"again").expect("write");
        let got = rx.recv_timeout(Duration::from_secs(5)).expect("second edge delivered");
        assert_eq!(got, b"again");

        pool.finish(&handler).expect("finish");
        reactor.deregister(token, &mut *probe.stream.lock()).expect("deregister");
        assert_eq!(reactor.registered(), 0);
        reactor.shutdown();
    }

    #[test]
    fn test_register_after_shutdown_fails() {
        let reactor = Reactor::new("stopped").expect("reactor");
        reactor.shutdown();
        reactor.shutdown();
        let mut listener =
            mio::net::TcpListener::bind(std::net::SocketAddr::from(([127, 0, 0, 1], 0))).expect("bind");
        assert!(reactor.register(&mut listener).is_err());
    }
}
