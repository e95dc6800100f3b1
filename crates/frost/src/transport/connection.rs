// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket connection serviced by a [`ThreadPool`] and a [`Reactor`].
//!
//! A [`WsConnection`] is an [`EventHandler`]: the reactor reports socket
//! readiness, the pool dispatches `message` for the ready operation, and
//! the connection drives its [`WsSocket`] until the stream would block.
//!
//! ```text
//! Read  dispatch: [connect check] -> handshake -> recv_message()* -> observer.message()
//! Write dispatch: [connect check] -> handshake -> flush() -> unregister Write when drained
//! ```
//!
//! Messages of one read dispatch are delivered in order. With a pool that
//! does not serialize dispatch, the next read may be serviced on another
//! thread while the observer still runs; use a serialized pool when
//! cross-dispatch ordering matters.

use std::fmt;
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use mio::net::TcpStream;
use mio::Token;
use parking_lot::Mutex;

use super::byte_stream::ByteStream;
use super::reactor::Reactor;
use super::ws::frame::CLOSURE_NORMAL;
use super::ws::{Incoming, Role, SocketState, WsConfig, WsSocket};
use crate::error::{Error, Result};
use crate::thread_pool::{
    AsyncCompletion, AsyncStart, EventHandler, PoolHandle, SocketOperation, ThreadPool,
    ThreadPoolCurrent,
};

/// Receives connection events. Called on pool threads.
pub trait ConnectionObserver: Send + Sync {
    /// Handshake completed; messages may be sent.
    fn opened(&self, _connection: &Arc<WsConnection>) {}

    /// A complete binary message arrived.
    fn message(&self, connection: &Arc<WsConnection>, payload: Vec<u8>);

    /// Connection closed, cleanly (`None`) or after a failure.
    fn closed(&self, _connection: &Arc<WsConnection>, _error: Option<&Error>) {}
}

struct Inner {
    socket: WsSocket<TcpStream>,
    /// Non-blocking connect finished.
    connected: bool,
    opened: bool,
    error: Option<Error>,
}

/// What one dispatch produced; acted on after the connection lock is released.
#[derive(Default)]
struct Progress {
    opened: bool,
    messages: Vec<Vec<u8>>,
    closed: bool,
}

/// WebSocket connection over a mio TCP stream.
pub struct WsConnection {
    this: Weak<WsConnection>,
    inner: Mutex<Inner>,
    token: Token,
    reactor: Arc<Reactor>,
    pool: PoolHandle,
    observer: Arc<dyn ConnectionObserver>,
    /// Set once `finish` was requested; read under the pool lock.
    finishing: AtomicBool,
    role: Role,
    peer: SocketAddr,
}

impl WsConnection {
    /// Start a non-blocking connect to `addr`.
    pub fn connect(
        addr: SocketAddr,
        config: WsConfig,
        pool: &ThreadPool,
        reactor: &Arc<Reactor>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr)?;
        Self::start(stream, Role::Client, false, addr, config, pool.handle(), reactor, observer)
    }

    /// Serve an accepted stream.
    pub fn accept(
        stream: std::net::TcpStream,
        config: WsConfig,
        pool: &ThreadPool,
        reactor: &Arc<Reactor>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        stream.set_nonblocking(true)?;
        let peer = stream.peer_addr()?;
        let stream = TcpStream::from_std(stream);
        Self::start(stream, Role::Server, true, peer, config, pool.handle(), reactor, observer)
    }

    #[allow(clippy::too_many_arguments)]
    fn start(
        mut stream: TcpStream,
        role: Role,
        connected: bool,
        peer: SocketAddr,
        config: WsConfig,
        pool: PoolHandle,
        reactor: &Arc<Reactor>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Result<Arc<Self>> {
        config.validate().map_err(Error::config)?;
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("[ws] set_nodelay failed for {}: {}", peer, e);
        }
        let token = reactor.register(&mut stream)?;

        let connection = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            inner: Mutex::new(Inner {
                socket: WsSocket::new(stream, role, config),
                connected,
                opened: false,
                error: None,
            }),
            token,
            reactor: Arc::clone(reactor),
            pool,
            observer,
            finishing: AtomicBool::new(false),
            role,
            peer,
        });

        let handler: Arc<dyn EventHandler> = connection.clone();
        let registered = connection
            .pool
            .register(&handler, SocketOperation::Read)
            .and_then(|()| match role {
                Role::Client => connection.pool.register(&handler, SocketOperation::Write),
                Role::Server => Ok(()),
            });
        if let Err(e) = registered {
            let mut inner = connection.inner.lock();
            if let Err(de) = connection.reactor.deregister(token, inner.socket.get_mut()) {
                log::trace!("[ws] deregister {} failed: {}", peer, de);
            }
            return Err(e);
        }
        log::debug!("[ws] {:?} connection to {} started", role, peer);
        Ok(connection)
    }

    // ========================================================================
    // Public API
    // ========================================================================

    /// Send one binary message. Fails until the handshake completed.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.socket.send(payload)? {
            self.register_write()?;
        }
        Ok(())
    }

    /// Send a Ping.
    pub fn ping(&self, payload: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.socket.ping(payload)? {
            self.register_write()?;
        }
        Ok(())
    }

    /// Start the close handshake; the observer's `closed` runs once the
    /// peer answers.
    pub fn close(&self) -> Result<()> {
        let closed = {
            let mut inner = self.inner.lock();
            if !inner.socket.close(CLOSURE_NORMAL)? {
                self.register_write()?;
            }
            inner.socket.state() == SocketState::Closed
        };
        if closed {
            self.start_finish(None);
        }
        Ok(())
    }

    /// Tear the connection down without a close handshake.
    pub fn abort(&self) {
        self.start_finish(Some(Error::connection_lost("connection aborted")));
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().socket.is_open()
    }

    pub fn state(&self) -> SocketState {
        self.inner.lock().socket.state()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    fn handler(&self) -> Option<Arc<dyn EventHandler>> {
        self.this.upgrade().map(|c| c as Arc<dyn EventHandler>)
    }

    /// Must be called with the connection lock held so it is ordered
    /// against `unregister` in [`Self::write_ready`].
    fn register_write(&self) -> Result<()> {
        match self.handler() {
            Some(handler) => self.pool.register(&handler, SocketOperation::Write),
            None => Ok(()),
        }
    }

    /// Complete the non-blocking connect and the upgrade handshake.
    /// Returns `Ok(true)` once the socket is open.
    fn handshake(&self, inner: &mut Inner, progress: &mut Progress) -> Result<bool> {
        if !inner.connected {
            let stream = inner.socket.get_ref();
            if let Some(e) = stream.take_error()? {
                return Err(e.into());
            }
            match stream.peer_addr() {
                Ok(_) => inner.connected = true,
                Err(e) if e.kind() == ErrorKind::NotConnected => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        if !inner.socket.initialize()? {
            return Ok(false);
        }
        if !inner.opened {
            inner.opened = true;
            progress.opened = true;
            log::info!("[ws] connection established ({})", inner.socket.get_ref().description());
        }
        Ok(true)
    }

    fn read_ready(&self, progress: &mut Progress) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.socket.state() == SocketState::Handshake && !self.handshake(&mut inner, progress)? {
            if inner.socket.wants_write() {
                self.register_write()?;
            }
            return Ok(());
        }

        loop {
            match inner.socket.recv_message()? {
                Incoming::Message(payload) => progress.messages.push(payload),
                Incoming::WouldBlock => break,
                Incoming::Closed => {
                    progress.closed = true;
                    break;
                }
            }
        }
        if inner.socket.wants_write() {
            self.register_write()?;
        }
        Ok(())
    }

    fn write_ready(&self, progress: &mut Progress) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.socket.state() == SocketState::Handshake && !self.handshake(&mut inner, progress)? {
            // Connect still in progress, or request partially written.
            if !inner.connected || inner.socket.wants_write() {
                return Ok(());
            }
        }
        if inner.socket.flush()? {
            if let Some(handler) = self.handler() {
                self.pool.unregister(&handler, SocketOperation::Write)?;
            }
        }
        Ok(())
    }

    fn start_finish(&self, error: Option<Error>) {
        if self.finishing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(e) = &error {
            log::debug!("[ws] connection to {} failed: {}", self.peer, e);
        }
        self.inner.lock().error = error;
        if let Some(handler) = self.handler() {
            if let Err(e) = self.pool.finish(&handler) {
                log::warn!("[ws] cannot finish connection to {}: {}", self.peer, e);
            }
        }
    }
}

impl EventHandler for WsConnection {
    fn message(&self, current: &mut ThreadPoolCurrent<'_>) {
        let Some(op) = current.operation() else {
            return;
        };
        let mut progress = Progress::default();
        let result = match op {
            SocketOperation::Read => self.read_ready(&mut progress),
            SocketOperation::Write => self.write_ready(&mut progress),
        };
        current.io_completed();

        let Some(this) = self.this.upgrade() else {
            return;
        };
        if progress.opened {
            self.observer.opened(&this);
        }
        for payload in progress.messages {
            self.observer.message(&this, payload);
        }
        match result {
            Err(e) => self.start_finish(Some(e)),
            Ok(()) if progress.closed => self.start_finish(None),
            Ok(()) => {}
        }
    }

    fn finished(&self, _current: &mut ThreadPoolCurrent<'_>) {
        let error = {
            let mut inner = self.inner.lock();
            if let Err(e) = inner.socket.flush() {
                log::trace!("[ws] final flush to {} failed: {}", self.peer, e);
            }
            if let Err(e) = self.reactor.deregister(self.token, inner.socket.get_mut()) {
                log::trace!("[ws] deregister {} failed: {}", self.peer, e);
            }
            if let Err(e) = inner.socket.get_mut().shutdown(Shutdown::Both) {
                log::trace!("[ws] shutdown of {} failed: {}", self.peer, e);
            }
            inner.error.take()
        };
        match &error {
            None => log::info!("[ws] connection to {} closed", self.peer),
            Some(e) => log::info!("[ws] connection to {} closed: {}", self.peer, e),
        }
        if let Some(this) = self.this.upgrade() {
            self.observer.closed(&this, error.as_ref());
        }
    }

    fn start_async(&self, op: SocketOperation, completion: AsyncCompletion) -> Result<AsyncStart> {
        if self.reactor.arm(self.token, op, completion)? {
            Ok(AsyncStart::Ready)
        } else {
            Ok(AsyncStart::Pending)
        }
    }

    fn finish_async(&self, _op: SocketOperation) -> Result<bool> {
        Ok(!self.finishing.load(Ordering::Acquire))
    }

    fn description(&self) -> String {
        format!("ws connection {:?} {}", self.role, self.peer)
    }
}

impl fmt::Debug for WsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsConnection")
            .field("role", &self.role)
            .field("peer", &self.peer)
            .field("token", &self.token)
            .field("finishing", &self.finishing.load(Ordering::Relaxed))
            .finish()
    }
}
