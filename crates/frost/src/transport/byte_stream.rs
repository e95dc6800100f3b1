// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ByteStream trait for the socket layers.
//!
//! The WebSocket layer is written against this trait so it runs over:
//! - a mio `TcpStream` registered with the [`Reactor`](super::reactor::Reactor)
//! - a plain `std::net::TcpStream` set to non-blocking mode
//! - the in-memory [`mock::MockStream`] pair used by tests and fuzzing
//!
//! Streams are expected to be non-blocking: `read` and `write` report
//! `WouldBlock` when no progress is possible.
//!
//! # Example
//!
//! ```ignore
//! use frost::transport::ByteStream;
//!
//! fn send_all<S: ByteStream>(stream: &mut S, msg: &[u8]) -> io::Result<()> {
//!     stream.write_all(msg)?;
//!     stream.flush()
//! }
//! ```

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

/// Abstraction over non-blocking byte-oriented streams.
pub trait ByteStream: Read + Write + Send {
    /// Shutdown the stream.
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()>;

    /// Get the local address of this stream.
    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Get the peer address of this stream.
    ///
    /// Fails with `NotConnected` while a non-blocking connect is in progress.
    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Set TCP_NODELAY (disable Nagle's algorithm).
    fn set_nodelay(&self, nodelay: bool) -> io::Result<()>;

    /// Take the pending socket error, if any.
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Short label for log lines.
    fn description(&self) -> String {
        match (self.local_addr(), self.peer_addr()) {
            (Ok(local), Ok(peer)) => format!("local address = {}, remote address = {}", local, peer),
            (Ok(local), Err(_)) => format!("local address = {}, not connected", local),
            _ => "not connected".to_owned(),
        }
    }
}

// ============================================================================
// std TcpStream
// ============================================================================

impl ByteStream for std::net::TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        std::net::TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        std::net::TcpStream::peer_addr(self)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        std::net::TcpStream::set_nodelay(self, nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        std::net::TcpStream::take_error(self)
    }
}

// ============================================================================
// mio TcpStream
// ============================================================================

impl ByteStream for mio::net::TcpStream {
    fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::local_addr(self)
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        mio::net::TcpStream::peer_addr(self)
    }

    fn set_nodelay(&self, nodelay: bool) -> io::Result<()> {
        mio::net::TcpStream::set_nodelay(self, nodelay)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        mio::net::TcpStream::take_error(self)
    }
}

// ============================================================================
// In-memory stream
// ============================================================================

/// In-memory non-blocking streams for tests and fuzzing.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Pipe {
        data: VecDeque<u8>,
        /// Writer side closed: reads return EOF once `data` is drained.
        closed: bool,
    }

    type SharedPipe = Arc<Mutex<Pipe>>;

    /// Non-blocking in-memory stream.
    ///
    /// Reads drain the inbound pipe and report `WouldBlock` when it is empty.
    /// Writes append to the outbound pipe, limited by an optional write budget
    /// to simulate a full socket buffer.
    #[derive(Debug)]
    pub struct MockStream {
        inbound: SharedPipe,
        outbound: SharedPipe,
        write_budget: Arc<Mutex<Option<usize>>>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    }

    /// Test-side handle on a [`MockStream`] that was moved into a socket.
    #[derive(Debug, Clone)]
    pub struct MockHandle {
        inbound: SharedPipe,
        outbound: SharedPipe,
        write_budget: Arc<Mutex<Option<usize>>>,
    }

    impl MockStream {
        /// Create a standalone stream fed through [`MockHandle::feed`].
        pub fn new() -> Self {
            Self::with_pipes(
                SharedPipe::default(),
                SharedPipe::default(),
                SocketAddr::from(([127, 0, 0, 1], 12345)),
                SocketAddr::from(([127, 0, 0, 1], 54321)),
            )
        }

        /// Create a connected pair: bytes written on one side are read on the other.
        pub fn pair() -> (Self, Self) {
            let a_to_b = SharedPipe::default();
            let b_to_a = SharedPipe::default();
            let a = SocketAddr::from(([127, 0, 0, 1], 10001));
            let b = SocketAddr::from(([127, 0, 0, 1], 10002));
            (
                Self::with_pipes(b_to_a.clone(), a_to_b.clone(), a, b),
                Self::with_pipes(a_to_b, b_to_a, b, a),
            )
        }

        fn with_pipes(
            inbound: SharedPipe,
            outbound: SharedPipe,
            local_addr: SocketAddr,
            peer_addr: SocketAddr,
        ) -> Self {
            Self {
                inbound,
                outbound,
                write_budget: Arc::new(Mutex::new(None)),
                local_addr,
                peer_addr,
            }
        }

        pub fn handle(&self) -> MockHandle {
            MockHandle {
                inbound: self.inbound.clone(),
                outbound: self.outbound.clone(),
                write_budget: self.write_budget.clone(),
            }
        }
    }

    impl Default for MockStream {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockHandle {
        /// Add data to the stream's read side.
        pub fn feed(&self, data: &[u8]) {
            self.inbound.lock().data.extend(data);
        }

        /// Drain everything the stream has written so far.
        pub fn take_written(&self) -> Vec<u8> {
            self.outbound.lock().data.drain(..).collect()
        }

        /// Number of written bytes not yet consumed.
        pub fn pending_written(&self) -> usize {
            self.outbound.lock().data.len()
        }

        /// Make reads return EOF once buffered data is consumed.
        pub fn close_read(&self) {
            self.inbound.lock().closed = true;
        }

        /// Limit how many more bytes writes accept (`None` = unlimited).
        pub fn set_write_budget(&self, budget: Option<usize>) {
            *self.write_budget.lock() = budget;
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut pipe = self.inbound.lock();
            if pipe.data.is_empty() {
                if pipe.closed {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }

            let to_read = buf.len().min(pipe.data.len());
            for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..to_read)) {
                *slot = byte;
            }
            Ok(to_read)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut pipe = self.outbound.lock();
            if pipe.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "not connected"));
            }

            let mut budget = self.write_budget.lock();
            let len = match *budget {
                Some(0) if !buf.is_empty() => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"))
                }
                Some(left) => {
                    let len = buf.len().min(left);
                    *budget = Some(left - len);
                    len
                }
                None => buf.len(),
            };
            pipe.data.extend(&buf[..len]);
            Ok(len)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl ByteStream for MockStream {
        fn shutdown(&mut self, how: Shutdown) -> io::Result<()> {
            if matches!(how, Shutdown::Write | Shutdown::Both) {
                self.outbound.lock().closed = true;
            }
            if matches!(how, Shutdown::Read | Shutdown::Both) {
                self.inbound.lock().closed = true;
            }
            Ok(())
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local_addr)
        }

        fn peer_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.peer_addr)
        }

        fn set_nodelay(&self, _nodelay: bool) -> io::Result<()> {
            Ok(())
        }

        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockStream;
    use super::*;

    #[test]
    fn test_mock_pair_crosses_data() {
        let (mut a, mut b) = MockStream::pair();
        a.write_all(b"hello").expect("write");

        let mut buf = [0u8; 16];
        let n = b.read(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"hello");

        let err = b.read(&mut buf).expect_err("empty pipe");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_mock_write_budget() {
        let mut stream = MockStream::new();
        let handle = stream.handle();
        handle.set_write_budget(Some(3));

        assert_eq!(stream.write(b"abcdef").expect("partial"), 3);
        let err = stream.write(b"def").expect_err("budget exhausted");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(handle.take_written(), b"abc");
    }

    #[test]
    fn test_mock_eof_after_close() {
        let mut stream = MockStream::new();
        let handle = stream.handle();
        handle.feed(b"x");
        handle.close_read();

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).expect("data"), 1);
        assert_eq!(stream.read(&mut buf).expect("eof"), 0);
    }

    #[test]
    fn test_description() {
        let stream = MockStream::new();
        assert!(stream.description().contains("127.0.0.1:54321"));
    }
}
