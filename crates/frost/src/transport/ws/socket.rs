// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Non-blocking WebSocket endpoint over a [`ByteStream`].
//!
//! # Lifecycle
//!
//! ```text
//! Handshake --initialize()--> Open --close()--> Closing --Close received--> Closed
//!                               |
//!                               +----Close received (echoed)------------> Closed
//! ```
//!
//! Every outgoing byte (handshake, data frames, pongs, close frames) goes
//! through one FIFO write buffer, so control frames queued while a large
//! message is still being flushed are sent after it, never interleaved.
//!
//! Calls never block: when the stream reports `WouldBlock`, `initialize` and
//! `flush` return `Ok(false)` and `recv` returns [`Received::WouldBlock`].
//! The caller retries once the stream is readable (or writable, when
//! [`WsSocket::wants_write`] is true).

use std::fmt;
use std::io::ErrorKind;

use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};

use super::config::WsConfig;
use super::frame::{apply_mask, encode_frame, FrameHeader, Opcode, CLOSURE_NORMAL, CONTROL_PAYLOAD_MAX};
use super::http::{HttpMessageKind, HttpParser};
use crate::error::{Error, Result};
use crate::transport::byte_stream::ByteStream;

/// GUID appended to the client key to derive `Sec-WebSocket-Accept`.
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Version` spoken by this implementation.
pub const WS_VERSION: &str = "13";

/// `Sec-WebSocket-Accept` value for a client key.
pub fn compute_accept(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Which side of the connection this socket is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Sends the upgrade request; masks every frame.
    Client,
    /// Answers the upgrade request; never masks.
    Server,
}

/// Connection state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketState {
    Handshake,
    Open,
    /// Close sent, waiting for the peer's Close.
    Closing,
    Closed,
}

/// Result of [`WsSocket::recv`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// `len` payload bytes were copied; `end_of_message` marks the last
    /// bytes of a message.
    Data { len: usize, end_of_message: bool },
    /// No more data until the stream becomes readable.
    WouldBlock,
    /// The close handshake completed.
    Closed,
}

/// Result of [`WsSocket::recv_message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Incoming {
    Message(Vec<u8>),
    WouldBlock,
    Closed,
}

/// Frame whose payload is being read.
#[derive(Clone, Copy, Debug)]
struct InFrame {
    header: FrameHeader,
    remaining: u64,
    /// Payload bytes already consumed, for mask alignment.
    offset: usize,
}

/// WebSocket endpoint.
pub struct WsSocket<S: ByteStream> {
    stream: S,
    role: Role,
    config: WsConfig,
    state: SocketState,
    parser: HttpParser,
    /// Client key sent in the upgrade request.
    key: Option<String>,

    read_buf: Vec<u8>,
    read_pos: usize,
    write_buf: Vec<u8>,
    write_pos: usize,

    frame: Option<InFrame>,
    /// FIN of the last data or continuation frame.
    last_fin: bool,
    close_sent: bool,
    close_code: Option<u16>,
    /// Partial message held by `recv_message`.
    message: Vec<u8>,
}

impl<S: ByteStream> WsSocket<S> {
    pub fn new(stream: S, role: Role, config: WsConfig) -> Self {
        Self {
            stream,
            role,
            config,
            state: SocketState::Handshake,
            parser: HttpParser::new(),
            key: None,
            read_buf: Vec::new(),
            read_pos: 0,
            write_buf: Vec::new(),
            write_pos: 0,
            frame: None,
            last_fin: true,
            close_sent: false,
            close_code: None,
            message: Vec::new(),
        }
    }

    pub fn client(stream: S, config: WsConfig) -> Self {
        Self::new(stream, Role::Client, config)
    }

    pub fn server(stream: S, config: WsConfig) -> Self {
        Self::new(stream, Role::Server, config)
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Drive the upgrade handshake. Returns `Ok(true)` once the socket is open.
    pub fn initialize(&mut self) -> Result<bool> {
        match self.state {
            SocketState::Open | SocketState::Closing => return Ok(true),
            SocketState::Closed => return Err(Error::connection_lost("websocket closed")),
            SocketState::Handshake => {}
        }

        if self.role == Role::Client && self.key.is_none() {
            self.queue_request();
        }
        if !self.flush()? {
            return Ok(false);
        }

        loop {
            let pending = &self.read_buf[self.read_pos..];
            if let Some(end) = HttpParser::is_complete_message(pending) {
                if !self.parser.parse(&pending[..end])? {
                    return Err(Error::protocol("incomplete HTTP header"));
                }
                self.read_pos += end;
                match self.role {
                    Role::Client => self.check_response()?,
                    Role::Server => {
                        self.check_request()?;
                        self.flush()?;
                    }
                }
                self.state = SocketState::Open;
                log::debug!("[ws] {:?} handshake complete ({})", self.role, self.stream.description());
                return Ok(true);
            }
            if pending.len() > self.config.max_header_size {
                return Err(Error::protocol("HTTP header too large"));
            }
            if !self.fill()? {
                return Ok(false);
            }
        }
    }

    fn queue_request(&mut self) {
        let nonce: [u8; 16] = std::array::from_fn(|_| fastrand::u8(..));
        let key = general_purpose::STANDARD.encode(nonce);
        let host = if self.config.host.is_empty() {
            self.stream
                .peer_addr()
                .map_or_else(|_| "localhost".to_owned(), |addr| addr.to_string())
        } else {
            self.config.host.clone()
        };

        let request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Protocol: {}\r\n\
             Sec-WebSocket-Version: {}\r\n\
             Sec-WebSocket-Key: {}\r\n\
             \r\n",
            self.config.resource, host, self.config.protocol, WS_VERSION, key
        );
        self.write_buf.extend_from_slice(request.as_bytes());
        self.key = Some(key);
    }

    fn check_request(&mut self) -> Result<()> {
        let p = &self.parser;
        if p.kind() != Some(HttpMessageKind::Request) {
            return Err(Error::protocol("expected an HTTP upgrade request"));
        }
        if p.method() != "GET" {
            return Err(Error::protocol(format!("HTTP method `{}` is not GET", p.method())));
        }
        check_common(p)?;
        if p.header("Sec-WebSocket-Version") != Some(WS_VERSION) {
            return Err(Error::protocol("unsupported value for Sec-WebSocket-Version"));
        }

        let offered = match p.header("Sec-WebSocket-Protocol") {
            Some(_) if !p.header_contains_token("Sec-WebSocket-Protocol", &self.config.protocol) => {
                return Err(Error::protocol("unknown value for Sec-WebSocket-Protocol"));
            }
            Some(_) => true,
            None => false,
        };

        let key = p
            .header("Sec-WebSocket-Key")
            .ok_or_else(|| Error::protocol("missing field Sec-WebSocket-Key"))?;
        match general_purpose::STANDARD.decode(key) {
            Ok(nonce) if nonce.len() == 16 => {}
            _ => return Err(Error::protocol("invalid value for Sec-WebSocket-Key")),
        }

        let mut response = String::from(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n",
        );
        if offered {
            response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", self.config.protocol));
        }
        response.push_str(&format!("Sec-WebSocket-Accept: {}\r\n\r\n", compute_accept(key)));
        self.write_buf.extend_from_slice(response.as_bytes());
        Ok(())
    }

    fn check_response(&self) -> Result<()> {
        let p = &self.parser;
        if p.kind() != Some(HttpMessageKind::Response) {
            return Err(Error::protocol("expected an HTTP response"));
        }
        if p.status() != 101 {
            return Err(Error::protocol(format!(
                "unexpected status value {}: {}",
                p.status(),
                p.reason()
            )));
        }
        check_common(p)?;
        if let Some(protocol) = p.header("Sec-WebSocket-Protocol") {
            if !protocol.trim().eq_ignore_ascii_case(&self.config.protocol) {
                return Err(Error::protocol("invalid value for Sec-WebSocket-Protocol"));
            }
        }

        let accept = p
            .header("Sec-WebSocket-Accept")
            .ok_or_else(|| Error::protocol("missing field Sec-WebSocket-Accept"))?;
        let key = self.key.as_deref().unwrap_or_default();
        if accept != compute_accept(key) {
            return Err(Error::protocol("invalid value for Sec-WebSocket-Accept"));
        }
        Ok(())
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queue `payload` as one final data frame and try to flush.
    ///
    /// Returns `Ok(false)` when bytes remain queued; call [`flush`](Self::flush)
    /// once the stream is writable.
    pub fn send(&mut self, payload: &[u8]) -> Result<bool> {
        self.check_open()?;
        if payload.len() > self.config.max_frame_size {
            return Err(Error::FrameTooLarge {
                size: payload.len() as u64,
                max: self.config.max_frame_size,
            });
        }
        self.queue_frame(Opcode::Data, payload)?;
        self.flush()
    }

    /// Send a Ping; the peer's Pong is consumed silently.
    pub fn ping(&mut self, payload: &[u8]) -> Result<bool> {
        self.check_open()?;
        if payload.len() as u64 > CONTROL_PAYLOAD_MAX {
            return Err(Error::protocol("ping payload larger than 125 bytes"));
        }
        self.queue_frame(Opcode::Ping, payload)?;
        self.flush()
    }

    /// Start the close handshake with `code`. The socket is closed once the
    /// peer's Close arrives through [`recv`](Self::recv).
    pub fn close(&mut self, code: u16) -> Result<bool> {
        match self.state {
            SocketState::Handshake => {
                self.state = SocketState::Closed;
                return Ok(true);
            }
            SocketState::Closing | SocketState::Closed => return self.flush(),
            SocketState::Open => {}
        }
        self.queue_frame(Opcode::Close, &code.to_be_bytes())?;
        self.close_sent = true;
        self.state = SocketState::Closing;
        log::debug!("[ws] sent close {} ({})", code, self.stream.description());
        self.flush()
    }

    /// Write queued bytes. Returns `Ok(true)` when the buffer is empty.
    pub fn flush(&mut self) -> Result<bool> {
        while self.write_pos < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.write_pos..]) {
                Ok(0) => return Err(Error::connection_lost("stream accepted no bytes")),
                Ok(n) => self.write_pos += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.write_buf.clear();
        self.write_pos = 0;
        Ok(true)
    }

    fn check_open(&self) -> Result<()> {
        match self.state {
            SocketState::Open => Ok(()),
            SocketState::Handshake => Err(Error::protocol("websocket handshake not complete")),
            SocketState::Closing | SocketState::Closed => Err(Error::connection_lost("websocket closed")),
        }
    }

    fn queue_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        let mask = match self.role {
            Role::Client => Some(fastrand::u32(..).to_ne_bytes()),
            Role::Server => None,
        };
        encode_frame(&mut self.write_buf, opcode, payload, mask)
    }

    // ========================================================================
    // Receiving
    // ========================================================================

    /// Read message payload into `buf`.
    ///
    /// Control frames are handled internally: Ping is answered with Pong,
    /// Pong is ignored, and Close is echoed (or completes a close this side
    /// started). Fragmented messages are delivered in order; only the last
    /// chunk carries `end_of_message`.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<Received> {
        match self.state {
            SocketState::Handshake => return Err(Error::protocol("websocket handshake not complete")),
            SocketState::Closed => return Ok(Received::Closed),
            SocketState::Open | SocketState::Closing => {}
        }

        loop {
            let Some(mut frame) = self.frame else {
                match FrameHeader::decode(&self.read_buf[self.read_pos..])? {
                    Some((header, used)) => {
                        self.read_pos += used;
                        self.begin_frame(header)?;
                    }
                    None => {
                        if !self.fill()? {
                            return Ok(Received::WouldBlock);
                        }
                    }
                }
                continue;
            };

            if frame.header.opcode.is_control() {
                let len = frame.header.payload_len as usize;
                if self.buffered() < len {
                    if !self.fill()? {
                        return Ok(Received::WouldBlock);
                    }
                    continue;
                }
                let mut payload = self.read_buf[self.read_pos..self.read_pos + len].to_vec();
                self.read_pos += len;
                self.frame = None;
                if let Some(mask) = frame.header.mask {
                    apply_mask(&mut payload, mask, 0);
                }
                if self.control_frame(frame.header.opcode, &payload)? {
                    return Ok(Received::Closed);
                }
                continue;
            }

            if frame.remaining == 0 {
                self.frame = None;
                if frame.header.fin {
                    return Ok(Received::Data {
                        len: 0,
                        end_of_message: true,
                    });
                }
                continue;
            }
            if buf.is_empty() {
                return Ok(Received::Data {
                    len: 0,
                    end_of_message: false,
                });
            }
            if self.buffered() == 0 {
                if !self.fill()? {
                    return Ok(Received::WouldBlock);
                }
                continue;
            }

            let n = buf
                .len()
                .min(self.buffered())
                .min(usize::try_from(frame.remaining).unwrap_or(usize::MAX));
            buf[..n].copy_from_slice(&self.read_buf[self.read_pos..self.read_pos + n]);
            self.read_pos += n;
            if let Some(mask) = frame.header.mask {
                apply_mask(&mut buf[..n], mask, frame.offset);
            }
            frame.remaining -= n as u64;
            frame.offset += n;

            let end_of_message = frame.remaining == 0 && frame.header.fin;
            self.frame = if frame.remaining == 0 { None } else { Some(frame) };
            return Ok(Received::Data { len: n, end_of_message });
        }
    }

    /// Read one complete message, reassembling fragments.
    pub fn recv_message(&mut self) -> Result<Incoming> {
        let mut message = std::mem::take(&mut self.message);
        let result = loop {
            let start = message.len();
            message.resize(start + self.config.read_chunk_size, 0);
            match self.recv(&mut message[start..]) {
                Ok(Received::Data { len, end_of_message }) => {
                    message.truncate(start + len);
                    if message.len() > self.config.max_frame_size {
                        let size = message.len() as u64;
                        message.clear();
                        break Err(Error::FrameTooLarge {
                            size,
                            max: self.config.max_frame_size,
                        });
                    }
                    if end_of_message {
                        break Ok(Incoming::Message(std::mem::take(&mut message)));
                    }
                }
                Ok(Received::WouldBlock) => {
                    message.truncate(start);
                    break Ok(Incoming::WouldBlock);
                }
                Ok(Received::Closed) => {
                    message.clear();
                    break Ok(Incoming::Closed);
                }
                Err(e) => {
                    message.clear();
                    break Err(e);
                }
            }
        };
        self.message = message;
        result
    }

    fn begin_frame(&mut self, header: FrameHeader) -> Result<()> {
        match (self.role, header.mask.is_some()) {
            (Role::Server, false) => return Err(Error::protocol("unmasked frame from client")),
            (Role::Client, true) => return Err(Error::protocol("masked frame from server")),
            _ => {}
        }

        match header.opcode {
            Opcode::Text => return Err(Error::protocol("text frames are not supported")),
            Opcode::Data => {
                if !self.last_fin {
                    return Err(Error::protocol("data frame inside a fragmented message"));
                }
                self.last_fin = header.fin;
            }
            Opcode::Continuation => {
                if self.last_fin {
                    return Err(Error::protocol("continuation frame without a fragmented message"));
                }
                self.last_fin = header.fin;
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => {}
        }

        if header.payload_len > self.config.max_frame_size as u64 {
            return Err(Error::FrameTooLarge {
                size: header.payload_len,
                max: self.config.max_frame_size,
            });
        }

        self.frame = Some(InFrame {
            header,
            remaining: header.payload_len,
            offset: 0,
        });
        Ok(())
    }

    /// Handle a control frame. Returns `true` when the socket is now closed.
    fn control_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<bool> {
        match opcode {
            Opcode::Ping => {
                log::trace!("[ws] ping received, {} bytes", payload.len());
                if !self.close_sent {
                    self.queue_frame(Opcode::Pong, payload)?;
                    self.flush()?;
                }
                Ok(false)
            }
            Opcode::Pong => {
                log::trace!("[ws] pong received");
                Ok(false)
            }
            Opcode::Close => {
                let code = match payload {
                    [] => CLOSURE_NORMAL,
                    [_] => return Err(Error::protocol("close frame with truncated status code")),
                    [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
                };
                self.close_code = Some(code);
                if !self.close_sent {
                    self.queue_frame(Opcode::Close, &code.to_be_bytes())?;
                    self.close_sent = true;
                    self.flush()?;
                    log::debug!("[ws] peer closed with {}, echoed", code);
                } else {
                    log::debug!("[ws] close handshake complete ({})", code);
                }
                self.state = SocketState::Closed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Unread bytes in the read buffer.
    fn buffered(&self) -> usize {
        self.read_buf.len() - self.read_pos
    }

    /// Read more bytes from the stream. Returns `Ok(false)` on `WouldBlock`.
    fn fill(&mut self) -> Result<bool> {
        if self.read_pos == self.read_buf.len() {
            self.read_buf.clear();
            self.read_pos = 0;
        } else if self.read_pos >= self.config.read_chunk_size {
            self.read_buf.drain(..self.read_pos);
            self.read_pos = 0;
        }

        let start = self.read_buf.len();
        self.read_buf.resize(start + self.config.read_chunk_size, 0);
        loop {
            match self.stream.read(&mut self.read_buf[start..]) {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return Err(Error::connection_lost("peer closed the connection"));
                }
                Ok(n) => {
                    self.read_buf.truncate(start + n);
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.read_buf.truncate(start);
                    if e.kind() == ErrorKind::WouldBlock {
                        return Ok(false);
                    }
                    return Err(e.into());
                }
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SocketState::Open
    }

    /// Close code received from the peer.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    /// Bytes are queued for writing.
    pub fn wants_write(&self) -> bool {
        self.write_pos < self.write_buf.len()
    }

    pub fn config(&self) -> &WsConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Checks shared by request and response: HTTP/1.1 and the upgrade headers.
fn check_common(p: &HttpParser) -> Result<()> {
    if p.version() != (1, 1) {
        return Err(Error::protocol("unsupported HTTP version"));
    }
    if p.header_lowercase("Upgrade").as_deref() != Some("websocket") {
        return Err(Error::protocol("missing value for Upgrade field"));
    }
    if !p.header_contains_token("Connection", "upgrade") {
        return Err(Error::protocol("missing value for Connection field"));
    }
    Ok(())
}

impl<S: ByteStream> fmt::Debug for WsSocket<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSocket")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("buffered", &self.buffered())
            .field("queued", &(self.write_buf.len() - self.write_pos))
            .finish()
    }
}
