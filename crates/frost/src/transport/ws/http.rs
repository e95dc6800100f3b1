// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Incremental HTTP/1.x header parser for the WebSocket upgrade handshake.
//!
//! Only the request line or status line and the header block are parsed;
//! the upgrade handshake never carries a body. The parser is a byte-driven
//! state machine, so the header block may be fed in several pieces, and it
//! can be reused for a new message once a message completes.
//!
//! ```text
//! Init --'H'--> TypeCheck --'T'--> Version ("HTTP/") --> Major . Minor SP Status SP Reason
//!   |               |
//!   |               +--A-Z--> Method
//!   +--A-Z--> Method SP Uri SP Version ("HTTP/") --> Major . Minor
//!                                                         |
//!                           headers: Name ':' Value (CR)LF ... (CR)LF --> Complete
//! ```

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// Request or response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMessageKind {
    Request,
    Response,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    TypeCheck,
    Method,
    Uri,
    /// Matching the literal `HTTP/`; the index of the next expected byte.
    Version(usize),
    VersionMajor,
    VersionMinor,
    RequestLf,
    Status,
    Reason,
    ResponseLf,
    HeaderFieldStart,
    HeaderFieldName,
    HeaderFieldNameEnd,
    HeaderFieldValueStart,
    HeaderFieldValue,
    HeaderFieldLf,
    HeaderEndLf,
    Complete,
}

const VERSION_PREFIX: &[u8] = b"HTTP/";

#[derive(Clone, Debug)]
struct Header {
    /// Name as first received.
    name: String,
    value: String,
}

/// HTTP header parser.
#[derive(Clone)]
pub struct HttpParser {
    state: State,
    kind: Option<HttpMessageKind>,
    method: String,
    uri: String,
    version_major: u32,
    version_minor: u32,
    version_digits: usize,
    status: u32,
    status_digits: usize,
    reason: String,
    /// Keyed by lowercase name.
    headers: HashMap<String, Header>,
    /// Header currently being read; committed when the next one starts.
    pending: Option<Header>,
}

impl Default for HttpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpParser {
    pub fn new() -> Self {
        Self {
            state: State::Init,
            kind: None,
            method: String::new(),
            uri: String::new(),
            version_major: 0,
            version_minor: 0,
            version_digits: 0,
            status: 0,
            status_digits: 0,
            reason: String::new(),
            headers: HashMap::new(),
            pending: None,
        }
    }

    /// Discard any partial or completed message.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Find the end of a complete header block in `buf`.
    ///
    /// Leading CR/LF bytes are skipped. The block ends at the first pair of
    /// line feeds separated only by carriage returns, so both `\r\n\r\n` and
    /// `\n\n` terminate it. Returns the offset just past the terminator.
    pub fn is_complete_message(buf: &[u8]) -> Option<usize> {
        let start = buf
            .iter()
            .position(|&b| b != b'\r' && b != b'\n')
            .unwrap_or(buf.len());

        let mut seen_lf = false;
        for (i, &b) in buf.iter().enumerate().skip(start) {
            match b {
                b'\n' if seen_lf => return Some(i + 1),
                b'\n' => seen_lf = true,
                b'\r' => {}
                _ => seen_lf = false,
            }
        }
        None
    }

    /// Feed bytes to the parser.
    ///
    /// Returns `Ok(true)` once the header block is complete; bytes past the
    /// terminator are not examined. Calling `parse` again after completion
    /// starts a new message.
    pub fn parse(&mut self, buf: &[u8]) -> Result<bool> {
        if self.state == State::Complete {
            self.reset();
        }

        for &ch in buf {
            self.step(ch)?;
            if self.state == State::Complete {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the last message was fully parsed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    fn step(&mut self, ch: u8) -> Result<()> {
        self.state = match self.state {
            State::Init => match ch {
                b'\r' | b'\n' => State::Init,
                b'H' => {
                    self.method.push('H');
                    State::TypeCheck
                }
                b'A'..=b'Z' => {
                    self.kind = Some(HttpMessageKind::Request);
                    self.method.push(char::from(ch));
                    State::Method
                }
                _ => return Err(Error::protocol("malformed request or response")),
            },
            State::TypeCheck => match ch {
                b'T' => {
                    self.kind = Some(HttpMessageKind::Response);
                    self.method.clear();
                    State::Version(2)
                }
                b'A'..=b'Z' => {
                    self.kind = Some(HttpMessageKind::Request);
                    self.method.push(char::from(ch));
                    State::Method
                }
                b' ' => {
                    self.kind = Some(HttpMessageKind::Request);
                    State::Uri
                }
                _ => return Err(Error::protocol("malformed request or response")),
            },
            State::Method => match ch {
                b' ' => State::Uri,
                b'A'..=b'Z' => {
                    self.method.push(char::from(ch));
                    State::Method
                }
                _ => return Err(Error::protocol("invalid character in request method")),
            },
            State::Uri => match ch {
                b' ' if self.uri.is_empty() => return Err(Error::protocol("empty request URI")),
                b' ' => State::Version(0),
                b'\r' | b'\n' => return Err(Error::protocol("malformed request line")),
                _ => {
                    self.uri.push(char::from(ch));
                    State::Uri
                }
            },
            State::Version(i) => {
                if ch != VERSION_PREFIX[i] {
                    return Err(Error::protocol("malformed HTTP version"));
                }
                if i + 1 == VERSION_PREFIX.len() {
                    self.version_digits = 0;
                    State::VersionMajor
                } else {
                    State::Version(i + 1)
                }
            }
            State::VersionMajor => match ch {
                b'0'..=b'9' => {
                    self.version_major = self.push_digit(self.version_major, ch)?;
                    State::VersionMajor
                }
                b'.' if self.version_digits > 0 => {
                    self.version_digits = 0;
                    State::VersionMinor
                }
                _ => return Err(Error::protocol("malformed HTTP version")),
            },
            State::VersionMinor => match (ch, self.kind) {
                (b'0'..=b'9', _) => {
                    self.version_minor = self.push_digit(self.version_minor, ch)?;
                    State::VersionMinor
                }
                _ if self.version_digits == 0 => {
                    return Err(Error::protocol("malformed HTTP version"))
                }
                (b'\r', Some(HttpMessageKind::Request)) => State::RequestLf,
                (b'\n', Some(HttpMessageKind::Request)) => State::HeaderFieldStart,
                (b' ', Some(HttpMessageKind::Response)) => {
                    self.status_digits = 0;
                    State::Status
                }
                _ => return Err(Error::protocol("malformed HTTP version")),
            },
            State::RequestLf | State::ResponseLf | State::HeaderFieldLf => match ch {
                b'\n' => State::HeaderFieldStart,
                _ => return Err(Error::protocol("expected LF after CR")),
            },
            State::Status => match ch {
                b'0'..=b'9' if self.status_digits < 3 => {
                    self.status = self.status * 10 + u32::from(ch - b'0');
                    self.status_digits += 1;
                    State::Status
                }
                _ if self.status_digits != 3 => return Err(Error::protocol("malformed status code")),
                b' ' => State::Reason,
                b'\r' => State::ResponseLf,
                b'\n' => State::HeaderFieldStart,
                _ => return Err(Error::protocol("malformed status code")),
            },
            State::Reason => match ch {
                b'\r' => State::ResponseLf,
                b'\n' => State::HeaderFieldStart,
                _ => {
                    self.reason.push(char::from(ch));
                    State::Reason
                }
            },
            State::HeaderFieldStart => match ch {
                b'\r' => State::HeaderEndLf,
                b'\n' => {
                    self.commit_header();
                    State::Complete
                }
                b' ' | b'\t' => match self.pending.as_mut() {
                    Some(header) => {
                        if !header.value.is_empty() {
                            header.value.push(' ');
                        }
                        State::HeaderFieldValueStart
                    }
                    None => return Err(Error::protocol("continuation line without header")),
                },
                b':' => return Err(Error::protocol("empty header name")),
                _ => {
                    self.commit_header();
                    self.pending = Some(Header {
                        name: char::from(ch).to_string(),
                        value: String::new(),
                    });
                    State::HeaderFieldName
                }
            },
            State::HeaderFieldName => match ch {
                b':' => State::HeaderFieldValueStart,
                b' ' | b'\t' => State::HeaderFieldNameEnd,
                b'\r' | b'\n' => return Err(Error::protocol("header field without value")),
                _ => {
                    if let Some(header) = self.pending.as_mut() {
                        header.name.push(char::from(ch));
                    }
                    State::HeaderFieldName
                }
            },
            State::HeaderFieldNameEnd => match ch {
                b' ' | b'\t' => State::HeaderFieldNameEnd,
                b':' => State::HeaderFieldValueStart,
                _ => return Err(Error::protocol("malformed header name")),
            },
            State::HeaderFieldValueStart => match ch {
                b' ' | b'\t' => State::HeaderFieldValueStart,
                b'\r' => State::HeaderFieldLf,
                b'\n' => State::HeaderFieldStart,
                _ => {
                    self.push_value(ch);
                    State::HeaderFieldValue
                }
            },
            State::HeaderFieldValue => match ch {
                b'\r' => State::HeaderFieldLf,
                b'\n' => State::HeaderFieldStart,
                _ => {
                    self.push_value(ch);
                    State::HeaderFieldValue
                }
            },
            State::HeaderEndLf => match ch {
                b'\n' => {
                    self.commit_header();
                    State::Complete
                }
                _ => return Err(Error::protocol("expected LF after CR")),
            },
            State::Complete => State::Complete,
        };
        Ok(())
    }

    fn push_digit(&mut self, current: u32, ch: u8) -> Result<u32> {
        self.version_digits += 1;
        current
            .checked_mul(10)
            .and_then(|v| v.checked_add(u32::from(ch - b'0')))
            .ok_or_else(|| Error::protocol("HTTP version out of range"))
    }

    fn push_value(&mut self, ch: u8) {
        if let Some(header) = self.pending.as_mut() {
            header.value.push(char::from(ch));
        }
    }

    /// Store the pending header; repeated names are joined with ", ".
    fn commit_header(&mut self) {
        let Some(mut header) = self.pending.take() else {
            return;
        };
        let trimmed = header.value.trim_end().len();
        header.value.truncate(trimmed);

        let key = header.name.to_ascii_lowercase();
        match self.headers.get_mut(&key) {
            Some(existing) => {
                existing.value.push_str(", ");
                existing.value.push_str(&header.value);
            }
            None => {
                self.headers.insert(key, header);
            }
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn kind(&self) -> Option<HttpMessageKind> {
        self.kind
    }

    /// Request method, empty for responses.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request URI, empty for responses.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// `(major, minor)` protocol version.
    pub fn version(&self) -> (u32, u32) {
        (self.version_major, self.version_minor)
    }

    /// Response status code, 0 for requests.
    pub fn status(&self) -> u32 {
        self.status
    }

    /// Response reason phrase.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|h| h.value.as_str())
    }

    /// Header value converted to lowercase, for token comparisons.
    pub fn header_lowercase(&self, name: &str) -> Option<String> {
        self.header(name).map(str::to_ascii_lowercase)
    }

    /// Whether a comma-separated header contains `token` (case-insensitive).
    pub fn header_contains_token(&self, name: &str, token: &str) -> bool {
        self.header(name).is_some_and(|value| {
            value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case(token))
        })
    }

    /// Headers with their names as received.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .values()
            .map(|h| (h.name.as_str(), h.value.as_str()))
    }
}

impl fmt::Debug for HttpParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpParser")
            .field("state", &self.state)
            .field("kind", &self.kind)
            .field("headers", &self.headers.len())
            .finish()
    }
}
