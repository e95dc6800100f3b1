// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use libfuzzer_sys::fuzz_target;
use frost::transport::byte_stream::mock::MockStream;
use frost::transport::ws::{FrameHeader, WsConfig, WsSocket};

const UPGRADE_REQUEST: &[u8] = b"GET / HTTP/1.1\r\n\
    Host: localhost\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Protocol: frost.rpc\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    \r\n";

fuzz_target!(|data: &[u8]| {
    // Fuzz the frame header decoder
    let _ = FrameHeader::decode(data);

    // Fuzz an open server socket receiving arbitrary frame bytes
    let stream = MockStream::new();
    let peer = stream.handle();
    let mut socket = WsSocket::server(stream, WsConfig::default().with_max_frame_size(64 * 1024));
    peer.feed(UPGRADE_REQUEST);
    if !matches!(socket.initialize(), Ok(true)) {
        return;
    }
    peer.feed(data);
    peer.close_read();
    for _ in 0..64 {
        if socket.recv_message().is_err() {
            break;
        }
    }
});
