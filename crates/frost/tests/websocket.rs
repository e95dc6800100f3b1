// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! WebSocket endpoints over in-memory non-blocking streams.

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use frost::transport::byte_stream::mock::{MockHandle, MockStream};
use frost::transport::ws::frame::{apply_mask, CLOSURE_NORMAL, CLOSURE_SHUTDOWN};
use frost::transport::ws::{
    FrameHeader, Incoming, Opcode, Received, SocketState, WsConfig, WsSocket,
};
use frost::Error;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

const UPGRADE_REQUEST: &str = "GET /rpc HTTP/1.1\r\n\
    Host: 127.0.0.1:4061\r\n\
    Upgrade: websocket\r\n\
    Connection: Upgrade\r\n\
    Sec-WebSocket-Protocol: frost.rpc\r\n\
    Sec-WebSocket-Version: 13\r\n\
    Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
    \r\n";

/// Client and server wired back to back, handshake done.
fn connected(config: WsConfig) -> (WsSocket<MockStream>, WsSocket<MockStream>) {
    let (a, b) = MockStream::pair();
    let mut client = WsSocket::client(a, config.clone());
    let mut server = WsSocket::server(b, config);
    assert!(!client.initialize().expect("request queued"));
    assert!(server.initialize().expect("request accepted"));
    assert!(client.initialize().expect("response accepted"));
    assert!(client.is_open() && server.is_open());
    (client, server)
}

/// Server socket with a raw handle standing in for the client.
fn raw_client(config: WsConfig) -> (WsSocket<MockStream>, MockHandle) {
    let stream = MockStream::new();
    let peer = stream.handle();
    let mut server = WsSocket::server(stream, config);
    peer.feed(UPGRADE_REQUEST.as_bytes());
    assert!(server.initialize().expect("handshake"));
    peer.take_written();
    (server, peer)
}

fn masked_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mask = [0xA1, 0xB2, 0xC3, 0xD4];
    let mut out = Vec::new();
    FrameHeader::new(opcode, fin, payload.len() as u64)
        .with_mask(mask)
        .encode(&mut out)
        .expect("header");
    let start = out.len();
    out.extend_from_slice(payload);
    apply_mask(&mut out[start..], mask, 0);
    out
}

// ============================================================================
// Fragmentation
// ============================================================================

#[test]
fn test_fragments_are_reassembled() {
    init_logging();
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Data, false, b"frag"));
    peer.feed(&masked_frame(Opcode::Continuation, false, b"mented "));
    peer.feed(&masked_frame(Opcode::Continuation, true, b"message"));
    assert_eq!(
        server.recv_message().expect("message"),
        Incoming::Message(b"fragmented message".to_vec())
    );
    assert_eq!(server.recv_message().expect("drained"), Incoming::WouldBlock);
}

#[test]
fn test_only_last_fragment_ends_the_message() {
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Data, false, b"abc"));
    peer.feed(&masked_frame(Opcode::Continuation, true, b"def"));

    let mut buf = [0u8; 64];
    assert_eq!(
        server.recv(&mut buf).expect("first"),
        Received::Data {
            len: 3,
            end_of_message: false
        }
    );
    assert_eq!(&buf[..3], b"abc");
    assert_eq!(
        server.recv(&mut buf).expect("second"),
        Received::Data {
            len: 3,
            end_of_message: true
        }
    );
    assert_eq!(&buf[..3], b"def");
}

#[test]
fn test_data_frame_inside_fragmented_message_is_rejected() {
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Data, false, b"first"));
    peer.feed(&masked_frame(Opcode::Data, true, b"second"));
    let err = server.recv_message().unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{}", err);
}

#[test]
fn test_continuation_without_start_is_rejected() {
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Continuation, true, b"orphan"));
    assert!(server.recv_message().unwrap_err().is_invalid_data());
}

#[test]
fn test_partial_frame_waits_for_more_bytes() {
    let (mut server, peer) = raw_client(WsConfig::default());
    let frame = masked_frame(Opcode::Data, true, &[7u8; 300]);
    for chunk in frame.chunks(17) {
        assert_eq!(server.recv_message().expect("partial"), Incoming::WouldBlock);
        peer.feed(chunk);
    }
    assert_eq!(server.recv_message().expect("complete"), Incoming::Message(vec![7u8; 300]));
}

// ============================================================================
// Messages
// ============================================================================

#[test]
fn test_messages_flow_both_ways() {
    init_logging();
    let (mut client, mut server) = connected(WsConfig::default());
    for size in [0usize, 1, 125, 126, 65_535, 65_536, 200_000] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        assert!(client.send(&payload).expect("client send"));
        assert_eq!(server.recv_message().expect("server recv"), Incoming::Message(payload.clone()));
        assert!(server.send(&payload).expect("server send"));
        assert_eq!(client.recv_message().expect("client recv"), Incoming::Message(payload));
    }
}

#[test]
fn test_back_pressure_keeps_frames_in_order() {
    let (a, b) = MockStream::pair();
    let writer = a.handle();
    let mut client = WsSocket::client(a, WsConfig::default());
    let mut server = WsSocket::server(b, WsConfig::default());
    assert!(!client.initialize().expect("request"));
    assert!(server.initialize().expect("accept"));
    assert!(client.initialize().expect("open"));

    writer.set_write_budget(Some(10));
    assert!(!client.send(b"first message").expect("queued"));
    assert!(!client.ping(b"p").expect("queued behind"));
    assert!(!client.send(b"second message").expect("queued behind"));
    assert!(client.wants_write());

    writer.set_write_budget(None);
    assert!(client.flush().expect("drained"));
    assert!(!client.wants_write());
    assert_eq!(server.recv_message().expect("1"), Incoming::Message(b"first message".to_vec()));
    assert_eq!(server.recv_message().expect("2"), Incoming::Message(b"second message".to_vec()));
}

#[test]
fn test_oversized_messages() {
    let config = WsConfig::default().with_max_frame_size(1024);
    let (mut client, _server) = connected(config.clone());
    assert!(matches!(
        client.send(&[0u8; 1025]).unwrap_err(),
        Error::FrameTooLarge { size: 1025, max: 1024 }
    ));

    // Fragments that add up past the limit are rejected as well.
    let (mut server, peer) = raw_client(config);
    peer.feed(&masked_frame(Opcode::Data, false, &[1u8; 800]));
    peer.feed(&masked_frame(Opcode::Continuation, true, &[2u8; 800]));
    assert!(matches!(server.recv_message().unwrap_err(), Error::FrameTooLarge { .. }));
}

#[test]
fn test_send_before_handshake_fails() {
    let (a, _b) = MockStream::pair();
    let mut client = WsSocket::client(a, WsConfig::default());
    assert!(client.send(b"early").unwrap_err().is_invalid_data());
}

// ============================================================================
// Control frames
// ============================================================================

#[test]
fn test_ping_is_answered_with_pong() {
    let (mut client, mut server) = connected(WsConfig::default());
    assert!(client.ping(b"are you there").expect("ping"));
    assert_eq!(server.recv_message().expect("ping consumed"), Incoming::WouldBlock);
    // The pong is consumed silently on the client.
    assert_eq!(client.recv_message().expect("pong consumed"), Incoming::WouldBlock);

    // Control frames may sit between fragments of a message.
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Data, false, b"one "));
    peer.feed(&masked_frame(Opcode::Ping, true, b"hb"));
    peer.feed(&masked_frame(Opcode::Continuation, true, b"two"));
    assert_eq!(server.recv_message().expect("message"), Incoming::Message(b"one two".to_vec()));
    assert_eq!(peer.take_written(), vec![0x8A, 0x02, b'h', b'b']);
}

#[test]
fn test_fragmented_control_frame_is_rejected() {
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Ping, false, b"x"));
    assert!(server.recv_message().unwrap_err().is_invalid_data());
}

#[test]
fn test_close_handshake_initiated_by_client() {
    init_logging();
    let (mut client, mut server) = connected(WsConfig::default());
    assert!(client.close(CLOSURE_NORMAL).expect("close sent"));
    assert_eq!(client.state(), SocketState::Closing);
    assert!(client.send(b"late").is_err());

    assert_eq!(server.recv_message().expect("close received"), Incoming::Closed);
    assert_eq!(server.state(), SocketState::Closed);
    assert_eq!(server.close_code(), Some(CLOSURE_NORMAL));

    assert_eq!(client.recv_message().expect("echo received"), Incoming::Closed);
    assert_eq!(client.state(), SocketState::Closed);
    assert_eq!(client.close_code(), Some(CLOSURE_NORMAL));
    assert_eq!(client.recv_message().expect("stays closed"), Incoming::Closed);
}

#[test]
fn test_close_handshake_initiated_by_server() {
    let (mut client, mut server) = connected(WsConfig::default());
    assert!(server.send(b"last words").expect("send"));
    assert!(server.close(CLOSURE_SHUTDOWN).expect("close"));

    assert_eq!(client.recv_message().expect("data first"), Incoming::Message(b"last words".to_vec()));
    assert_eq!(client.recv_message().expect("then close"), Incoming::Closed);
    assert_eq!(client.close_code(), Some(CLOSURE_SHUTDOWN));
    assert_eq!(server.recv_message().expect("echo"), Incoming::Closed);
    assert_eq!(server.close_code(), Some(CLOSURE_SHUTDOWN));
}

#[test]
fn test_peer_disconnect_is_connection_lost() {
    let (mut server, peer) = raw_client(WsConfig::default());
    peer.feed(&masked_frame(Opcode::Data, true, b"bye"));
    peer.close_read();
    assert_eq!(server.recv_message().expect("data"), Incoming::Message(b"bye".to_vec()));
    let err = server.recv_message().unwrap_err();
    assert!(err.is_transport(), "{}", err);
}

// ============================================================================
// Plain TCP
// ============================================================================

/// Drive `step` until it reports completion, sleeping between attempts.
fn poll_until(mut step: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !step() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_non_blocking_std_tcp_streams() {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let client_stream = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
    let (server_stream, _) = listener.accept().expect("accept");
    client_stream.set_nonblocking(true).expect("non-blocking");
    server_stream.set_nonblocking(true).expect("non-blocking");

    let config = WsConfig::default().with_max_frame_size(8 * 1024 * 1024);
    let mut client = WsSocket::client(client_stream, config.clone());
    let mut server = WsSocket::server(server_stream, config);
    poll_until(|| {
        let client_open = client.initialize().expect("client handshake");
        let server_open = server.initialize().expect("server handshake");
        client_open && server_open
    });

    // Large enough to fill the socket buffers and need several flushes.
    let payload: Vec<u8> = (0..4_000_000u32).map(|i| (i % 253) as u8).collect();
    let mut flushed = client.send(&payload).expect("send");
    let mut received = None;
    poll_until(|| {
        if !flushed {
            flushed = client.flush().expect("flush");
        }
        if received.is_none() {
            if let Incoming::Message(m) = server.recv_message().expect("recv") {
                received = Some(m);
            }
        }
        flushed && received.is_some()
    });
    assert_eq!(received, Some(payload));

    assert!(server.close(CLOSURE_NORMAL).expect("close"));
    poll_until(|| client.recv_message().expect("close frame") == Incoming::Closed);
    poll_until(|| server.recv_message().expect("close echo") == Incoming::Closed);
    assert_eq!(server.close_code(), Some(CLOSURE_NORMAL));
}
