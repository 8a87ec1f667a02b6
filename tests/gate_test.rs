//! Admission pipeline tests over real TCP
//!
//! Run with: cargo test --test gate_test

use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use turnstile::net::LogSink;
use turnstile::protocol::frame::{DecodeResult, FrameCodec};
use turnstile::protocol::wire;
use turnstile::{Config, Gateway};

async fn start_gateway(mut config: Config) -> Gateway {
    // Loopback tests reconnect rapidly on purpose
    config.reconnect_delay_ms = 0;
    Gateway::bind("127.0.0.1:0".parse().unwrap(), Arc::new(config), Arc::new(LogSink))
        .await
        .expect("bind")
}

async fn connect(gateway: &Gateway) -> TcpStream {
    TcpStream::connect(gateway.local_addr()).await.expect("connect")
}

async fn send_handshake_and_login(stream: &mut TcpStream, protocol: i32, name: &str) {
    let codec = FrameCodec::new(1 << 20);
    let mut payload = BytesMut::new();
    wire::write_varint(&mut payload, protocol);
    wire::write_string(&mut payload, "localhost");
    payload.put_u16(25565);
    wire::write_varint(&mut payload, 2);
    let handshake = codec.encode_packet(0x00, &payload).unwrap();

    let mut payload = BytesMut::new();
    wire::write_string(&mut payload, name);
    if protocol >= 764 {
        payload.put_slice(uuid::Uuid::from_u128(0xBEEF).as_bytes());
    }
    let login = codec.encode_packet(0x00, &payload).unwrap();

    stream.write_all(&handshake).await.unwrap();
    stream.write_all(&login).await.unwrap();
}

/// Read until the first complete frame arrives, returning (id, payload).
async fn read_frame(stream: &mut TcpStream) -> Option<(i32, Vec<u8>)> {
    let codec = FrameCodec::new(1 << 20);
    let mut buffer = BytesMut::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Ok(DecodeResult::Frame(frame)) = codec.decode(&mut buffer) {
            return Some((frame.packet_id, frame.payload.to_vec()));
        }
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut chunk))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

fn disconnect_text(payload: &[u8]) -> String {
    let mut rd = &payload[..];
    wire::read_string(&mut rd, 32_767).expect("component")
}

#[tokio::test]
async fn test_version_gate_rejects_out_of_range() {
    let gateway = start_gateway(Config::default()).await;

    for protocol in [3, 9999] {
        let mut stream = connect(&gateway).await;
        send_handshake_and_login(&mut stream, protocol, "Probe").await;
        let (id, payload) = read_frame(&mut stream).await.expect("disconnect");
        assert_eq!(id, 0x00, "login disconnect id");
        assert!(
            disconnect_text(&payload).contains("version"),
            "protocol {protocol} should be version-rejected"
        );
    }
    assert_eq!(gateway.gate().active_sessions(), 0);
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_fast_reconnect_rejected() {
    let mut config = Config::default();
    config.reconnect_delay_ms = 8000;
    // Bypass the start_gateway zeroing for this test
    let gateway = Gateway::bind(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(config),
        Arc::new(LogSink),
    )
    .await
    .expect("bind");

    let mut first = connect(&gateway).await;
    send_handshake_and_login(&mut first, 47, "First").await;
    // First connection enters verification and starts receiving packets
    assert!(read_frame(&mut first).await.is_some());
    drop(first);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let mut second = connect(&gateway).await;
    send_handshake_and_login(&mut second, 47, "Second").await;
    let (_, payload) = read_frame(&mut second).await.expect("disconnect");
    assert!(disconnect_text(&payload).contains("fast"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_blacklist_after_consecutive_failures() {
    let mut config = Config::default();
    config.blacklist_threshold = 2;
    config.verify_timeout_ms = 200;
    config.read_timeout_ms = 300;
    let gateway = start_gateway(config).await;

    // Two sessions that time out without ever verifying
    for _ in 0..2 {
        let mut stream = connect(&gateway).await;
        send_handshake_and_login(&mut stream, 47, "Bot").await;
        // Drain until the gateway gives up on us
        while read_frame(&mut stream).await.is_some() {}
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(gateway.gate().blacklist_size().await >= 1);

    let mut stream = connect(&gateway).await;
    send_handshake_and_login(&mut stream, 47, "Bot").await;
    let (_, payload) = read_frame(&mut stream).await.expect("disconnect");
    assert!(
        disconnect_text(&payload).contains("blocked"),
        "third attempt should hit the blacklist"
    );
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_lockdown_refuses_everyone() {
    let mut config = Config::default();
    config.lockdown = true;
    let gateway = start_gateway(config).await;

    let mut stream = connect(&gateway).await;
    send_handshake_and_login(&mut stream, 47, "Anyone").await;
    let (_, payload) = read_frame(&mut stream).await.expect("disconnect");
    assert!(disconnect_text(&payload).contains("locked"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn test_status_ping_served_without_admission() {
    let gateway = start_gateway(Config::default()).await;
    let mut stream = connect(&gateway).await;

    let codec = FrameCodec::new(1 << 20);
    let mut payload = BytesMut::new();
    wire::write_varint(&mut payload, 764);
    wire::write_string(&mut payload, "localhost");
    payload.put_u16(25565);
    wire::write_varint(&mut payload, 1); // status
    stream.write_all(&codec.encode_packet(0x00, &payload).unwrap()).await.unwrap();
    stream.write_all(&codec.encode_packet(0x00, &[]).unwrap()).await.unwrap();

    let (id, payload) = read_frame(&mut stream).await.expect("status response");
    assert_eq!(id, 0x00);
    let body = disconnect_text(&payload);
    assert!(body.contains("\"protocol\""));
    assert_eq!(gateway.gate().active_sessions(), 0);
    gateway.shutdown().await;
}
