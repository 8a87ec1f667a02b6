//! End-to-end verification dialogues against the sans-IO session
//!
//! Each test plays the client role with its own frame codec: it frames
//! serverbound packets, parses the gateway's outbound byte stream (including
//! the compression switch mid-login), and walks the limbo world exactly like
//! a vanilla client would.

use bytes::{Buf, BufMut, BytesMut};
use std::sync::Arc;
use turnstile::limbo::motion::MotionTable;
use turnstile::limbo::{Assets, FailReason, Session, Verdict};
use turnstile::protocol::frame::{DecodeResult, FrameCodec};
use turnstile::protocol::wire;
use turnstile::{Config, ProtocolVersion};
use uuid::Uuid;

const LOGIN_SET_COMPRESSION: i32 = 0x03;

struct TestClient {
    version: ProtocolVersion,
    codec: FrameCodec,
    session: Session,
    /// Clientbound packets parsed so far, in order.
    received: Vec<(i32, Vec<u8>)>,
    /// True until LoginSuccess has been seen (SetCompression interpretation).
    in_login: bool,
}

impl TestClient {
    fn new(config: Config, version: ProtocolVersion) -> Self {
        let config = Arc::new(config);
        let assets = Arc::new(Assets::prepare(&config));
        let session = Session::new(config.clone(), assets, "10.0.0.1".parse().unwrap(), version);
        Self {
            version,
            codec: FrameCodec::new(1 << 20),
            session,
            received: Vec::new(),
            in_login: true,
        }
    }

    fn send(&mut self, id: i32, payload: &[u8]) -> Verdict {
        let framed = self.codec.encode_packet(id, payload).expect("frame");
        let verdict = self.session.receive(&framed);
        self.pump();
        verdict
    }

    /// Parse everything the gateway queued, tracking the compression switch.
    fn pump(&mut self) {
        let mut bytes = BytesMut::from(&self.session.take_outbound()[..]);
        while !bytes.is_empty() {
            match self.codec.decode(&mut bytes).expect("clientbound frame") {
                DecodeResult::Frame(frame) => {
                    if self.in_login && frame.packet_id == LOGIN_SET_COMPRESSION {
                        let mut rd = &frame.payload[..];
                        let threshold = wire::read_varint(&mut rd).expect("threshold");
                        self.codec.enable_compression(threshold as usize);
                    }
                    self.received.push((frame.packet_id, frame.payload.to_vec()));
                }
                DecodeResult::NeedMore => panic!("partial clientbound frame"),
            }
        }
    }

    fn login(&mut self, name: &str) -> Verdict {
        let mut payload = BytesMut::new();
        wire::write_string(&mut payload, name);
        if self.version >= ProtocolVersion::V1_20_2 {
            payload.put_slice(Uuid::from_u128(0xA11CE).as_bytes());
        }
        let verdict = self.send(0x00, &payload);
        self.in_login = false;
        verdict
    }

    /// Extract the token from the last clientbound keep-alive.
    fn keep_alive_token(&self, keep_alive_id: i32) -> i64 {
        let (_, payload) = self
            .received
            .iter()
            .rev()
            .find(|(id, _)| *id == keep_alive_id)
            .expect("keep-alive sent");
        let mut rd = &payload[..];
        if self.version <= ProtocolVersion::V1_7_6 {
            i64::from(rd.get_i32())
        } else if self.version < ProtocolVersion::V1_12_2 {
            i64::from(wire::read_varint(&mut rd).expect("token"))
        } else {
            rd.get_i64()
        }
    }

    fn send_position(&mut self, id: i32, y: f64, on_ground: bool) -> Verdict {
        let mut payload = BytesMut::new();
        payload.put_f64(8.5);
        payload.put_f64(y);
        payload.put_f64(8.5);
        payload.put_u8(on_ground as u8);
        self.send(id, &payload)
    }
}

/// Y positions a legitimate client reports: the exact gravity curve down to
/// the last airborne tick.
fn fall_curve(window: usize) -> Vec<f64> {
    let motion = MotionTable::build(window);
    let mut curve = Vec::new();
    let mut i = 0;
    while motion.expected_y(i) >= 256.0 {
        curve.push(motion.expected_y(i));
        i += 1;
    }
    curve
}

// =============================================================================
// HAPPY PATHS
// =============================================================================

#[test]
fn test_happy_path_v1_20_2() {
    let mut client = TestClient::new(Config::default(), ProtocolVersion::V1_20_2);

    assert_eq!(client.login("Alice"), Verdict::Pending);
    // SetCompression then LoginSuccess
    assert_eq!(client.received[0].0, LOGIN_SET_COMPRESSION);
    assert_eq!(client.received[1].0, 0x02);

    // Configuration phase: LoginAcknowledged → registry sync + finish
    assert_eq!(client.send(0x03, &[]), Verdict::Pending);
    let ids: Vec<i32> = client.received.iter().map(|(id, _)| *id).collect();
    assert!(ids.contains(&0x05), "registry data expected, got {ids:?}");
    assert!(ids.contains(&0x02), "finish configuration expected");

    assert_eq!(client.send(0x02, &[]), Verdict::Pending);
    // Play batch: JoinGame, abilities, teleport, chunk, platform, keep-alive
    let ids: Vec<i32> = client.received.iter().map(|(id, _)| *id).collect();
    for expected in [0x29, 0x36, 0x3E, 0x25, 0x45, 0x24] {
        assert!(ids.contains(&expected), "expected {expected:#04x} in {ids:?}");
    }

    // Echo the keep-alive
    let token = client.keep_alive_token(0x24);
    let mut payload = BytesMut::new();
    payload.put_i64(token);
    assert_eq!(client.send(0x14, &payload), Verdict::Pending);

    // Fall along the exact gravity curve, then land on the platform
    for y in fall_curve(8) {
        assert_eq!(client.send_position(0x16, y, false), Verdict::Pending, "tick at y={y}");
    }
    let verdict = client.send_position(0x16, 256.0, true);
    match verdict {
        Verdict::Success { username, uuid } => {
            assert_eq!(username, "Alice");
            assert_eq!(uuid, Uuid::from_u128(0xA11CE));
        }
        other => panic!("expected success, got {other:?}"),
    }
    // The success disconnect is the final outbound packet
    assert_eq!(client.received.last().map(|(id, _)| *id), Some(0x1B));
}

#[test]
fn test_happy_path_v1_8_legacy_ids() {
    let mut client = TestClient::new(Config::default(), ProtocolVersion::V1_8);

    assert_eq!(client.login("Bob"), Verdict::Pending);
    // No configuration phase: play batch immediately after LoginSuccess
    let ids: Vec<i32> = client.received.iter().map(|(id, _)| *id).collect();
    for expected in [0x01, 0x39, 0x08, 0x21, 0x22, 0x00] {
        assert!(ids.contains(&expected), "expected {expected:#04x} in {ids:?}");
    }

    let token = client.keep_alive_token(0x00);
    let mut payload = BytesMut::new();
    wire::write_varint(&mut payload, token as i32);
    assert_eq!(client.send(0x00, &payload), Verdict::Pending);

    for y in fall_curve(8) {
        assert_eq!(client.send_position(0x04, y, false), Verdict::Pending);
    }
    match client.send_position(0x04, 256.0, true) {
        Verdict::Success { username, uuid } => {
            assert_eq!(username, "Bob");
            // 1.8 clients do not send a UUID; the offline derivation applies
            assert_eq!(uuid, turnstile::offline_uuid("Bob"));
        }
        other => panic!("expected success, got {other:?}"),
    }
}

// =============================================================================
// GRAVITY FAILURES
// =============================================================================

fn falling_client(version: ProtocolVersion, max_ignored: usize) -> (TestClient, i32) {
    let mut config = Config::default();
    config.enable_compression = false;
    config.max_ignored_ticks = max_ignored;
    let mut client = TestClient::new(config, version);
    client.login("Mallory");
    let token = client.keep_alive_token(0x00);
    let mut payload = BytesMut::new();
    wire::write_varint(&mut payload, token as i32);
    client.send(0x00, &payload);
    (client, 0x04) // serverbound position id for 1.8
}

#[test]
fn test_hovering_bot_fails_gravity() {
    let (mut client, pos_id) = falling_client(ProtocolVersion::V1_8, 2);
    let motion = MotionTable::build(8);

    // Three honest ticks, then freeze mid-air
    for i in 0..3 {
        assert_eq!(client.send_position(pos_id, motion.expected_y(i), false), Verdict::Pending);
    }
    let frozen = motion.expected_y(2);
    // Each repeat burns one ignored tick; the budget of 2 breaks on the third
    assert_eq!(client.send_position(pos_id, frozen, false), Verdict::Pending);
    assert_eq!(client.send_position(pos_id, frozen, false), Verdict::Pending);
    match client.send_position(pos_id, frozen, false) {
        Verdict::Failed(FailReason::GravityViolation { .. }) => {}
        other => panic!("expected gravity violation, got {other:?}"),
    }
}

#[test]
fn test_wrong_y_fails_immediately() {
    let (mut client, pos_id) = falling_client(ProtocolVersion::V1_8, 5);
    let motion = MotionTable::build(8);

    assert_eq!(client.send_position(pos_id, motion.expected_y(0), false), Verdict::Pending);
    // A full block off the curve matches no probe
    match client.send_position(pos_id, motion.expected_y(1) - 1.0, false) {
        Verdict::Failed(FailReason::GravityViolation { .. }) => {}
        other => panic!("expected gravity violation, got {other:?}"),
    }
}

#[test]
fn test_instant_landing_skips_the_fall() {
    let (mut client, pos_id) = falling_client(ProtocolVersion::V1_8, 5);
    // Claiming on_ground at the platform top without having fallen
    match client.send_position(pos_id, 256.0, true) {
        Verdict::Failed(FailReason::GravityViolation { .. }) => {}
        other => panic!("expected gravity violation, got {other:?}"),
    }
}

#[test]
fn test_landing_off_platform_misses_collision() {
    let mut config = Config::default();
    config.enable_compression = false;
    let mut client = TestClient::new(config, ProtocolVersion::V1_8);
    client.login("Edge");
    let token = client.keep_alive_token(0x00);
    let mut payload = BytesMut::new();
    wire::write_varint(&mut payload, token as i32);
    client.send(0x00, &payload);

    for y in fall_curve(8) {
        client.send_position(0x04, y, false);
    }
    // Correct height, but X/Z outside the 8×8 platform bounds
    let mut payload = BytesMut::new();
    payload.put_f64(100.0);
    payload.put_f64(256.0);
    payload.put_f64(100.0);
    payload.put_u8(1);
    match client.send(0x04, &payload) {
        Verdict::Failed(FailReason::CollisionMissed) => {}
        other => panic!("expected collision miss, got {other:?}"),
    }
}

// =============================================================================
// METADATA AND BOUNDARIES
// =============================================================================

#[test]
fn test_username_boundaries() {
    for (name, ok) in [("A", true), ("exactly_sixteen_", true), ("seventeen_chars__", false)] {
        let mut config = Config::default();
        config.enable_compression = false;
        let mut client = TestClient::new(config, ProtocolVersion::V1_8);
        let verdict = client.login(name);
        if ok {
            assert_eq!(verdict, Verdict::Pending, "{name} should pass");
        } else {
            assert_eq!(verdict, Verdict::Failed(FailReason::InvalidUsername), "{name}");
        }
    }
}

#[test]
fn test_bad_locale_fails_whenever_it_arrives() {
    let (mut client, _) = falling_client(ProtocolVersion::V1_8, 5);
    // Serverbound ClientSettings on 1.8 is 0x15
    let mut payload = BytesMut::new();
    wire::write_string(&mut payload, "!!bad!!");
    payload.put_i8(2);
    payload.put_u8(0);
    payload.put_u8(1);
    payload.put_u8(0x7F);
    assert_eq!(client.send(0x15, &payload), Verdict::Failed(FailReason::InvalidLocale));
}

#[test]
fn test_bad_brand_fails() {
    let (mut client, _) = falling_client(ProtocolVersion::V1_8, 5);
    // Serverbound PluginMessage on 1.8 is 0x17; brand payload is a string
    let mut payload = BytesMut::new();
    wire::write_string(&mut payload, "MC|Brand");
    let mut brand = BytesMut::new();
    wire::write_string(&mut brand, "bad\u{1}brand");
    payload.put_slice(&brand);
    assert_eq!(client.send(0x17, &payload), Verdict::Failed(FailReason::InvalidBrand));
}

#[test]
fn test_unknown_play_ids_are_ignored() {
    let (mut client, pos_id) = falling_client(ProtocolVersion::V1_8, 5);
    // Entity action, chat, arm swing: ids the gateway never registered
    for id in [0x0B_i32, 0x01, 0x0A] {
        assert_eq!(client.send(id, &[1, 2, 3]), Verdict::Pending, "id {id:#04x}");
    }
    // The session is still falling normally afterwards
    let motion = MotionTable::build(8);
    assert_eq!(client.send_position(pos_id, motion.expected_y(0), false), Verdict::Pending);
}
