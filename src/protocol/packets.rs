//! Typed packets — version-conditional decode and encode
//!
//! Serverbound packets are decoded into [`ServerPacket`]; clientbound
//! payloads are encoded by free functions that write the payload only (the
//! id comes from the registry, the length prefix from the frame codec).
//! Field layouts follow the upstream protocol for 1.7.2 through 1.20.2.

use super::nbt::Tag;
use super::registry::{Direction, PacketType, Phase, Registry};
use super::version::ProtocolVersion;
use super::wire::{self, ProtocolError, MAX_STRING_LEN, MAX_USERNAME_LEN};
use bytes::{Buf, BufMut, BytesMut};
use uuid::Uuid;

/// Server address strings in handshakes are short; Forge suffixes fit in 255.
const MAX_SERVER_ADDRESS_LEN: usize = 255;

/// Plugin message channel identifiers.
const MAX_CHANNEL_LEN: usize = 128;

/// Signature/public-key blobs in 1.19 login packets.
const MAX_KEY_LEN: usize = 4096;

/// A decoded serverbound packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerPacket {
    Handshake {
        protocol: i32,
        address: String,
        port: u16,
        next_state: i32,
    },
    LoginStart {
        username: String,
        uuid: Option<Uuid>,
    },
    LoginAcknowledged,
    ClientInformation {
        locale: String,
    },
    PluginMessage {
        channel: String,
        data: Vec<u8>,
    },
    FinishConfigurationAck,
    KeepAliveResponse {
        token: i64,
    },
    TeleportConfirm {
        teleport_id: i32,
    },
    PlayerPosition {
        x: f64,
        y: f64,
        z: f64,
        on_ground: bool,
    },
    PlayerPositionLook {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
}

impl ServerPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            ServerPacket::Handshake { .. } => PacketType::Handshake,
            ServerPacket::LoginStart { .. } => PacketType::LoginStart,
            ServerPacket::LoginAcknowledged => PacketType::LoginAcknowledged,
            ServerPacket::ClientInformation { .. } => PacketType::ClientInformation,
            ServerPacket::PluginMessage { .. } => PacketType::PluginMessage,
            ServerPacket::FinishConfigurationAck => PacketType::FinishConfigurationAck,
            ServerPacket::KeepAliveResponse { .. } => PacketType::KeepAliveResponse,
            ServerPacket::TeleportConfirm { .. } => PacketType::TeleportConfirm,
            ServerPacket::PlayerPosition { .. } => PacketType::PlayerPosition,
            ServerPacket::PlayerPositionLook { .. } => PacketType::PlayerPositionLook,
        }
    }
}

/// Decode one serverbound packet. `Ok(None)` means an id unknown to the Play
/// table, dropped without decoding. Unknown ids in any earlier phase are
/// fatal.
pub fn decode_packet(
    phase: Phase,
    version: ProtocolVersion,
    id: i32,
    mut payload: &[u8],
) -> Result<Option<ServerPacket>, ProtocolError> {
    let packet_type = match Registry::global().type_of(phase, Direction::Serverbound, version, id) {
        Some(t) => t,
        None if phase == Phase::Play => return Ok(None),
        None => {
            return Err(ProtocolError::UnknownPacketId {
                id,
                context: phase_name(phase),
            })
        }
    };
    let buf = &mut payload;
    let packet = match packet_type {
        PacketType::Handshake => decode_handshake(buf)?,
        PacketType::LoginStart => decode_login_start(buf, version)?,
        PacketType::LoginAcknowledged => ServerPacket::LoginAcknowledged,
        PacketType::ClientInformation => decode_client_information(buf)?,
        PacketType::PluginMessage => decode_plugin_message(buf, version)?,
        PacketType::FinishConfigurationAck => ServerPacket::FinishConfigurationAck,
        PacketType::KeepAliveResponse => ServerPacket::KeepAliveResponse {
            token: decode_keep_alive_token(buf, version)?,
        },
        PacketType::TeleportConfirm => ServerPacket::TeleportConfirm {
            teleport_id: wire::read_varint(buf)?,
        },
        PacketType::PlayerPosition => decode_position(buf, version, false)?,
        PacketType::PlayerPositionLook => decode_position(buf, version, true)?,
        _ => {
            return Err(ProtocolError::UnknownPacketId {
                id,
                context: "clientbound type on serverbound path",
            })
        }
    };
    Ok(Some(packet))
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Handshake => "handshake",
        Phase::Status => "status",
        Phase::Login => "login",
        Phase::Config => "configuration",
        Phase::Play => "play",
    }
}

fn decode_handshake(buf: &mut &[u8]) -> Result<ServerPacket, ProtocolError> {
    let protocol = wire::read_varint(buf)?;
    let address = wire::read_string(buf, MAX_SERVER_ADDRESS_LEN)?;
    if buf.remaining() < 2 {
        return Err(ProtocolError::Malformed("handshake truncated"));
    }
    let port = buf.get_u16();
    let next_state = wire::read_varint(buf)?;
    Ok(ServerPacket::Handshake { protocol, address, port, next_state })
}

fn decode_login_start(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<ServerPacket, ProtocolError> {
    let username = wire::read_string(buf, MAX_USERNAME_LEN)?;

    // 1.19 added an optional signature block, 1.19.1 an optional profile
    // UUID after it, 1.19.3 dropped the signature, 1.20.2 made the UUID
    // mandatory.
    let mut uuid = None;
    if version == ProtocolVersion::V1_19 || version == ProtocolVersion::V1_19_1 {
        if read_bool(buf)? {
            skip(buf, 8)?; // expiry timestamp
            skip_prefixed(buf, MAX_KEY_LEN)?; // public key
            skip_prefixed(buf, MAX_KEY_LEN)?; // signature
        }
    }
    if version >= ProtocolVersion::V1_19_1 && version < ProtocolVersion::V1_20_2 {
        if read_bool(buf)? {
            uuid = Some(read_uuid(buf)?);
        }
    } else if version >= ProtocolVersion::V1_20_2 {
        uuid = Some(read_uuid(buf)?);
    }
    Ok(ServerPacket::LoginStart { username, uuid })
}

/// Only the locale matters to verification; the remaining settings fields
/// (view distance, chat flags, skin parts, main hand, ...) are skipped.
fn decode_client_information(buf: &mut &[u8]) -> Result<ServerPacket, ProtocolError> {
    let locale = wire::read_string(buf, 16)?;
    Ok(ServerPacket::ClientInformation { locale })
}

fn decode_plugin_message(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<ServerPacket, ProtocolError> {
    let channel = wire::read_string(buf, MAX_CHANNEL_LEN)?;
    // 1.7 prefixes the payload with an i16 length; 1.8+ runs to frame end.
    let data = if version <= ProtocolVersion::V1_7_6 {
        if buf.remaining() < 2 {
            return Err(ProtocolError::Malformed("plugin message truncated"));
        }
        let len = buf.get_i16();
        if len < 0 || len as usize != buf.remaining() {
            return Err(ProtocolError::Malformed("plugin message length mismatch"));
        }
        wire::read_byte_array(buf, MAX_STRING_LEN)?
    } else {
        wire::read_byte_array(buf, MAX_STRING_LEN)?
    };
    Ok(ServerPacket::PluginMessage { channel, data })
}

fn decode_keep_alive_token(
    buf: &mut &[u8],
    version: ProtocolVersion,
) -> Result<i64, ProtocolError> {
    if version <= ProtocolVersion::V1_7_6 {
        if buf.remaining() < 4 {
            return Err(ProtocolError::Malformed("keep-alive truncated"));
        }
        Ok(i64::from(buf.get_i32()))
    } else if version < ProtocolVersion::V1_12_2 {
        Ok(i64::from(wire::read_varint(buf)?))
    } else {
        if buf.remaining() < 8 {
            return Err(ProtocolError::Malformed("keep-alive truncated"));
        }
        Ok(buf.get_i64())
    }
}

fn decode_position(
    buf: &mut &[u8],
    version: ProtocolVersion,
    with_look: bool,
) -> Result<ServerPacket, ProtocolError> {
    // 1.7 carries a separate head "stance" double between Y and Z.
    let legacy_stance = version <= ProtocolVersion::V1_7_6;
    let mut need = 8 * 3 + 1;
    if legacy_stance {
        need += 8;
    }
    if with_look {
        need += 4 * 2;
    }
    if buf.remaining() < need {
        return Err(ProtocolError::Malformed("position truncated"));
    }
    let x = buf.get_f64();
    let y = buf.get_f64();
    if legacy_stance {
        let _stance = buf.get_f64();
    }
    let z = buf.get_f64();
    if with_look {
        let yaw = buf.get_f32();
        let pitch = buf.get_f32();
        let on_ground = buf.get_u8() != 0;
        Ok(ServerPacket::PlayerPositionLook { x, y, z, yaw, pitch, on_ground })
    } else {
        let on_ground = buf.get_u8() != 0;
        Ok(ServerPacket::PlayerPosition { x, y, z, on_ground })
    }
}

fn read_bool(buf: &mut &[u8]) -> Result<bool, ProtocolError> {
    if !buf.has_remaining() {
        return Err(ProtocolError::Malformed("bool truncated"));
    }
    Ok(buf.get_u8() != 0)
}

fn read_uuid(buf: &mut &[u8]) -> Result<Uuid, ProtocolError> {
    if buf.remaining() < 16 {
        return Err(ProtocolError::Malformed("uuid truncated"));
    }
    let mut bytes = [0u8; 16];
    buf.copy_to_slice(&mut bytes);
    Ok(Uuid::from_bytes(bytes))
}

fn skip(buf: &mut &[u8], n: usize) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::Malformed("field truncated"));
    }
    buf.advance(n);
    Ok(())
}

fn skip_prefixed(buf: &mut &[u8], cap: usize) -> Result<(), ProtocolError> {
    let len = wire::read_varint(buf)?;
    if len < 0 || len as usize > cap {
        return Err(ProtocolError::Malformed("prefixed field too large"));
    }
    skip(buf, len as usize)
}

// =============================================================================
// CLIENTBOUND ENCODERS
// =============================================================================

/// Disconnect carries a JSON chat component in every phase we disconnect
/// from (login, configuration, play).
pub fn encode_disconnect(buf: &mut BytesMut, reason_json: &str) {
    wire::write_string(buf, reason_json);
}

pub fn encode_set_compression(buf: &mut BytesMut, threshold: i32) {
    wire::write_varint(buf, threshold);
}

/// LoginSuccess UUID encoding changed twice: undashed string (1.7.2-1.7.5),
/// dashed string (1.7.6-1.15.2), raw 128-bit (1.16+). 1.19+ appends an empty
/// property list.
pub fn encode_login_success(
    buf: &mut BytesMut,
    version: ProtocolVersion,
    uuid: Uuid,
    username: &str,
) {
    if version < ProtocolVersion::V1_7_6 {
        wire::write_string(buf, &uuid.simple().to_string());
    } else if version < ProtocolVersion::V1_16 {
        wire::write_string(buf, &uuid.hyphenated().to_string());
    } else {
        buf.put_slice(uuid.as_bytes());
    }
    wire::write_string(buf, username);
    if version >= ProtocolVersion::V1_19 {
        wire::write_varint(buf, 0);
    }
}

/// Configuration-phase registry payload: one nameless root compound.
pub fn encode_registry_data(buf: &mut BytesMut, registries: &Tag) {
    registries.write_nameless(buf);
}

pub fn encode_keep_alive(buf: &mut BytesMut, version: ProtocolVersion, token: i64) {
    if version <= ProtocolVersion::V1_7_6 {
        buf.put_i32(token as i32);
    } else if version < ProtocolVersion::V1_12_2 {
        wire::write_varint(buf, token as i32);
    } else {
        buf.put_i64(token);
    }
}

/// Abilities with flying denied and zeroed speeds; the verifying player must
/// fall under plain gravity.
pub fn encode_abilities(buf: &mut BytesMut) {
    buf.put_u8(0);
    buf.put_f32(0.0);
    buf.put_f32(0.0);
}

/// Teleport the player to the spawn column. Relative-flags byte exists from
/// 1.8, the teleport id from 1.9, the dismount bool only for 1.17-1.19.3.
pub fn encode_sync_position(
    buf: &mut BytesMut,
    version: ProtocolVersion,
    x: f64,
    y: f64,
    z: f64,
    teleport_id: i32,
) {
    buf.put_f64(x);
    // 1.7 sends eye height as stance on the Y field
    if version <= ProtocolVersion::V1_7_6 {
        buf.put_f64(y + 1.62);
    } else {
        buf.put_f64(y);
    }
    buf.put_f64(z);
    buf.put_f32(0.0);
    buf.put_f32(0.0);
    if version <= ProtocolVersion::V1_7_6 {
        buf.put_u8(0); // on ground
        return;
    }
    buf.put_u8(0); // no relative components
    if version >= ProtocolVersion::V1_9 {
        wire::write_varint(buf, teleport_id);
    }
    if version >= ProtocolVersion::V1_17 && version <= ProtocolVersion::V1_19_3 {
        buf.put_u8(0); // dismount vehicle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_play(version: ProtocolVersion, id: i32, payload: &[u8]) -> Option<ServerPacket> {
        decode_packet(Phase::Play, version, id, payload).unwrap()
    }

    #[test]
    fn test_handshake_roundtrip() {
        let mut buf = BytesMut::new();
        wire::write_varint(&mut buf, 764);
        wire::write_string(&mut buf, "play.example.org");
        buf.put_u16(25565);
        wire::write_varint(&mut buf, 2);

        let packet = decode_packet(Phase::Handshake, ProtocolVersion::V1_20_2, 0x00, &buf)
            .unwrap()
            .unwrap();
        assert_eq!(
            packet,
            ServerPacket::Handshake {
                protocol: 764,
                address: "play.example.org".into(),
                port: 25565,
                next_state: 2,
            }
        );
    }

    #[test]
    fn test_login_start_modern_requires_uuid() {
        let mut buf = BytesMut::new();
        wire::write_string(&mut buf, "Alice");
        let uuid = Uuid::from_u128(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        buf.put_slice(uuid.as_bytes());

        let packet = decode_packet(Phase::Login, ProtocolVersion::V1_20_2, 0x00, &buf)
            .unwrap()
            .unwrap();
        assert_eq!(packet, ServerPacket::LoginStart { username: "Alice".into(), uuid: Some(uuid) });

        // Same bytes without the UUID must fail on 1.20.2
        let mut short = BytesMut::new();
        wire::write_string(&mut short, "Alice");
        assert!(decode_packet(Phase::Login, ProtocolVersion::V1_20_2, 0x00, &short).is_err());
    }

    #[test]
    fn test_login_start_legacy_is_name_only() {
        let mut buf = BytesMut::new();
        wire::write_string(&mut buf, "Alice");
        let packet = decode_packet(Phase::Login, ProtocolVersion::V1_8, 0x00, &buf)
            .unwrap()
            .unwrap();
        assert_eq!(packet, ServerPacket::LoginStart { username: "Alice".into(), uuid: None });
    }

    #[test]
    fn test_unknown_play_id_dropped_unknown_login_id_fatal() {
        assert_eq!(decode_play(ProtocolVersion::V1_8, 0x7E, &[]), None);
        assert!(matches!(
            decode_packet(Phase::Login, ProtocolVersion::V1_8, 0x7E, &[]),
            Err(ProtocolError::UnknownPacketId { id: 0x7E, .. })
        ));
    }

    #[test]
    fn test_position_legacy_stance_skipped() {
        let mut buf = BytesMut::new();
        buf.put_f64(8.5);
        buf.put_f64(263.0);
        buf.put_f64(264.62); // stance
        buf.put_f64(8.5);
        buf.put_u8(0);

        // 0x04 is serverbound PlayerPosition on 1.7
        let packet = decode_play(ProtocolVersion::V1_7_2, 0x04, &buf).unwrap();
        assert_eq!(
            packet,
            ServerPacket::PlayerPosition { x: 8.5, y: 263.0, z: 8.5, on_ground: false }
        );
    }

    #[test]
    fn test_keep_alive_token_widths() {
        // 1.7: i32
        let mut buf = BytesMut::new();
        buf.put_i32(77);
        assert_eq!(
            decode_play(ProtocolVersion::V1_7_2, 0x00, &buf).unwrap(),
            ServerPacket::KeepAliveResponse { token: 77 }
        );
        // 1.8: varint
        let mut buf = BytesMut::new();
        wire::write_varint(&mut buf, 300);
        assert_eq!(
            decode_play(ProtocolVersion::V1_8, 0x00, &buf).unwrap(),
            ServerPacket::KeepAliveResponse { token: 300 }
        );
        // 1.12.2+: i64
        let mut buf = BytesMut::new();
        buf.put_i64(1 << 40);
        assert_eq!(
            decode_play(ProtocolVersion::V1_12_2, 0x0B, &buf).unwrap(),
            ServerPacket::KeepAliveResponse { token: 1 << 40 }
        );
    }

    #[test]
    fn test_login_success_uuid_shapes() {
        let uuid = Uuid::from_u128(0xfeed_beef_0000_0000_0000_0000_0000_0001);
        let mut legacy = BytesMut::new();
        encode_login_success(&mut legacy, ProtocolVersion::V1_8, uuid, "Bob");
        let mut modern = BytesMut::new();
        encode_login_success(&mut modern, ProtocolVersion::V1_16, uuid, "Bob");
        // Dashed string is 36 bytes + prefix; raw form is exactly 16
        assert!(legacy.len() > modern.len());

        let mut with_props = BytesMut::new();
        encode_login_success(&mut with_props, ProtocolVersion::V1_19, uuid, "Bob");
        assert_eq!(with_props.len(), modern.len() + 1);
    }
}
