//! Packet id registry — phase × direction × version → id tables
//!
//! Ids are declared as `(min_version, id)` runs per packet type, the way the
//! upstream protocol actually evolves: an id holds from the version that
//! introduced it until the next run entry. The registry resolves the full
//! table once per supported version at startup; sessions then hold one
//! immutable slice and never consult version ranges again.

use super::version::ProtocolVersion;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Connection phase. Selects the id tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Handshake,
    Status,
    Login,
    /// Only exists for protocol ≥ 1.20.2.
    Config,
    Play,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Serverbound,
    Clientbound,
}

/// Every packet type the gateway decodes or encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PacketType {
    // Serverbound
    Handshake,
    LoginStart,
    LoginAcknowledged,
    ClientInformation,
    PluginMessage,
    FinishConfigurationAck,
    KeepAliveResponse,
    TeleportConfirm,
    PlayerPosition,
    PlayerPositionLook,

    // Clientbound
    Disconnect,
    LoginSuccess,
    SetCompression,
    RegistryData,
    FinishConfiguration,
    JoinGame,
    PlayerAbilities,
    SyncPlayerPosition,
    ChunkData,
    SectionBlocks,
    KeepAlive,
}

struct Run {
    phase: Phase,
    direction: Direction,
    packet_type: PacketType,
    /// `(first_version, id)` pairs in ascending version order.
    ids: &'static [(ProtocolVersion, i32)],
}

macro_rules! runs {
    ($( $dir:ident $phase:ident $typ:ident : $( ($ver:ident, $id:literal) )+ ; )+) => {
        &[ $( Run {
            phase: Phase::$phase,
            direction: Direction::$dir,
            packet_type: PacketType::$typ,
            ids: &[ $( (ProtocolVersion::$ver, $id) ),+ ],
        } ),+ ]
    };
}

/// The full id history for every packet the gateway touches.
///
/// Sources: the upstream protocol documentation for 1.7.2 through 1.20.2.
/// Config-phase ids exist only from V1_20_2.
static RUNS: &[Run] = runs! {
    Serverbound Handshake Handshake:
        (V1_7_2, 0x00);

    Serverbound Login LoginStart:
        (V1_7_2, 0x00);
    Serverbound Login LoginAcknowledged:
        (V1_20_2, 0x03);

    Serverbound Config ClientInformation:
        (V1_20_2, 0x00);
    Serverbound Config PluginMessage:
        (V1_20_2, 0x01);
    Serverbound Config FinishConfigurationAck:
        (V1_20_2, 0x02);
    Serverbound Config KeepAliveResponse:
        (V1_20_2, 0x03);

    Serverbound Play KeepAliveResponse:
        (V1_7_2, 0x00) (V1_9, 0x0B) (V1_12, 0x0C) (V1_12_1, 0x0B) (V1_13, 0x0E)
        (V1_14, 0x0F) (V1_16, 0x10) (V1_17, 0x0F) (V1_19, 0x11) (V1_19_1, 0x12)
        (V1_19_3, 0x11) (V1_19_4, 0x12) (V1_20_2, 0x14);
    Serverbound Play PlayerPosition:
        (V1_7_2, 0x04) (V1_9, 0x0C) (V1_12, 0x0E) (V1_12_1, 0x0D) (V1_13, 0x10)
        (V1_14, 0x11) (V1_16, 0x12) (V1_17, 0x11) (V1_19, 0x13) (V1_19_1, 0x14)
        (V1_19_3, 0x13) (V1_19_4, 0x14) (V1_20_2, 0x16);
    Serverbound Play PlayerPositionLook:
        (V1_7_2, 0x06) (V1_9, 0x0D) (V1_12, 0x0F) (V1_12_1, 0x0E) (V1_13, 0x11)
        (V1_14, 0x12) (V1_16, 0x13) (V1_17, 0x12) (V1_19, 0x14) (V1_19_1, 0x15)
        (V1_19_3, 0x14) (V1_19_4, 0x15) (V1_20_2, 0x17);
    Serverbound Play ClientInformation:
        (V1_7_2, 0x15) (V1_9, 0x04) (V1_12, 0x05) (V1_12_1, 0x04) (V1_14, 0x05)
        (V1_19, 0x07) (V1_19_1, 0x08) (V1_19_3, 0x07) (V1_19_4, 0x08) (V1_20_2, 0x09);
    Serverbound Play PluginMessage:
        (V1_7_2, 0x17) (V1_9, 0x09) (V1_12, 0x0A) (V1_12_1, 0x09) (V1_13, 0x0A)
        (V1_14, 0x0B) (V1_17, 0x0A) (V1_19, 0x0C) (V1_19_1, 0x0D) (V1_19_3, 0x0C)
        (V1_19_4, 0x0D) (V1_20_2, 0x0F);
    Serverbound Play TeleportConfirm:
        (V1_9, 0x00);

    Clientbound Login Disconnect:
        (V1_7_2, 0x00);
    Clientbound Login LoginSuccess:
        (V1_7_2, 0x02);
    Clientbound Login SetCompression:
        (V1_8, 0x03);

    Clientbound Config PluginMessage:
        (V1_20_2, 0x00);
    Clientbound Config Disconnect:
        (V1_20_2, 0x01);
    Clientbound Config FinishConfiguration:
        (V1_20_2, 0x02);
    Clientbound Config KeepAlive:
        (V1_20_2, 0x03);
    Clientbound Config RegistryData:
        (V1_20_2, 0x05);

    Clientbound Play JoinGame:
        (V1_7_2, 0x01) (V1_9, 0x23) (V1_13, 0x25) (V1_15, 0x26) (V1_16, 0x25)
        (V1_16_2, 0x24) (V1_17, 0x26) (V1_19, 0x23) (V1_19_1, 0x25) (V1_19_3, 0x24)
        (V1_19_4, 0x28) (V1_20_2, 0x29);
    Clientbound Play KeepAlive:
        (V1_7_2, 0x00) (V1_9, 0x1F) (V1_13, 0x21) (V1_14, 0x20) (V1_15, 0x21)
        (V1_16, 0x20) (V1_16_2, 0x1F) (V1_17, 0x21) (V1_19, 0x1E) (V1_19_1, 0x20)
        (V1_19_3, 0x1F) (V1_19_4, 0x23) (V1_20_2, 0x24);
    Clientbound Play Disconnect:
        (V1_7_2, 0x40) (V1_9, 0x1A) (V1_13, 0x1B) (V1_14, 0x1A) (V1_15, 0x1B)
        (V1_16, 0x1A) (V1_16_2, 0x19) (V1_17, 0x1A) (V1_19, 0x17) (V1_19_1, 0x19)
        (V1_19_3, 0x17) (V1_19_4, 0x1A) (V1_20_2, 0x1B);
    Clientbound Play SyncPlayerPosition:
        (V1_7_2, 0x08) (V1_9, 0x2E) (V1_12_1, 0x2F) (V1_13, 0x32) (V1_14, 0x35)
        (V1_15, 0x36) (V1_16, 0x35) (V1_16_2, 0x34) (V1_17, 0x38) (V1_19, 0x36)
        (V1_19_1, 0x39) (V1_19_3, 0x38) (V1_19_4, 0x3C) (V1_20_2, 0x3E);
    Clientbound Play PlayerAbilities:
        (V1_7_2, 0x39) (V1_9, 0x2B) (V1_12_1, 0x2C) (V1_13, 0x2E) (V1_14, 0x31)
        (V1_15, 0x32) (V1_16, 0x31) (V1_16_2, 0x30) (V1_17, 0x32) (V1_19, 0x2F)
        (V1_19_1, 0x31) (V1_19_3, 0x30) (V1_19_4, 0x34) (V1_20_2, 0x36);
    Clientbound Play ChunkData:
        (V1_7_2, 0x21) (V1_9, 0x20) (V1_13, 0x22) (V1_14, 0x21) (V1_15, 0x22)
        (V1_16, 0x21) (V1_16_2, 0x20) (V1_17, 0x22) (V1_19, 0x1F) (V1_19_1, 0x21)
        (V1_19_3, 0x20) (V1_19_4, 0x24) (V1_20_2, 0x25);
    Clientbound Play SectionBlocks:
        (V1_7_2, 0x22) (V1_9, 0x10) (V1_13, 0x0F) (V1_14, 0x10) (V1_16, 0x0F)
        (V1_16_2, 0x3B) (V1_17, 0x3F) (V1_19, 0x3D) (V1_19_1, 0x40) (V1_19_3, 0x3F)
        (V1_19_4, 0x43) (V1_20_2, 0x45);
};

/// Resolved id tables for every supported version.
pub struct Registry {
    /// (phase, direction, version, type) → id
    ids: HashMap<(Phase, Direction, ProtocolVersion, PacketType), i32>,
    /// (phase, direction, version, id) → type
    types: HashMap<(Phase, Direction, ProtocolVersion, i32), PacketType>,
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

impl Registry {
    /// The process-wide resolved registry.
    pub fn global() -> &'static Self {
        REGISTRY.get_or_init(Self::resolve)
    }

    fn resolve() -> Self {
        let mut ids = HashMap::new();
        let mut types = HashMap::new();
        for version in all_supported() {
            for run in RUNS {
                // Last run entry at or below this version wins
                let resolved = run
                    .ids
                    .iter()
                    .rev()
                    .find(|(first, _)| *first <= version)
                    .map(|(_, id)| *id);
                if let Some(id) = resolved {
                    if run.phase == Phase::Config && !version.has_config_phase() {
                        continue;
                    }
                    ids.insert((run.phase, run.direction, version, run.packet_type), id);
                    types.insert((run.phase, run.direction, version, id), run.packet_type);
                }
            }
        }
        Self { ids, types }
    }

    /// Id for an outbound packet. None means the packet does not exist for
    /// this (phase, version), e.g. SetCompression on 1.7.
    pub fn id_of(
        &self,
        phase: Phase,
        direction: Direction,
        version: ProtocolVersion,
        packet_type: PacketType,
    ) -> Option<i32> {
        self.ids.get(&(phase, direction, version, packet_type)).copied()
    }

    /// Type of an inbound packet id. None means unknown: fatal in
    /// Handshake/Login, silently dropped in Play.
    pub fn type_of(
        &self,
        phase: Phase,
        direction: Direction,
        version: ProtocolVersion,
        id: i32,
    ) -> Option<PacketType> {
        self.types.get(&(phase, direction, version, id)).copied()
    }
}

fn all_supported() -> impl Iterator<Item = ProtocolVersion> {
    (0..=ProtocolVersion::V1_20_2.id()).filter_map(ProtocolVersion::from_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_resolution_picks_latest_at_or_below() {
        let r = Registry::global();
        // Serverbound play keep-alive moved 0x00 → 0x0B at 1.9 and 0x0C at 1.12
        for (v, id) in [
            (ProtocolVersion::V1_8, 0x00),
            (ProtocolVersion::V1_9_4, 0x0B),
            (ProtocolVersion::V1_12, 0x0C),
            (ProtocolVersion::V1_12_2, 0x0B),
            (ProtocolVersion::V1_20_2, 0x14),
        ] {
            assert_eq!(
                r.id_of(Phase::Play, Direction::Serverbound, v, PacketType::KeepAliveResponse),
                Some(id),
                "keep-alive id for {v}"
            );
        }
    }

    #[test]
    fn test_missing_packets_are_none() {
        let r = Registry::global();
        // No SetCompression before 1.8
        assert_eq!(
            r.id_of(Phase::Login, Direction::Clientbound, ProtocolVersion::V1_7_6, PacketType::SetCompression),
            None
        );
        // No teleport confirm before 1.9
        assert_eq!(
            r.id_of(Phase::Play, Direction::Serverbound, ProtocolVersion::V1_8, PacketType::TeleportConfirm),
            None
        );
        // Config tables only exist from 1.20.2
        assert_eq!(
            r.id_of(Phase::Config, Direction::Clientbound, ProtocolVersion::V1_20, PacketType::FinishConfiguration),
            None
        );
        assert_eq!(
            r.id_of(Phase::Config, Direction::Clientbound, ProtocolVersion::V1_20_2, PacketType::FinishConfiguration),
            Some(0x02)
        );
    }

    #[test]
    fn test_inbound_lookup_is_inverse() {
        let r = Registry::global();
        let v = ProtocolVersion::V1_19_4;
        let id = r
            .id_of(Phase::Play, Direction::Serverbound, v, PacketType::PlayerPosition)
            .unwrap();
        assert_eq!(
            r.type_of(Phase::Play, Direction::Serverbound, v, id),
            Some(PacketType::PlayerPosition)
        );
        // An id no serverbound run claims for this version
        assert_eq!(r.type_of(Phase::Play, Direction::Serverbound, v, 0x7F), None);
    }
}
