//! JoinGame — one declarative field schema per version bracket
//!
//! The first post-login world packet changed layout more than any other
//! packet in the protocol's history. Instead of a class family with one
//! override per version, each bracket is a table of [`Field`] entries and a
//! single generic writer walks the table against one [`JoinGameData`] value.
//! Supporting a new version is a new table row, not new code.

use super::nbt::Tag;
use super::version::ProtocolVersion;
use super::wire;
use bytes::{BufMut, BytesMut};

/// Everything any bracket can ask for. Built once by asset preparation.
#[derive(Debug, Clone)]
pub struct JoinGameData {
    pub entity_id: i32,
    pub hardcore: bool,
    pub gamemode: u8,
    /// -1 = none.
    pub previous_gamemode: i8,
    pub world_names: Vec<String>,
    /// Full codec registry NBT (dimension types, biomes, chat/damage types).
    pub registry_codec: Tag,
    /// The dimension element NBT, inlined for 1.16.2-1.18.2.
    pub dimension_nbt: Tag,
    /// Dimension type key, e.g. "minecraft:overworld".
    pub dimension_key: String,
    pub world_name: String,
    pub hashed_seed: i64,
    pub max_players: i32,
    pub view_distance: i32,
    pub simulation_distance: i32,
    pub reduced_debug_info: bool,
    pub enable_respawn_screen: bool,
    pub do_limited_crafting: bool,
    pub is_debug: bool,
    pub is_flat: bool,
    pub portal_cooldown: i32,
}

/// One field slot in a bracket's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    EntityId,
    /// Gamemode byte, legacy flavor: hardcore packed into bit 3.
    GamemodeWithHardcoreFlag,
    Gamemode,
    PreviousGamemode,
    Hardcore,
    /// Dimension as a plain i32 (1.9.1-1.13.2 used int; 1.7-1.9 a byte).
    DimensionI8,
    DimensionI32,
    /// Dimension type identifier string (1.16-1.16.1, 1.19+, 1.20.2).
    DimensionKey,
    /// Dimension element inlined as NBT (1.16.2-1.18.2).
    DimensionNbt,
    RegistryCodec,
    WorldNames,
    WorldName,
    HashedSeed,
    DifficultyU8,
    MaxPlayersU8,
    MaxPlayersVarInt,
    LevelType,
    ViewDistance,
    SimulationDistance,
    ReducedDebugInfo,
    EnableRespawnScreen,
    DoLimitedCrafting,
    IsDebug,
    IsFlat,
    /// Optional death location, always absent in limbo.
    NoDeathLocation,
    PortalCooldown,
}

use Field::*;

/// Layout brackets in ascending version order; the last bracket whose
/// version is ≤ the session version applies.
static BRACKETS: &[(ProtocolVersion, &[Field])] = &[
    (ProtocolVersion::V1_7_2, &[
        EntityId, GamemodeWithHardcoreFlag, DimensionI8, DifficultyU8, MaxPlayersU8, LevelType,
    ]),
    (ProtocolVersion::V1_8, &[
        EntityId, GamemodeWithHardcoreFlag, DimensionI8, DifficultyU8, MaxPlayersU8, LevelType,
        ReducedDebugInfo,
    ]),
    (ProtocolVersion::V1_9_1, &[
        EntityId, GamemodeWithHardcoreFlag, DimensionI32, DifficultyU8, MaxPlayersU8, LevelType,
        ReducedDebugInfo,
    ]),
    (ProtocolVersion::V1_14, &[
        EntityId, GamemodeWithHardcoreFlag, DimensionI32, MaxPlayersU8, LevelType, ViewDistance,
        ReducedDebugInfo,
    ]),
    (ProtocolVersion::V1_15, &[
        EntityId, GamemodeWithHardcoreFlag, DimensionI32, HashedSeed, MaxPlayersU8, LevelType,
        ViewDistance, ReducedDebugInfo, EnableRespawnScreen,
    ]),
    (ProtocolVersion::V1_16, &[
        EntityId, Gamemode, PreviousGamemode, WorldNames, RegistryCodec, DimensionKey, WorldName,
        HashedSeed, MaxPlayersU8, ViewDistance, ReducedDebugInfo, EnableRespawnScreen, IsDebug,
        IsFlat,
    ]),
    (ProtocolVersion::V1_16_2, &[
        EntityId, Hardcore, Gamemode, PreviousGamemode, WorldNames, RegistryCodec, DimensionNbt,
        WorldName, HashedSeed, MaxPlayersVarInt, ViewDistance, ReducedDebugInfo,
        EnableRespawnScreen, IsDebug, IsFlat,
    ]),
    (ProtocolVersion::V1_18, &[
        EntityId, Hardcore, Gamemode, PreviousGamemode, WorldNames, RegistryCodec, DimensionNbt,
        WorldName, HashedSeed, MaxPlayersVarInt, ViewDistance, SimulationDistance,
        ReducedDebugInfo, EnableRespawnScreen, IsDebug, IsFlat,
    ]),
    (ProtocolVersion::V1_19, &[
        EntityId, Hardcore, Gamemode, PreviousGamemode, WorldNames, RegistryCodec, DimensionKey,
        WorldName, HashedSeed, MaxPlayersVarInt, ViewDistance, SimulationDistance,
        ReducedDebugInfo, EnableRespawnScreen, IsDebug, IsFlat, NoDeathLocation,
    ]),
    (ProtocolVersion::V1_20, &[
        EntityId, Hardcore, Gamemode, PreviousGamemode, WorldNames, RegistryCodec, DimensionKey,
        WorldName, HashedSeed, MaxPlayersVarInt, ViewDistance, SimulationDistance,
        ReducedDebugInfo, EnableRespawnScreen, IsDebug, IsFlat, NoDeathLocation, PortalCooldown,
    ]),
    // 1.20.2 moved the registries to the configuration phase and regrouped
    // the world fields.
    (ProtocolVersion::V1_20_2, &[
        EntityId, Hardcore, WorldNames, MaxPlayersVarInt, ViewDistance, SimulationDistance,
        ReducedDebugInfo, EnableRespawnScreen, DoLimitedCrafting, DimensionKey, WorldName,
        HashedSeed, Gamemode, PreviousGamemode, IsDebug, IsFlat, NoDeathLocation, PortalCooldown,
    ]),
];

/// Select the layout bracket for a version.
pub fn bracket(version: ProtocolVersion) -> &'static [Field] {
    BRACKETS
        .iter()
        .rev()
        .find(|(first, _)| *first <= version)
        .map(|(_, fields)| *fields)
        .unwrap_or(BRACKETS[0].1)
}

/// Encode the JoinGame payload for `version` by walking its bracket.
pub fn encode(buf: &mut BytesMut, version: ProtocolVersion, data: &JoinGameData) {
    for field in bracket(version) {
        write_field(buf, *field, data);
    }
}

fn write_field(buf: &mut BytesMut, field: Field, data: &JoinGameData) {
    match field {
        EntityId => buf.put_i32(data.entity_id),
        GamemodeWithHardcoreFlag => {
            let mut gm = data.gamemode;
            if data.hardcore {
                gm |= 0x8;
            }
            buf.put_u8(gm);
        }
        Gamemode => buf.put_u8(data.gamemode),
        PreviousGamemode => buf.put_i8(data.previous_gamemode),
        Hardcore => buf.put_u8(data.hardcore as u8),
        DimensionI8 => buf.put_i8(0),
        DimensionI32 => buf.put_i32(0),
        DimensionKey => wire::write_string(buf, &data.dimension_key),
        DimensionNbt => data.dimension_nbt.write_named("", buf),
        RegistryCodec => data.registry_codec.write_named("", buf),
        WorldNames => {
            wire::write_varint(buf, data.world_names.len() as i32);
            for name in &data.world_names {
                wire::write_string(buf, name);
            }
        }
        WorldName => wire::write_string(buf, &data.world_name),
        HashedSeed => buf.put_i64(data.hashed_seed),
        DifficultyU8 => buf.put_u8(0),
        MaxPlayersU8 => buf.put_u8(data.max_players.clamp(0, 255) as u8),
        MaxPlayersVarInt => wire::write_varint(buf, data.max_players),
        LevelType => wire::write_string(buf, "flat"),
        ViewDistance => wire::write_varint(buf, data.view_distance),
        SimulationDistance => wire::write_varint(buf, data.simulation_distance),
        ReducedDebugInfo => buf.put_u8(data.reduced_debug_info as u8),
        EnableRespawnScreen => buf.put_u8(data.enable_respawn_screen as u8),
        DoLimitedCrafting => buf.put_u8(data.do_limited_crafting as u8),
        IsDebug => buf.put_u8(data.is_debug as u8),
        IsFlat => buf.put_u8(data.is_flat as u8),
        NoDeathLocation => buf.put_u8(0),
        PortalCooldown => wire::write_varint(buf, data.portal_cooldown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nbt_compound;

    fn data() -> JoinGameData {
        JoinGameData {
            entity_id: 1,
            hardcore: false,
            gamemode: 3,
            previous_gamemode: -1,
            world_names: vec!["minecraft:overworld".into()],
            registry_codec: nbt_compound! {},
            dimension_nbt: nbt_compound! { "height" => Tag::Int(256) },
            dimension_key: "minecraft:overworld".into(),
            world_name: "minecraft:overworld".into(),
            hashed_seed: 0,
            max_players: 1,
            view_distance: 2,
            simulation_distance: 2,
            reduced_debug_info: false,
            enable_respawn_screen: true,
            do_limited_crafting: false,
            is_debug: false,
            is_flat: true,
            portal_cooldown: 0,
        }
    }

    #[test]
    fn test_bracket_selection() {
        assert_eq!(bracket(ProtocolVersion::V1_7_6), bracket(ProtocolVersion::V1_7_2));
        assert_ne!(bracket(ProtocolVersion::V1_8), bracket(ProtocolVersion::V1_7_2));
        // 1.9.0 kept the byte dimension; 1.9.1 widened it
        assert_eq!(bracket(ProtocolVersion::V1_9), bracket(ProtocolVersion::V1_8));
        assert_eq!(bracket(ProtocolVersion::V1_13_2), bracket(ProtocolVersion::V1_9_1));
        assert_eq!(bracket(ProtocolVersion::V1_16_1), bracket(ProtocolVersion::V1_16));
        assert_eq!(bracket(ProtocolVersion::V1_17), bracket(ProtocolVersion::V1_16_2));
        assert_ne!(bracket(ProtocolVersion::V1_20_2), bracket(ProtocolVersion::V1_20));
    }

    #[test]
    fn test_legacy_layout_is_stable() {
        let mut buf = BytesMut::new();
        encode(&mut buf, ProtocolVersion::V1_7_2, &data());
        // i32 + gamemode + dim + difficulty + maxplayers + "flat"
        assert_eq!(buf.len(), 4 + 1 + 1 + 1 + 1 + (1 + 4));
        assert_eq!(&buf[..4], &1i32.to_be_bytes());
    }

    #[test]
    fn test_hardcore_flag_packing() {
        let mut d = data();
        d.hardcore = true;
        let mut buf = BytesMut::new();
        encode(&mut buf, ProtocolVersion::V1_8, &d);
        assert_eq!(buf[4], 3 | 0x8);

        // Modern brackets carry hardcore as its own bool
        let mut buf = BytesMut::new();
        encode(&mut buf, ProtocolVersion::V1_16_2, &d);
        assert_eq!(buf[4], 1);
        assert_eq!(buf[5], 3);
    }

    #[test]
    fn test_config_era_has_no_registry_field() {
        assert!(bracket(ProtocolVersion::V1_20).contains(&Field::RegistryCodec));
        assert!(!bracket(ProtocolVersion::V1_20_2).contains(&Field::RegistryCodec));
        // And the 1.20.2 image is therefore far smaller
        let mut old = BytesMut::new();
        encode(&mut old, ProtocolVersion::V1_20, &data());
        let mut new = BytesMut::new();
        encode(&mut new, ProtocolVersion::V1_20_2, &data());
        assert!(new.len() < old.len());
    }
}
