//! Precomputed per-version assets
//!
//! Everything expensive — registry NBT assembly, JoinGame layout encoding,
//! chunk serialization, disconnect components — happens once in
//! [`Assets::prepare`]. The result is immutable and shared by `Arc` across
//! every session task; the per-connection hot path only copies byte slices.

use super::chunk;
use super::motion::MotionTable;
use crate::config::Config;
use crate::nbt_compound;
use crate::protocol::join_game::{self, JoinGameData};
use crate::protocol::nbt::Tag;
use crate::protocol::packets;
use crate::protocol::version::ProtocolVersion;
use crate::types::DisconnectReason;
use bytes::BytesMut;
use std::collections::HashMap;

/// Byte images prepared for one protocol version.
#[derive(Debug, Clone)]
pub struct VersionAssets {
    /// JoinGame payload, registry NBT inlined where the bracket wants it.
    pub join_game: Vec<u8>,
    /// Empty chunk (0, 0).
    pub chunk: Vec<u8>,
    /// The 8×8 barrier platform section update.
    pub platform: Vec<u8>,
    /// Configuration-phase RegistryData payload (≥ 1.20.2 only).
    pub registry_data: Option<Vec<u8>>,
    /// Disconnect payloads by reason, reusable in login and play.
    pub disconnect: HashMap<DisconnectReason, Vec<u8>>,
}

/// All immutable precomputed state.
#[derive(Debug)]
pub struct Assets {
    versions: HashMap<ProtocolVersion, VersionAssets>,
    motion: MotionTable,
}

impl Assets {
    /// Build every per-version image. Called once at startup, after the
    /// configuration snapshot is final.
    pub fn prepare(config: &Config) -> Self {
        let motion = MotionTable::build(config.max_movement_ticks);
        let mut versions = HashMap::new();
        for id in 0..=ProtocolVersion::V1_20_2.id() {
            if let Some(version) = ProtocolVersion::from_id(id) {
                versions.insert(version, build_version(config, version));
            }
        }
        Self { versions, motion }
    }

    /// Assets for a supported version. The admission gate rejects
    /// unsupported versions before any session exists, so lookups by a live
    /// session always succeed.
    pub fn for_version(&self, version: ProtocolVersion) -> &VersionAssets {
        &self.versions[&version]
    }

    pub fn motion(&self) -> &MotionTable {
        &self.motion
    }

    pub fn spawn_y(&self) -> f64 {
        self.motion.spawn_y()
    }
}

fn build_version(config: &Config, version: ProtocolVersion) -> VersionAssets {
    let data = join_game_data(config, version);
    let mut join_game = BytesMut::new();
    join_game::encode(&mut join_game, version, &data);

    let registry_data = version.has_config_phase().then(|| {
        let mut buf = BytesMut::new();
        packets::encode_registry_data(&mut buf, &registry_codec(version));
        buf.to_vec()
    });

    let mut disconnect = HashMap::new();
    for reason in DisconnectReason::ALL {
        let component =
            serde_json::json!({ "text": config.message_for(reason.key()) }).to_string();
        let mut buf = BytesMut::new();
        packets::encode_disconnect(&mut buf, &component);
        disconnect.insert(reason, buf.to_vec());
    }

    VersionAssets {
        join_game: join_game.to_vec(),
        chunk: chunk::encode_empty_chunk(version).to_vec(),
        platform: chunk::encode_platform(version).to_vec(),
        registry_data,
        disconnect,
    }
}

fn join_game_data(config: &Config, version: ProtocolVersion) -> JoinGameData {
    JoinGameData {
        entity_id: 0,
        hardcore: false,
        gamemode: config.gamemode_id,
        previous_gamemode: -1,
        world_names: vec!["minecraft:overworld".into()],
        registry_codec: registry_codec(version),
        dimension_nbt: dimension_element(version),
        dimension_key: "minecraft:overworld".into(),
        world_name: "minecraft:overworld".into(),
        hashed_seed: 0,
        max_players: 1,
        view_distance: 2,
        simulation_distance: 2,
        reduced_debug_info: false,
        enable_respawn_screen: false,
        do_limited_crafting: false,
        is_debug: false,
        is_flat: true,
        portal_cooldown: 0,
    }
}

// =============================================================================
// REGISTRY NBT
// =============================================================================
// Registries are assembled from constant tables rather than shipped blobs:
// one overworld dimension, one plains biome, and the damage-type list each
// client generation validates at join. Wire shape per version:
//   1.16 - 1.16.1   flat "dimension" list
//   1.16.2 - 1.18.2 dimension_type + worldgen/biome
//   1.19 - 1.19.3   + chat_type
//   1.19.4          + damage_type
//   1.20+           + two extra damage types
// 1.20.2 ships the same compound through the configuration phase instead.

/// Damage types every 1.19.4 client requires at registry sync.
const DAMAGE_TYPES_1194: &[&str] = &[
    "arrow", "bad_respawn_point", "cactus", "cramming", "dragon_breath", "drown", "dry_out",
    "explosion", "fall", "falling_anvil", "falling_block", "falling_stalactite", "fireball",
    "fireworks", "fly_into_wall", "freeze", "generic", "hot_floor", "in_fire", "in_wall",
    "indirect_magic", "lava", "lightning_bolt", "magic", "mob_attack", "mob_attack_no_aggro",
    "mob_projectile", "on_fire", "out_of_world", "player_attack", "player_explosion",
    "sonic_boom", "spit", "stalagmite", "starve", "sting", "sweet_berry_bush", "thorns",
    "thrown", "trident", "unattributed_fireball", "wither", "wither_skull",
];

/// Added by 1.20.
const DAMAGE_TYPES_120: &[&str] = &["outside_border", "generic_kill"];

fn registry_codec(version: ProtocolVersion) -> Tag {
    use ProtocolVersion::*;
    if version < V1_16 {
        // Pre-1.16 brackets never reference the codec
        return nbt_compound! {};
    }
    if version < V1_16_2 {
        return nbt_compound! {
            "dimension" => Tag::List(vec![flat_dimension_entry()]),
        };
    }

    let mut root = std::collections::BTreeMap::new();
    root.insert(
        "minecraft:dimension_type".to_string(),
        registry_entry(
            "minecraft:dimension_type",
            vec![named_element("minecraft:overworld", 0, dimension_element(version))],
        ),
    );
    root.insert(
        "minecraft:worldgen/biome".to_string(),
        registry_entry(
            "minecraft:worldgen/biome",
            vec![named_element("minecraft:plains", 0, biome_element())],
        ),
    );
    if version >= V1_19 {
        root.insert(
            "minecraft:chat_type".to_string(),
            registry_entry(
                "minecraft:chat_type",
                vec![named_element("minecraft:chat", 0, chat_type_element())],
            ),
        );
    }
    if version >= V1_19_4 {
        let mut elements = Vec::new();
        let mut id = 0;
        for name in DAMAGE_TYPES_1194 {
            elements.push(named_element(
                &format!("minecraft:{name}"),
                id,
                damage_type_element(name),
            ));
            id += 1;
        }
        if version >= V1_20 {
            for name in DAMAGE_TYPES_120 {
                elements.push(named_element(
                    &format!("minecraft:{name}"),
                    id,
                    damage_type_element(name),
                ));
                id += 1;
            }
        }
        root.insert(
            "minecraft:damage_type".to_string(),
            registry_entry("minecraft:damage_type", elements),
        );
    }
    Tag::Compound(root)
}

fn registry_entry(type_name: &str, elements: Vec<Tag>) -> Tag {
    nbt_compound! {
        "type" => Tag::String(type_name.into()),
        "value" => Tag::List(elements),
    }
}

fn named_element(name: &str, id: i32, element: Tag) -> Tag {
    nbt_compound! {
        "name" => Tag::String(name.into()),
        "id" => Tag::Int(id),
        "element" => element,
    }
}

/// Dimension properties for the limbo world: 0..256, skylit, nothing
/// spawns, nothing burns.
fn dimension_element(version: ProtocolVersion) -> Tag {
    use ProtocolVersion::*;
    let infiniburn = if version >= V1_18_2 {
        "#minecraft:infiniburn_overworld"
    } else {
        "minecraft:infiniburn_overworld"
    };
    let mut map = std::collections::BTreeMap::new();
    map.insert("piglin_safe".into(), Tag::Byte(0));
    map.insert("natural".into(), Tag::Byte(1));
    map.insert("ambient_light".into(), Tag::Float(0.0));
    map.insert("infiniburn".into(), Tag::String(infiniburn.into()));
    map.insert("respawn_anchor_works".into(), Tag::Byte(0));
    map.insert("has_skylight".into(), Tag::Byte(1));
    map.insert("bed_works".into(), Tag::Byte(0));
    map.insert("effects".into(), Tag::String("minecraft:overworld".into()));
    map.insert("has_raids".into(), Tag::Byte(0));
    map.insert("logical_height".into(), Tag::Int(256));
    map.insert("coordinate_scale".into(), Tag::Double(1.0));
    map.insert("ultrawarm".into(), Tag::Byte(0));
    map.insert("has_ceiling".into(), Tag::Byte(0));
    if version >= V1_17 {
        map.insert("min_y".into(), Tag::Int(0));
        map.insert("height".into(), Tag::Int(256));
    }
    if version >= V1_19 {
        map.insert("monster_spawn_light_level".into(), Tag::Int(0));
        map.insert("monster_spawn_block_light_limit".into(), Tag::Int(0));
    }
    Tag::Compound(map)
}

/// 1.16.0/1.16.1 flattened the dimension list: properties inline next to
/// the name, no element wrapper.
fn flat_dimension_entry() -> Tag {
    let mut map = match dimension_element(ProtocolVersion::V1_16) {
        Tag::Compound(map) => map,
        _ => unreachable!(),
    };
    map.insert("name".into(), Tag::String("minecraft:overworld".into()));
    map.insert("shrunk".into(), Tag::Byte(0));
    map.insert("fixed_time".into(), Tag::Long(6000));
    Tag::Compound(map)
}

fn biome_element() -> Tag {
    nbt_compound! {
        "precipitation" => Tag::String("none".into()),
        "temperature" => Tag::Float(0.8),
        "downfall" => Tag::Float(0.4),
        "has_precipitation" => Tag::Byte(0),
        "effects" => nbt_compound! {
            "sky_color" => Tag::Int(0x78A7FF),
            "water_fog_color" => Tag::Int(0x050533),
            "fog_color" => Tag::Int(0xC0D8FF),
            "water_color" => Tag::Int(0x3F76E4),
        },
    }
}

fn chat_type_element() -> Tag {
    let decoration = nbt_compound! {
        "translation_key" => Tag::String("chat.type.text".into()),
        "parameters" => Tag::List(vec![
            Tag::String("sender".into()),
            Tag::String("content".into()),
        ]),
    };
    nbt_compound! {
        "chat" => nbt_compound! { "decoration" => decoration.clone() },
        "narration" => nbt_compound! {
            "decoration" => decoration,
            "priority" => Tag::String("chat".into()),
        },
    }
}

fn damage_type_element(name: &str) -> Tag {
    nbt_compound! {
        "message_id" => Tag::String(name.into()),
        "scaling" => Tag::String("when_caused_by_living_non_player".into()),
        "exhaustion" => Tag::Float(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets() -> Assets {
        Assets::prepare(&Config::default())
    }

    #[test]
    fn test_every_supported_version_has_assets() {
        let a = assets();
        for id in 0..=764 {
            if let Some(v) = ProtocolVersion::from_id(id) {
                let va = a.for_version(v);
                assert!(!va.join_game.is_empty(), "join game for {v}");
                assert!(!va.chunk.is_empty(), "chunk for {v}");
                assert!(!va.platform.is_empty(), "platform for {v}");
            }
        }
    }

    #[test]
    fn test_registry_data_only_for_config_phase() {
        let a = assets();
        assert!(a.for_version(ProtocolVersion::V1_20).registry_data.is_none());
        assert!(a.for_version(ProtocolVersion::V1_20_2).registry_data.is_some());
    }

    #[test]
    fn test_registry_codec_grows_with_version() {
        // Later generations validate more registries, so the codec grows
        let v1162 = {
            let mut b = BytesMut::new();
            registry_codec(ProtocolVersion::V1_16_2).write_named("", &mut b);
            b.len()
        };
        let v1194 = {
            let mut b = BytesMut::new();
            registry_codec(ProtocolVersion::V1_19_4).write_named("", &mut b);
            b.len()
        };
        let v120 = {
            let mut b = BytesMut::new();
            registry_codec(ProtocolVersion::V1_20).write_named("", &mut b);
            b.len()
        };
        assert!(v1162 < v1194);
        assert!(v1194 < v120);
    }

    #[test]
    fn test_damage_type_counts() {
        assert_eq!(DAMAGE_TYPES_1194.len(), 43);
        match registry_codec(ProtocolVersion::V1_20) {
            Tag::Compound(root) => match &root["minecraft:damage_type"] {
                Tag::Compound(entry) => match &entry["value"] {
                    Tag::List(items) => assert_eq!(items.len(), 45),
                    _ => panic!("value not a list"),
                },
                _ => panic!("entry not a compound"),
            },
            _ => panic!("codec not a compound"),
        }
    }

    #[test]
    fn test_disconnect_payloads_cover_all_reasons() {
        let a = assets();
        let va = a.for_version(ProtocolVersion::V1_8);
        for reason in DisconnectReason::ALL {
            let payload = &va.disconnect[&reason];
            let text = String::from_utf8_lossy(&payload[1..]);
            assert!(text.starts_with('{'), "component for {reason:?}");
        }
    }

    #[test]
    fn test_join_game_image_varies_by_bracket() {
        let a = assets();
        let legacy = &a.for_version(ProtocolVersion::V1_8).join_game;
        let modern = &a.for_version(ProtocolVersion::V1_16_2).join_game;
        assert!(modern.len() > legacy.len());
    }
}
