//! Empty spawn chunk and the barrier platform, per version bracket
//!
//! These payloads are assembled once at startup and replayed verbatim to
//! every verifying client. Only chunk (0,0) exists; the platform is an 8×8
//! square of solid blocks whose top surface is Y=256, delivered as one
//! section-blocks update.

use crate::nbt_compound;
use crate::protocol::nbt::Tag;
use crate::protocol::version::ProtocolVersion;
use crate::protocol::wire;
use bytes::{BufMut, BytesMut};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;

use super::motion::BLOCKS_PER_ROW;

/// Y of the solid platform layer (top surface at 256).
pub const PLATFORM_BLOCK_Y: i32 = 255;

/// Sub-chunk holding the platform layer.
const PLATFORM_SECTION_Y: i32 = PLATFORM_BLOCK_Y / 16;

/// Global-palette state id of the barrier block, which moved with every
/// palette rewrite since flattening. Pre-1.13 versions use (id << 4 | meta);
/// 1.7 predates barriers entirely and gets plain stone.
fn platform_state_id(version: ProtocolVersion) -> i32 {
    use ProtocolVersion::*;
    static RUNS: &[(ProtocolVersion, i32)] = &[
        (V1_7_2, 1 << 4),    // stone
        (V1_8, 166 << 4),    // barrier, legacy id+meta
        (V1_13, 6493),
        (V1_14, 7000),
        (V1_15, 7162),
        (V1_16, 7536),
        (V1_17, 7754),
        (V1_19, 8107),
        (V1_19_3, 10008),
        (V1_19_4, 10245),
        (V1_20, 10368),
    ];
    RUNS.iter()
        .rev()
        .find(|(first, _)| *first <= version)
        .map(|(_, id)| *id)
        .unwrap_or(1 << 4)
}

// =============================================================================
// EMPTY CHUNK
// =============================================================================

/// Encode the empty full chunk at (0, 0) for `version`.
pub fn encode_empty_chunk(version: ProtocolVersion) -> BytesMut {
    use ProtocolVersion::*;
    let mut buf = BytesMut::new();
    buf.put_i32(0); // chunk X
    buf.put_i32(0); // chunk Z

    if version <= V1_7_6 {
        // Ground-up continuous, no sections, zlib-deflated biome array.
        buf.put_u8(1);
        buf.put_u16(0); // primary bitmask
        buf.put_u16(0); // add bitmask
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&[0u8; 256]).ok();
        let deflated = enc.finish().unwrap_or_default();
        buf.put_i32(deflated.len() as i32);
        buf.put_slice(&deflated);
        return buf;
    }

    if version < V1_14 {
        buf.put_u8(1); // ground-up continuous
        if version == V1_8 {
            buf.put_u16(0);
        } else {
            wire::write_varint(&mut buf, 0);
        }
        // Data is only the biome plane: one byte per column through 1.12,
        // one int per column on 1.13.
        if version >= V1_13 {
            wire::write_varint(&mut buf, 1024);
            buf.put_slice(&[0u8; 1024]);
        } else {
            wire::write_varint(&mut buf, 256);
            buf.put_slice(&[0u8; 256]);
        }
        if version >= V1_9_4 {
            wire::write_varint(&mut buf, 0); // block entities
        }
        return buf;
    }

    if version < V1_18 {
        buf.put_u8(1); // full chunk
        if version == V1_16 || version == V1_16_1 {
            buf.put_u8(1); // ignore old data
        }
        if version >= V1_17 {
            // Section mask as a BitSet of longs
            wire::write_varint(&mut buf, 1);
            buf.put_i64(0);
        } else {
            wire::write_varint(&mut buf, 0);
        }
        heightmaps().write_named("", &mut buf);
        if version >= V1_16_2 {
            wire::write_varint(&mut buf, 1024);
            for _ in 0..1024 {
                wire::write_varint(&mut buf, 0);
            }
        } else if version >= V1_15 {
            for _ in 0..1024 {
                buf.put_i32(0);
            }
        }
        if version >= V1_15 {
            wire::write_varint(&mut buf, 0); // data
        } else {
            // 1.14 still ships biomes inside the data blob
            wire::write_varint(&mut buf, 1024);
            buf.put_slice(&[0u8; 1024]);
        }
        wire::write_varint(&mut buf, 0); // block entities
        return buf;
    }

    // 1.18+: merged chunk-and-light packet. The limbo dimension declares a
    // 0..256 world, so 16 sections, each a single-value air container.
    heightmaps().write_named("", &mut buf);
    let mut sections = BytesMut::new();
    for _ in 0..16 {
        sections.put_i16(0); // non-air block count
        sections.put_u8(0); // block states: bits-per-entry 0
        wire::write_varint(&mut sections, 0); // single value: air
        wire::write_varint(&mut sections, 0); // data array length
        sections.put_u8(0); // biomes: bits-per-entry 0
        wire::write_varint(&mut sections, 0);
        wire::write_varint(&mut sections, 0);
    }
    wire::write_varint(&mut buf, sections.len() as i32);
    buf.put_slice(&sections);
    wire::write_varint(&mut buf, 0); // block entities

    if version < V1_20 {
        buf.put_u8(1); // trust edges
    }
    // Four empty light BitSets, then zero-length light arrays
    for _ in 0..4 {
        wire::write_varint(&mut buf, 0);
    }
    wire::write_varint(&mut buf, 0);
    wire::write_varint(&mut buf, 0);
    buf
}

fn heightmaps() -> Tag {
    // 256 columns at 9 bits, packed 7 per long
    nbt_compound! {
        "MOTION_BLOCKING" => Tag::LongArray(vec![0i64; 37]),
    }
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Encode the section-blocks update that materializes the 8×8 platform.
/// Columns span [4, 12) on both axes so the spawn column (8, 8) is interior.
pub fn encode_platform(version: ProtocolVersion) -> BytesMut {
    use ProtocolVersion::*;
    let state = platform_state_id(version);
    let half = BLOCKS_PER_ROW / 2;
    let mut buf = BytesMut::new();

    if version <= V1_7_6 {
        buf.put_i32(0);
        buf.put_i32(0);
        buf.put_u16((BLOCKS_PER_ROW * BLOCKS_PER_ROW) as u16);
        buf.put_i32(BLOCKS_PER_ROW * BLOCKS_PER_ROW * 4);
        for x in half..3 * half {
            for z in half..3 * half {
                let record = ((x as u32) << 28)
                    | ((z as u32) << 24)
                    | ((PLATFORM_BLOCK_Y as u32) << 16)
                    | (state as u32);
                buf.put_u32(record);
            }
        }
        return buf;
    }

    if version < V1_16_2 {
        buf.put_i32(0);
        buf.put_i32(0);
        wire::write_varint(&mut buf, BLOCKS_PER_ROW * BLOCKS_PER_ROW);
        for x in half..3 * half {
            for z in half..3 * half {
                buf.put_u8(((x as u8) << 4) | (z as u8));
                buf.put_u8(PLATFORM_BLOCK_Y as u8);
                wire::write_varint(&mut buf, state);
            }
        }
        return buf;
    }

    // 1.16.2+: section-keyed, packed varlong records
    let section_pos = ((0i64 & 0x3F_FFFF) << 42)
        | ((0i64 & 0x3F_FFFF) << 20)
        | (PLATFORM_SECTION_Y as i64 & 0xF_FFFF);
    buf.put_i64(section_pos);
    if version < V1_20 {
        buf.put_u8(1); // suppress light updates
    }
    wire::write_varint(&mut buf, BLOCKS_PER_ROW * BLOCKS_PER_ROW);
    let local_y = (PLATFORM_BLOCK_Y & 0xF) as i64;
    for x in half..3 * half {
        for z in half..3 * half {
            let record =
                ((state as i64) << 12) | ((x as i64) << 8) | ((z as i64) << 4) | local_y;
            wire::write_varlong(&mut buf, record);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_record_counts() {
        for v in [
            ProtocolVersion::V1_7_2,
            ProtocolVersion::V1_8,
            ProtocolVersion::V1_12_2,
            ProtocolVersion::V1_16_2,
            ProtocolVersion::V1_20_2,
        ] {
            let buf = encode_platform(v);
            assert!(!buf.is_empty(), "platform for {v}");
        }

        // 1.8 form is exactly 8 + 64 fixed-size-ish records
        let buf = encode_platform(ProtocolVersion::V1_8);
        let mut rd = &buf[8..];
        use bytes::Buf;
        let count = wire::read_varint(&mut rd).unwrap();
        assert_eq!(count, 64);
        // Each record: coords byte + y byte + 2-byte varint for state 2656
        assert_eq!(rd.remaining(), 64 * 4);
    }

    #[test]
    fn test_platform_section_position_packing() {
        let buf = encode_platform(ProtocolVersion::V1_20_2);
        let packed = i64::from_be_bytes(buf[..8].try_into().unwrap());
        assert_eq!(packed & 0xF_FFFF, 15); // section Y
        assert_eq!(packed >> 42, 0); // section X
    }

    #[test]
    fn test_platform_columns_cover_spawn() {
        // Spawn column (8, 8) must be inside [4, 12) on both axes
        let half = BLOCKS_PER_ROW / 2;
        assert!((half..3 * half).contains(&8));
    }

    #[test]
    fn test_empty_chunk_brackets_nonempty() {
        for v in [
            ProtocolVersion::V1_7_2,
            ProtocolVersion::V1_8,
            ProtocolVersion::V1_9_4,
            ProtocolVersion::V1_13,
            ProtocolVersion::V1_14,
            ProtocolVersion::V1_15,
            ProtocolVersion::V1_16,
            ProtocolVersion::V1_16_2,
            ProtocolVersion::V1_17,
            ProtocolVersion::V1_18,
            ProtocolVersion::V1_20,
            ProtocolVersion::V1_20_2,
        ] {
            let buf = encode_empty_chunk(v);
            // chunk coords always lead
            assert_eq!(&buf[..8], &[0u8; 8], "chunk coords for {v}");
            assert!(buf.len() > 8, "chunk body for {v}");
        }
    }

    #[test]
    fn test_modern_chunk_has_16_air_sections() {
        let buf = encode_empty_chunk(ProtocolVersion::V1_20_2);
        // 16 sections × (2 + 1 + 1 + 1 + 1 + 1 + 1) bytes
        let section_bytes = 16 * 8;
        assert!(buf.len() > section_bytes);
    }

    #[test]
    fn test_barrier_id_eras() {
        assert_eq!(platform_state_id(ProtocolVersion::V1_8), 166 << 4);
        assert_eq!(platform_state_id(ProtocolVersion::V1_12_2), 166 << 4);
        assert_ne!(
            platform_state_id(ProtocolVersion::V1_13),
            platform_state_id(ProtocolVersion::V1_12_2)
        );
    }
}
