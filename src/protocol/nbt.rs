//! Binary tag (NBT) reader and writer
//!
//! Covers the tag subset the gateway emits: the dimension codec, biome and
//! damage-type registries, and chunk heightmaps. Reads are depth-limited and
//! size-capped so a hostile payload cannot recurse or allocate unboundedly.

use super::wire::ProtocolError;
use bytes::{Buf, BufMut, BytesMut};
use std::collections::BTreeMap;

/// Maximum nesting depth accepted when parsing.
const MAX_DEPTH: usize = 32;

/// Maximum element count for lists and arrays accepted when parsing.
const MAX_ELEMENTS: usize = 1 << 16;

const TAG_END: u8 = 0;
const TAG_BYTE: u8 = 1;
const TAG_SHORT: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_LONG: u8 = 4;
const TAG_FLOAT: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_BYTE_ARRAY: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_LIST: u8 = 9;
const TAG_COMPOUND: u8 = 10;
const TAG_INT_ARRAY: u8 = 11;
const TAG_LONG_ARRAY: u8 = 12;

/// A single NBT value. Compounds use a BTreeMap so encoding is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<u8>),
    String(String),
    List(Vec<Tag>),
    Compound(BTreeMap<String, Tag>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    fn type_id(&self) -> u8 {
        match self {
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    /// Write as a named root compound: `0x0A <name> <payload>`.
    pub fn write_named(&self, name: &str, buf: &mut BytesMut) {
        buf.put_u8(self.type_id());
        write_nbt_string(buf, name);
        self.write_payload(buf);
    }

    /// Write as a nameless root: `0x0A <payload>` (network NBT, ≥1.20.2).
    pub fn write_nameless(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id());
        self.write_payload(buf);
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Tag::Byte(v) => buf.put_i8(*v),
            Tag::Short(v) => buf.put_i16(*v),
            Tag::Int(v) => buf.put_i32(*v),
            Tag::Long(v) => buf.put_i64(*v),
            Tag::Float(v) => buf.put_f32(*v),
            Tag::Double(v) => buf.put_f64(*v),
            Tag::ByteArray(v) => {
                buf.put_i32(v.len() as i32);
                buf.put_slice(v);
            }
            Tag::String(v) => write_nbt_string(buf, v),
            Tag::List(items) => {
                let elem_type = items.first().map_or(TAG_END, Tag::type_id);
                buf.put_u8(elem_type);
                buf.put_i32(items.len() as i32);
                for item in items {
                    item.write_payload(buf);
                }
            }
            Tag::Compound(map) => {
                for (name, tag) in map {
                    buf.put_u8(tag.type_id());
                    write_nbt_string(buf, name);
                    tag.write_payload(buf);
                }
                buf.put_u8(TAG_END);
            }
            Tag::IntArray(v) => {
                buf.put_i32(v.len() as i32);
                for x in v {
                    buf.put_i32(*x);
                }
            }
            Tag::LongArray(v) => {
                buf.put_i32(v.len() as i32);
                for x in v {
                    buf.put_i64(*x);
                }
            }
        }
    }

    /// Parse a named root compound.
    pub fn read_named(buf: &mut impl Buf) -> Result<(String, Tag), ProtocolError> {
        if !buf.has_remaining() {
            return Err(ProtocolError::Malformed("empty nbt"));
        }
        let type_id = buf.get_u8();
        let name = read_nbt_string(buf)?;
        let tag = read_payload(buf, type_id, 0)?;
        Ok((name, tag))
    }
}

fn write_nbt_string(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn read_nbt_string(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Malformed("nbt string truncated"));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Malformed("nbt string truncated"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("nbt string not utf-8"))
}

fn read_len(buf: &mut impl Buf) -> Result<usize, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Malformed("nbt length truncated"));
    }
    let len = buf.get_i32();
    if len < 0 || len as usize > MAX_ELEMENTS {
        return Err(ProtocolError::Malformed("nbt length out of range"));
    }
    Ok(len as usize)
}

fn read_payload(buf: &mut impl Buf, type_id: u8, depth: usize) -> Result<Tag, ProtocolError> {
    if depth > MAX_DEPTH {
        return Err(ProtocolError::Malformed("nbt nesting too deep"));
    }
    macro_rules! need {
        ($n:expr) => {
            if buf.remaining() < $n {
                return Err(ProtocolError::Malformed("nbt payload truncated"));
            }
        };
    }
    Ok(match type_id {
        TAG_BYTE => {
            need!(1);
            Tag::Byte(buf.get_i8())
        }
        TAG_SHORT => {
            need!(2);
            Tag::Short(buf.get_i16())
        }
        TAG_INT => {
            need!(4);
            Tag::Int(buf.get_i32())
        }
        TAG_LONG => {
            need!(8);
            Tag::Long(buf.get_i64())
        }
        TAG_FLOAT => {
            need!(4);
            Tag::Float(buf.get_f32())
        }
        TAG_DOUBLE => {
            need!(8);
            Tag::Double(buf.get_f64())
        }
        TAG_BYTE_ARRAY => {
            let len = read_len(buf)?;
            need!(len);
            let mut v = vec![0u8; len];
            buf.copy_to_slice(&mut v);
            Tag::ByteArray(v)
        }
        TAG_STRING => Tag::String(read_nbt_string(buf)?),
        TAG_LIST => {
            need!(1);
            let elem_type = buf.get_u8();
            let len = read_len(buf)?;
            if elem_type == TAG_END && len > 0 {
                return Err(ProtocolError::Malformed("nbt list of end tags"));
            }
            let mut items = Vec::with_capacity(len.min(64));
            for _ in 0..len {
                items.push(read_payload(buf, elem_type, depth + 1)?);
            }
            Tag::List(items)
        }
        TAG_COMPOUND => {
            let mut map = BTreeMap::new();
            loop {
                need!(1);
                let child_type = buf.get_u8();
                if child_type == TAG_END {
                    break;
                }
                let name = read_nbt_string(buf)?;
                let tag = read_payload(buf, child_type, depth + 1)?;
                map.insert(name, tag);
            }
            Tag::Compound(map)
        }
        TAG_INT_ARRAY => {
            let len = read_len(buf)?;
            need!(len * 4);
            Tag::IntArray((0..len).map(|_| buf.get_i32()).collect())
        }
        TAG_LONG_ARRAY => {
            let len = read_len(buf)?;
            need!(len * 8);
            Tag::LongArray((0..len).map(|_| buf.get_i64()).collect())
        }
        _ => return Err(ProtocolError::Malformed("unknown nbt tag type")),
    })
}

/// Shorthand for building compounds.
#[macro_export]
macro_rules! nbt_compound {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::BTreeMap::new();
        $( map.insert($key.to_string(), $value); )*
        $crate::protocol::nbt::Tag::Compound(map)
    }};
}
