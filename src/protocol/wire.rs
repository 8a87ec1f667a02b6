//! Wire primitives — varints, capped strings, encoded positions
//!
//! Every read is bounds-checked against the remaining buffer and against a
//! per-field cap. A malformed or oversized field is a [`ProtocolError`],
//! never a panic or an unbounded allocation.

use super::version::ProtocolVersion;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Hard cap for any length-prefixed string the protocol allows.
pub const MAX_STRING_LEN: usize = 32_767;

/// Usernames are at most 16 code points.
pub const MAX_USERNAME_LEN: usize = 16;

/// Client brand strings are capped well below the generic string limit.
pub const MAX_BRAND_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {size} bytes exceeds ceiling of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("declared inflated size {declared} but got {actual}")]
    CompressionMismatch { declared: usize, actual: usize },

    #[error("unknown packet id {id:#04x} in {context}")]
    UnknownPacketId { id: i32, context: &'static str },

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(i32),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    #[error("varint longer than {0} bytes")]
    VarIntTooLong(usize),

    #[error("string of {len} bytes exceeds cap of {cap}")]
    StringTooLong { len: usize, cap: usize },
}

// =============================================================================
// VARINT / VARLONG
// =============================================================================

/// Read a signed 32-bit varint (1-5 bytes, LEB128 low-to-high).
pub fn read_varint(buf: &mut impl Buf) -> Result<i32, ProtocolError> {
    read_varint_capped(buf, 5)
}

/// Read a varint with a tighter byte cap. Frame length prefixes are capped
/// at 3 bytes (2 097 151) by the protocol.
pub fn read_varint_capped(buf: &mut impl Buf, max_bytes: usize) -> Result<i32, ProtocolError> {
    let mut value: u32 = 0;
    for i in 0..max_bytes {
        if !buf.has_remaining() {
            return Err(ProtocolError::Malformed("varint truncated"));
        }
        let byte = buf.get_u8();
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i32);
        }
    }
    Err(ProtocolError::VarIntTooLong(max_bytes))
}

/// Read a signed 64-bit varlong (1-10 bytes).
pub fn read_varlong(buf: &mut impl Buf) -> Result<i64, ProtocolError> {
    let mut value: u64 = 0;
    for i in 0..10 {
        if !buf.has_remaining() {
            return Err(ProtocolError::Malformed("varlong truncated"));
        }
        let byte = buf.get_u8();
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value as i64);
        }
    }
    Err(ProtocolError::VarIntTooLong(10))
}

pub fn write_varint(buf: &mut BytesMut, value: i32) {
    let mut v = value as u32;
    loop {
        if v & !0x7F == 0 {
            buf.put_u8(v as u8);
            return;
        }
        buf.put_u8((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
}

pub fn write_varlong(buf: &mut BytesMut, value: i64) {
    let mut v = value as u64;
    loop {
        if v & !0x7F == 0 {
            buf.put_u8(v as u8);
            return;
        }
        buf.put_u8((v as u8 & 0x7F) | 0x80);
        v >>= 7;
    }
}

/// Encoded byte length of a varint without writing it.
pub fn varint_len(value: i32) -> usize {
    let v = value as u32;
    match v {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        0x20_0000..=0xFFF_FFFF => 4,
        _ => 5,
    }
}

// =============================================================================
// STRINGS
// =============================================================================

/// Read a length-prefixed UTF-8 string, rejecting anything over `cap` bytes
/// before allocating.
pub fn read_string(buf: &mut impl Buf, cap: usize) -> Result<String, ProtocolError> {
    let len = read_varint(buf)?;
    if len < 0 {
        return Err(ProtocolError::Malformed("negative string length"));
    }
    let len = len as usize;
    if len > cap {
        return Err(ProtocolError::StringTooLong { len, cap });
    }
    if buf.remaining() < len {
        return Err(ProtocolError::Malformed("string truncated"));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| ProtocolError::Malformed("string not utf-8"))
}

pub fn write_string(buf: &mut BytesMut, s: &str) {
    write_varint(buf, s.len() as i32);
    buf.put_slice(s.as_bytes());
}

/// Read a length-prefixed byte array with a cap. Used for plugin message
/// payloads on 1.8+ (1.7 uses a short prefix).
pub fn read_byte_array(buf: &mut impl Buf, cap: usize) -> Result<Vec<u8>, ProtocolError> {
    let len = buf.remaining();
    if len > cap {
        return Err(ProtocolError::StringTooLong { len, cap });
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(bytes)
}

// =============================================================================
// POSITIONS
// =============================================================================

/// Pack a block position into the version-exact 64-bit layout.
///
/// 1.14+:  ((x & 0x3FFFFFF) << 38) | ((z & 0x3FFFFFF) << 12) | (y & 0xFFF)
/// <1.14:  (x << 38) | ((y & 0xFFF) << 26) | (z & 0x3FFFFFF)
pub fn encode_position(version: ProtocolVersion, x: i32, y: i32, z: i32) -> u64 {
    let (x, y, z) = (x as i64, y as i64, z as i64);
    if version.modern_position() {
        (((x & 0x3FF_FFFF) << 38) | ((z & 0x3FF_FFFF) << 12) | (y & 0xFFF)) as u64
    } else {
        ((x << 38) | ((y & 0xFFF) << 26) | (z & 0x3FF_FFFF)) as u64
    }
}

/// Unpack a position encoded with [`encode_position`]. Sign-extends each
/// component.
pub fn decode_position(version: ProtocolVersion, packed: u64) -> (i32, i32, i32) {
    let v = packed as i64;
    if version.modern_position() {
        let x = (v >> 38) as i32;
        let y = ((v << 52) >> 52) as i32;
        let z = ((v << 26) >> 38) as i32;
        (sign26(x), y, z)
    } else {
        let x = (v >> 38) as i32;
        let y = ((v >> 26) & 0xFFF) as i32;
        let z = ((v << 38) >> 38) as i32;
        (sign26(x), sign12(y), sign26(z))
    }
}

#[inline]
fn sign26(v: i32) -> i32 {
    (v << 6) >> 6
}

#[inline]
fn sign12(v: i32) -> i32 {
    (v << 20) >> 20
}
