//! Length-prefixed framing and the optional compression wrapper
//!
//! Wire layout per frame: `varint length` (at most 3 bytes), then — once
//! compression has been negotiated — `varint inflated_size` followed by
//! either the raw payload (inflated_size == 0, body below threshold) or a
//! zlib stream. The body is `varint packet_id` + payload either way.

use super::wire::{self, ProtocolError};
use bytes::{Buf, BufMut, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Protocol-level ceiling for the frame length varint (3 bytes).
pub const MAX_FRAME_LEN: usize = 2_097_151;

/// One decoded frame: packet id plus its payload bytes.
#[derive(Debug, Clone)]
pub struct Frame {
    pub packet_id: i32,
    pub payload: BytesMut,
}

/// Result of a [`FrameCodec::decode`] call over a partial buffer.
#[derive(Debug)]
pub enum DecodeResult {
    /// A complete frame was consumed from the buffer.
    Frame(Frame),
    /// Not enough bytes buffered yet.
    NeedMore,
}

/// Stateful frame codec for one connection. Compression threshold is set
/// exactly once, after the gateway emits SetCompression.
#[derive(Debug)]
pub struct FrameCodec {
    /// Configured ceiling for a single frame; tighter than [`MAX_FRAME_LEN`].
    max_frame_size: usize,
    /// Compression threshold, None until negotiated.
    threshold: Option<usize>,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(MAX_FRAME_LEN),
            threshold: None,
        }
    }

    /// Enable the compression wrapper for every subsequent frame.
    pub fn enable_compression(&mut self, threshold: usize) {
        self.threshold = Some(threshold);
    }

    pub fn compression_enabled(&self) -> bool {
        self.threshold.is_some()
    }

    /// Try to decode one frame from the front of `buf`. Consumes nothing on
    /// [`DecodeResult::NeedMore`]; fatal errors leave the buffer poisoned and
    /// the connection must be closed.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<DecodeResult, ProtocolError> {
        // Peek the length varint without consuming
        let mut peek = &buf[..];
        let before = peek.remaining();
        let length = match wire::read_varint_capped(&mut peek, 3) {
            Ok(v) => v,
            Err(ProtocolError::Malformed(_)) => return Ok(DecodeResult::NeedMore),
            Err(e) => return Err(e),
        };
        let header = before - peek.remaining();

        if length < 0 {
            return Err(ProtocolError::Malformed("negative frame length"));
        }
        let length = length as usize;
        if length > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                limit: self.max_frame_size,
            });
        }
        if buf.remaining() < header + length {
            return Ok(DecodeResult::NeedMore);
        }

        buf.advance(header);
        let mut body = buf.split_to(length);

        if self.threshold.is_some() {
            body = self.unwrap_compressed(body)?;
        }

        let mut rd = &body[..];
        let before = rd.remaining();
        let packet_id = wire::read_varint(&mut rd)?;
        let consumed = before - rd.remaining();
        body.advance(consumed);

        Ok(DecodeResult::Frame(Frame { packet_id, payload: body }))
    }

    /// Strip the compression wrapper: a declared inflated size of zero means
    /// the body is raw; anything else is a zlib stream that must inflate to
    /// exactly the declared size.
    fn unwrap_compressed(&self, mut body: BytesMut) -> Result<BytesMut, ProtocolError> {
        let mut rd = &body[..];
        let before = rd.remaining();
        let declared = wire::read_varint(&mut rd)?;
        let consumed = before - rd.remaining();
        body.advance(consumed);

        if declared == 0 {
            return Ok(body);
        }
        if declared < 0 || declared as usize > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: declared.max(0) as usize,
                limit: self.max_frame_size,
            });
        }

        let declared = declared as usize;
        let mut inflated = Vec::with_capacity(declared.min(8192));
        let mut decoder = ZlibDecoder::new(&body[..]).take(declared as u64 + 1);
        decoder
            .read_to_end(&mut inflated)
            .map_err(|_| ProtocolError::Malformed("zlib stream corrupt"))?;
        if inflated.len() != declared {
            return Err(ProtocolError::CompressionMismatch {
                declared,
                actual: inflated.len(),
            });
        }
        Ok(BytesMut::from(&inflated[..]))
    }

    /// Frame an already-encoded packet body (`varint id` + payload) for the
    /// wire, applying the compression wrapper when negotiated.
    pub fn encode(&self, body: &[u8]) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::with_capacity(body.len() + 8);
        match self.threshold {
            None => {
                wire::write_varint(&mut out, body.len() as i32);
                out.put_slice(body);
            }
            Some(threshold) if body.len() < threshold => {
                wire::write_varint(&mut out, body.len() as i32 + 1);
                wire::write_varint(&mut out, 0);
                out.put_slice(body);
            }
            Some(_) => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body)?;
                let deflated = encoder.finish()?;
                let inner = wire::varint_len(body.len() as i32) + deflated.len();
                wire::write_varint(&mut out, inner as i32);
                wire::write_varint(&mut out, body.len() as i32);
                out.put_slice(&deflated);
            }
        }
        if out.len() > MAX_FRAME_LEN + 3 {
            return Err(ProtocolError::FrameTooLarge {
                size: out.len(),
                limit: MAX_FRAME_LEN,
            });
        }
        Ok(out)
    }

    /// Convenience: frame a packet id + payload.
    pub fn encode_packet(&self, packet_id: i32, payload: &[u8]) -> Result<BytesMut, ProtocolError> {
        let mut body = BytesMut::with_capacity(payload.len() + 5);
        wire::write_varint(&mut body, packet_id);
        body.put_slice(payload);
        self.encode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_roundtrip() {
        let codec = FrameCodec::new(1 << 20);
        let framed = codec.encode_packet(0x00, b"hello").unwrap();

        let mut buf = BytesMut::from(&framed[..]);
        match codec.decode(&mut buf).unwrap() {
            DecodeResult::Frame(f) => {
                assert_eq!(f.packet_id, 0x00);
                assert_eq!(&f.payload[..], b"hello");
            }
            DecodeResult::NeedMore => panic!("expected frame"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_partial_needs_more() {
        let codec = FrameCodec::new(1 << 20);
        let framed = codec.encode_packet(0x05, &[0u8; 64]).unwrap();

        for cut in 0..framed.len() {
            let mut buf = BytesMut::from(&framed[..cut]);
            assert!(matches!(codec.decode(&mut buf), Ok(DecodeResult::NeedMore)));
            assert_eq!(buf.len(), cut, "NeedMore must not consume");
        }
    }

    #[test]
    fn test_oversize_frame_fatal() {
        let codec = FrameCodec::new(256);
        let mut buf = BytesMut::new();
        wire::write_varint(&mut buf, 2_000_000);
        buf.put_slice(&[0u8; 32]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { size: 2_000_000, .. })
        ));
    }

    #[test]
    fn test_compressed_roundtrip_above_threshold() {
        let mut codec = FrameCodec::new(1 << 20);
        codec.enable_compression(16);
        let payload = vec![7u8; 4096];
        let framed = codec.encode_packet(0x21, &payload).unwrap();
        // zlib should beat 4 KiB of constant bytes
        assert!(framed.len() < payload.len());

        let mut buf = BytesMut::from(&framed[..]);
        match codec.decode(&mut buf).unwrap() {
            DecodeResult::Frame(f) => {
                assert_eq!(f.packet_id, 0x21);
                assert_eq!(&f.payload[..], &payload[..]);
            }
            DecodeResult::NeedMore => panic!("expected frame"),
        }
    }

    #[test]
    fn test_compressed_below_threshold_is_raw() {
        let mut codec = FrameCodec::new(1 << 20);
        codec.enable_compression(256);
        let framed = codec.encode_packet(0x00, b"tiny").unwrap();

        // wrapper: outer length, inflated_size == 0, then raw body
        let mut rd = BytesMut::from(&framed[..]);
        let _outer = wire::read_varint(&mut rd).unwrap();
        assert_eq!(wire::read_varint(&mut rd).unwrap(), 0);
    }

    #[test]
    fn test_declared_size_mismatch_fatal() {
        let mut codec = FrameCodec::new(1 << 20);
        codec.enable_compression(16);
        let framed = codec.encode_packet(0x21, &[7u8; 4096]).unwrap();

        // Re-declare the inflated size one byte short
        let mut rd = &framed[..];
        let before = rd.len();
        let outer = wire::read_varint(&mut rd).unwrap();
        let header = before - rd.len();
        let mut tampered = BytesMut::new();
        wire::write_varint(&mut tampered, outer);
        let mut inner = &framed[header..];
        let before = inner.len();
        let declared = wire::read_varint(&mut inner).unwrap();
        let inner_header = before - inner.len();
        wire::write_varint(&mut tampered, declared - 1);
        tampered.put_slice(&framed[header + inner_header..]);
        // Outer length changed only if varint width changed; it did not here.

        let mut buf = tampered;
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::CompressionMismatch { .. })
        ));
    }
}
