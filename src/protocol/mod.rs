//! Wire protocol layer — framing, primitives, packet tables

pub mod frame;
pub mod join_game;
pub mod nbt;
pub mod packets;
pub mod registry;
pub mod version;
pub mod wire;

pub use frame::{DecodeResult, Frame, FrameCodec, MAX_FRAME_LEN};
pub use packets::ServerPacket;
pub use registry::{Direction, PacketType, Phase, Registry};
pub use version::{ProtocolVersion, MAX_SUPPORTED, MIN_SUPPORTED};
pub use wire::ProtocolError;
