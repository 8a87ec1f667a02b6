//! The limbo world — precomputed assets and the verification session

pub mod assets;
pub mod chunk;
pub mod motion;
pub mod session;

pub use assets::{Assets, VersionAssets};
pub use motion::{MotionTable, BLOCKS_PER_ROW, PLATFORM_TOP_Y};
pub use session::{FailReason, Session, State, Verdict};
