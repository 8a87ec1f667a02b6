//! Turnstile — anti-bot limbo gateway
//!
//! Suspect connections are diverted into an ephemeral in-process world and
//! must fall onto an invisible platform under exact vanilla gravity before
//! the backend ever sees them. Humans pass in under a second; bots fail,
//! get throttled, and end up blacklisted.

pub mod config;
pub mod limbo;
pub mod net;
pub mod protocol;
pub mod types;

pub use config::Config;
pub use limbo::{Assets, FailReason, Session, Verdict};
pub use net::{Admission, AdmissionGate, EventSink, Gateway, LogSink};
pub use protocol::{ProtocolVersion, MAX_SUPPORTED, MIN_SUPPORTED};
pub use types::{offline_uuid, DisconnectReason};
