//! Shared types — disconnect reasons, identity, time

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use uuid::Uuid;

/// Seconds since the Unix epoch.
pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Why a connection was turned away. The surrounding layer maps each reason
/// to its pre-authored chat component; the core never formats user text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    VerificationSuccess,
    VerificationFailed,
    TooManyPlayers,
    TooFastReconnect,
    AlreadyVerifying,
    AlreadyQueued,
    AlreadyConnected,
    Blacklisted,
    InvalidUsername,
    InvalidProtocol,
    Lockdown,
}

impl DisconnectReason {
    /// Stable key used for config overrides and logging.
    pub fn key(self) -> &'static str {
        match self {
            DisconnectReason::VerificationSuccess => "verification_success",
            DisconnectReason::VerificationFailed => "verification_failed",
            DisconnectReason::TooManyPlayers => "too_many_players",
            DisconnectReason::TooFastReconnect => "too_fast_reconnect",
            DisconnectReason::AlreadyVerifying => "already_verifying",
            DisconnectReason::AlreadyQueued => "already_queued",
            DisconnectReason::AlreadyConnected => "already_connected",
            DisconnectReason::Blacklisted => "blacklisted",
            DisconnectReason::InvalidUsername => "invalid_username",
            DisconnectReason::InvalidProtocol => "invalid_protocol",
            DisconnectReason::Lockdown => "lockdown",
        }
    }

    pub const ALL: [DisconnectReason; 11] = [
        DisconnectReason::VerificationSuccess,
        DisconnectReason::VerificationFailed,
        DisconnectReason::TooManyPlayers,
        DisconnectReason::TooFastReconnect,
        DisconnectReason::AlreadyVerifying,
        DisconnectReason::AlreadyQueued,
        DisconnectReason::AlreadyConnected,
        DisconnectReason::Blacklisted,
        DisconnectReason::InvalidUsername,
        DisconnectReason::InvalidProtocol,
        DisconnectReason::Lockdown,
    ];
}

/// Derive the offline-mode UUID for a username: hash the canonical offline
/// string and stamp the version-3/variant bits onto the digest.
pub fn offline_uuid(username: &str) -> Uuid {
    let mut hasher = Sha3_256::new();
    hasher.update(b"OfflinePlayer:");
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    bytes[6] = (bytes[6] & 0x0F) | 0x30; // version 3
    bytes[8] = (bytes[8] & 0x3F) | 0x80; // RFC 4122 variant
    Uuid::from_bytes(bytes)
}
