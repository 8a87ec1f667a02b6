//! Gateway configuration snapshot
//!
//! One immutable value assembled at startup and shared by reference. Every
//! knob the verification core consults lives here; the binary overlays an
//! optional JSON file onto the defaults and then applies CLI flags.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Upper bound accepted when loading a config file.
const MAX_CONFIG_FILE_SIZE: u64 = 256 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Gravity-check window in ticks.
    pub max_movement_ticks: usize,
    /// Missing or duplicated position packets absorbed before failing.
    pub max_ignored_ticks: usize,
    /// Cap on concurrently verifying sessions.
    pub max_verifying_players: usize,
    /// Queue promotions per 500 ms drain tick.
    pub max_queue_polls: usize,
    /// Pending-queue capacity.
    pub max_queue_size: usize,
    /// Inbound packet ceiling per verification session.
    pub max_login_packets: usize,
    /// Per-read deadline in milliseconds.
    pub read_timeout_ms: u64,
    /// Reconnects from one IP faster than this are rejected (milliseconds).
    pub reconnect_delay_ms: u64,
    /// Brand string byte cap.
    pub max_brand_length: usize,
    /// Frame payload ceiling in bytes.
    pub max_frame_size: usize,
    /// Emit SetCompression during login (1.8+ clients only).
    pub enable_compression: bool,
    /// Compression threshold in bytes once enabled.
    pub compression_threshold: usize,
    /// Gamemode placed in JoinGame. Adventure by default: the player must
    /// be subject to gravity but unable to break the platform.
    pub gamemode_id: u8,
    /// New admissions per second that trip attack mode.
    pub min_players_for_attack: usize,
    /// Concurrent connections allowed per IP.
    pub max_online_per_ip: usize,
    /// Consecutive failures before an IP is blacklisted.
    pub blacklist_threshold: u32,
    /// Same, while attack mode is active.
    pub blacklist_threshold_attack: u32,
    /// Blacklist entry time-to-live in seconds.
    pub blacklist_ttl_secs: u64,
    /// Verified-store entry horizon in seconds.
    pub verified_ttl_secs: u64,
    /// Verified-store size bound (IPs).
    pub max_verified_entries: usize,
    /// Absolute wall-clock budget for one verification in milliseconds.
    pub verify_timeout_ms: u64,
    /// Allowed Y drift per gravity tick, beyond the tabulated motion.
    pub gravity_tolerance: f64,
    /// Enforce the platform landing check after gravity passes.
    pub check_collision: bool,
    /// Keep logging each connection while under attack.
    pub log_during_attack: bool,
    /// Reject everything when enabled.
    pub lockdown: bool,
    /// Permission node checked by the surrounding platform for lockdown
    /// bypass; the core only stores it.
    pub lockdown_bypass_permission: String,
    /// Override texts per disconnect reason key.
    pub messages: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_movement_ticks: 8,
            max_ignored_ticks: 5,
            max_verifying_players: 1024,
            max_queue_polls: 10,
            max_queue_size: 8192,
            max_login_packets: 256,
            read_timeout_ms: 8000,
            reconnect_delay_ms: 8000,
            max_brand_length: 64,
            max_frame_size: 8192,
            enable_compression: true,
            compression_threshold: 256,
            gamemode_id: 2,
            min_players_for_attack: 8,
            max_online_per_ip: 3,
            blacklist_threshold: 2,
            blacklist_threshold_attack: 1,
            blacklist_ttl_secs: 600,
            verified_ttl_secs: 86_400 * 7,
            max_verified_entries: 100_000,
            verify_timeout_ms: 10_000,
            gravity_tolerance: 0.01,
            check_collision: true,
            log_during_attack: false,
            lockdown: false,
            lockdown_bypass_permission: "turnstile.lockdown.bypass".into(),
            messages: HashMap::new(),
        }
    }
}

impl Config {
    /// Overlay a JSON config file onto the defaults. Missing file is an
    /// error; missing keys fall back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let meta = std::fs::metadata(&path)?;
        if meta.len() > MAX_CONFIG_FILE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("config file too large: {} bytes", meta.len()),
            ));
        }
        let data = std::fs::read(&path)?;
        serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Message text for a reason, honoring overrides.
    pub fn message_for(&self, key: &str) -> String {
        if let Some(text) = self.messages.get(key) {
            return text.clone();
        }
        match key {
            "verification_success" => "Verification complete — reconnect to join.".into(),
            "verification_failed" => "Verification failed — try again shortly.".into(),
            "too_many_players" => "The verification queue is full, try again shortly.".into(),
            "too_fast_reconnect" => "Reconnecting too fast, wait a few seconds.".into(),
            "already_verifying" => "A verification for your address is already running.".into(),
            "already_queued" => "Your address is already waiting in the queue.".into(),
            "already_connected" => "Too many connections from your address.".into(),
            "blacklisted" => "Your address is temporarily blocked.".into(),
            "invalid_username" => "Invalid username.".into(),
            "invalid_protocol" => "Unsupported client version.".into(),
            "lockdown" => "The server is locked down, try again later.".into(),
            _ => "Disconnected.".into(),
        }
    }

    // ------------------------------------------------------------------
    // Input validators. These implement the valid*Regex knobs as explicit
    // character classes; the default patterns are documented inline.
    // ------------------------------------------------------------------

    /// `^[A-Za-z0-9_]{1,16}$`
    pub fn valid_username(&self, name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 16
            && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }

    /// `^[a-zA-Z]{2,3}([_-][a-zA-Z0-9]{2,8})?$` — e.g. `en_US`, `fi`, `zh_CN`.
    pub fn valid_locale(&self, locale: &str) -> bool {
        let mut parts = locale.splitn(2, ['_', '-']);
        let lang = match parts.next() {
            Some(l) => l,
            None => return false,
        };
        if !(2..=3).contains(&lang.len()) || !lang.bytes().all(|b| b.is_ascii_alphabetic()) {
            return false;
        }
        match parts.next() {
            None => true,
            Some(region) => {
                (2..=8).contains(&region.len())
                    && region.bytes().all(|b| b.is_ascii_alphanumeric())
            }
        }
    }

    /// Printable ASCII up to `max_brand_length` bytes, e.g. `vanilla`,
    /// `fabric`.
    pub fn valid_brand(&self, brand: &[u8]) -> bool {
        !brand.is_empty()
            && brand.len() <= self.max_brand_length
            && brand.iter().all(|&b| (0x20..0x7F).contains(&b))
    }
}
