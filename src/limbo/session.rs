//! The fallback verification session
//!
//! One session per suspect connection, driven entirely by decoded packets —
//! no sockets in here. The listener feeds inbound wire bytes through
//! [`Session::receive`] and writes whatever [`Session::take_outbound`]
//! returns, so every dialogue in the state table is unit-testable.
//!
//! State flow:
//!
//! ```text
//! AwaitLoginStart → (1.20.2+: AwaitLoginAck → AwaitConfigAck) →
//! AwaitKeepAlive → Falling → Collided → Success
//!                      └──────── any guard breach ────→ Failed
//! ```

use super::assets::Assets;
use super::motion::{BLOCKS_PER_ROW, PLATFORM_TOP_Y};
use crate::config::Config;
use crate::protocol::frame::{DecodeResult, FrameCodec};
use crate::protocol::packets::{self, ServerPacket};
use crate::protocol::registry::{Direction, PacketType, Phase, Registry};
use crate::protocol::version::ProtocolVersion;
use crate::types::{now_millis, offline_uuid, DisconnectReason};
use bytes::BytesMut;
use rand::Rng;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

/// Spawn column: the center of the 8×8 platform.
const SPAWN_X: f64 = BLOCKS_PER_ROW as f64;
const SPAWN_Z: f64 = BLOCKS_PER_ROW as f64;

const TELEPORT_ID: i32 = 1;

/// Why a session reached `Failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailReason {
    #[error("protocol fault: {0}")]
    Protocol(String),

    #[error("packet {0:?} arrived out of order")]
    OutOfOrder(PacketType),

    #[error("invalid username")]
    InvalidUsername,

    #[error("invalid brand")]
    InvalidBrand,

    #[error("invalid locale")]
    InvalidLocale,

    #[error("gravity violation at tick {tick}: reported {reported}, expected {expected}")]
    GravityViolation { tick: usize, reported: f64, expected: f64 },

    #[error("landed outside the platform")]
    CollisionMissed,

    #[error("keep-alive token mismatch")]
    KeepAliveMismatch,

    #[error("verification timed out")]
    Timeout,

    #[error("too many packets")]
    TooManyPackets,

    #[error("cancelled")]
    Cancelled,
}

impl FailReason {
    /// Which pre-authored component the client sees.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            FailReason::InvalidUsername => DisconnectReason::InvalidUsername,
            _ => DisconnectReason::VerificationFailed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    AwaitLoginStart,
    /// 1.20.2+ only: LoginSuccess sent, waiting for LoginAcknowledged.
    AwaitLoginAck,
    /// 1.20.2+ only: registry sync sent, waiting for the finish ack.
    AwaitConfigAck,
    AwaitKeepAlive,
    Falling,
    Collided,
    Success,
    Failed,
}

/// What the caller must do after feeding bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Keep reading.
    Pending,
    /// Player passed. Disconnect with the success component and record the
    /// pair in the verified store.
    Success { username: String, uuid: Uuid },
    /// Player failed. Disconnect and bump the failure counter.
    Failed(FailReason),
}

pub struct Session {
    config: Arc<Config>,
    assets: Arc<Assets>,
    peer: IpAddr,
    version: ProtocolVersion,
    phase: Phase,
    state: State,

    codec: FrameCodec,
    inbound: BytesMut,
    outbound: BytesMut,

    username: String,
    uuid: Uuid,
    keep_alive_token: i64,

    /// Inbound packets seen, bounded by `max_login_packets`.
    packets_seen: usize,
    /// Index into the motion table for the next expected position.
    tick: usize,
    ignored_ticks: usize,
    last_y: f64,
    collision_seen: bool,
    settings_seen: bool,
    brand_seen: bool,

    started_at: u64,
    deadline: u64,
}

impl Session {
    pub fn new(
        config: Arc<Config>,
        assets: Arc<Assets>,
        peer: IpAddr,
        version: ProtocolVersion,
    ) -> Self {
        let started_at = now_millis();
        Self {
            codec: FrameCodec::new(config.max_frame_size),
            deadline: started_at + config.verify_timeout_ms,
            config,
            assets,
            peer,
            version,
            phase: Phase::Login,
            state: State::AwaitLoginStart,
            inbound: BytesMut::with_capacity(1024),
            outbound: BytesMut::new(),
            username: String::new(),
            uuid: Uuid::nil(),
            // i32 range: pre-1.12.2 clients echo the token through a 32-bit
            // field, and the comparison must survive the width change.
            keep_alive_token: i64::from(rand::thread_rng().gen::<i32>()),
            packets_seen: 0,
            tick: 0,
            ignored_ticks: 0,
            last_y: f64::NAN,
            collision_seen: false,
            settings_seen: false,
            brand_seen: false,
            started_at,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    /// Wire bytes queued for the peer. Drained by the owning task.
    pub fn take_outbound(&mut self) -> BytesMut {
        self.outbound.split()
    }

    /// Enforce the wall-clock budget; called before every read.
    pub fn check_deadline(&mut self, now: u64) -> Verdict {
        if now > self.deadline && !matches!(self.state, State::Success | State::Failed) {
            return self.fail(FailReason::Timeout);
        }
        Verdict::Pending
    }

    /// Feed raw bytes from the socket. Decodes as many frames as are
    /// complete and advances the state machine packet by packet.
    pub fn receive(&mut self, bytes: &[u8]) -> Verdict {
        self.inbound.extend_from_slice(bytes);
        loop {
            if matches!(self.state, State::Success | State::Failed) {
                return self.settled();
            }
            let frame = match self.codec.decode(&mut self.inbound) {
                Ok(DecodeResult::Frame(f)) => f,
                Ok(DecodeResult::NeedMore) => return Verdict::Pending,
                Err(e) => return self.fail(FailReason::Protocol(e.to_string())),
            };

            self.packets_seen += 1;
            if self.packets_seen > self.config.max_login_packets {
                return self.fail(FailReason::TooManyPackets);
            }

            let packet =
                match packets::decode_packet(self.phase, self.version, frame.packet_id, &frame.payload)
                {
                    Ok(Some(p)) => p,
                    // Unknown Play-bound id: dropped without decoding
                    Ok(None) => continue,
                    Err(e) => return self.fail(FailReason::Protocol(e.to_string())),
                };

            trace!(peer = %self.peer, ?packet, "inbound");
            if let Verdict::Failed(reason) = self.handle(packet) {
                return Verdict::Failed(reason);
            }
            if self.state == State::Success {
                return self.settled();
            }
        }
    }

    fn settled(&self) -> Verdict {
        match self.state {
            State::Success => Verdict::Success {
                username: self.username.clone(),
                uuid: self.uuid,
            },
            _ => Verdict::Failed(FailReason::Cancelled),
        }
    }

    // ------------------------------------------------------------------
    // Packet dispatch
    // ------------------------------------------------------------------

    fn handle(&mut self, packet: ServerPacket) -> Verdict {
        match (self.state, packet) {
            (State::AwaitLoginStart, ServerPacket::LoginStart { username, uuid }) => {
                self.on_login_start(username, uuid)
            }
            (State::AwaitLoginAck, ServerPacket::LoginAcknowledged) => self.on_login_ack(),
            (State::AwaitConfigAck, ServerPacket::FinishConfigurationAck) => self.on_config_ack(),
            (State::AwaitKeepAlive, ServerPacket::KeepAliveResponse { token }) => {
                if token != self.keep_alive_token {
                    return self.fail(FailReason::KeepAliveMismatch);
                }
                self.state = State::Falling;
                Verdict::Pending
            }
            (State::Falling | State::Collided, ServerPacket::PlayerPosition { x, y, z, on_ground }) => {
                self.on_position(x, y, z, on_ground)
            }
            (
                State::Falling | State::Collided,
                ServerPacket::PlayerPositionLook { x, y, z, on_ground, .. },
            ) => self.on_position(x, y, z, on_ground),

            // Piggybacked metadata: allowed in any post-login state, must
            // validate whenever it shows up.
            (_, ServerPacket::ClientInformation { locale }) => {
                self.settings_seen = true;
                if !self.config.valid_locale(&locale) {
                    return self.fail(FailReason::InvalidLocale);
                }
                Verdict::Pending
            }
            (_, ServerPacket::PluginMessage { channel, data }) => {
                if channel == "minecraft:brand" || channel == "MC|Brand" {
                    self.brand_seen = true;
                    if !self.validate_brand(&data) {
                        return self.fail(FailReason::InvalidBrand);
                    }
                }
                Verdict::Pending
            }
            (_, ServerPacket::TeleportConfirm { teleport_id }) => {
                if teleport_id != TELEPORT_ID {
                    return self.fail(FailReason::OutOfOrder(PacketType::TeleportConfirm));
                }
                Verdict::Pending
            }
            // Ignore stray keep-alives after the gate has been passed
            (State::Falling | State::Collided, ServerPacket::KeepAliveResponse { .. }) => {
                Verdict::Pending
            }

            // Anything else is known but unexpected here
            (_, other) => self.fail(FailReason::OutOfOrder(other.packet_type())),
        }
    }

    fn on_login_start(&mut self, username: String, client_uuid: Option<Uuid>) -> Verdict {
        if !self.config.valid_username(&username) {
            return self.fail(FailReason::InvalidUsername);
        }
        self.uuid = client_uuid.unwrap_or_else(|| offline_uuid(&username));
        self.username = username;

        if self.config.enable_compression && self.version.has_compression() {
            let threshold = self.config.compression_threshold;
            self.send(Phase::Login, PacketType::SetCompression, |buf, _| {
                packets::encode_set_compression(buf, threshold as i32);
            });
            self.codec.enable_compression(threshold);
        }
        let uuid = self.uuid;
        let username = self.username.clone();
        self.send(Phase::Login, PacketType::LoginSuccess, |buf, v| {
            packets::encode_login_success(buf, v, uuid, &username);
        });

        if self.version.has_config_phase() {
            self.state = State::AwaitLoginAck;
        } else {
            self.phase = Phase::Play;
            self.send_spawn_batch();
            self.state = State::AwaitKeepAlive;
        }
        debug!(peer = %self.peer, user = %self.username, version = %self.version, "login accepted");
        Verdict::Pending
    }

    fn on_login_ack(&mut self) -> Verdict {
        self.phase = Phase::Config;
        let registry = self
            .assets
            .for_version(self.version)
            .registry_data
            .clone()
            .unwrap_or_default();
        self.send_raw(Phase::Config, PacketType::RegistryData, &registry);
        self.send(Phase::Config, PacketType::FinishConfiguration, |_, _| {});
        self.state = State::AwaitConfigAck;
        Verdict::Pending
    }

    fn on_config_ack(&mut self) -> Verdict {
        self.phase = Phase::Play;
        self.send_spawn_batch();
        self.state = State::AwaitKeepAlive;
        Verdict::Pending
    }

    /// JoinGame, abilities, spawn teleport, the world, and the keep-alive
    /// challenge, all from precomputed images.
    fn send_spawn_batch(&mut self) {
        let spawn_y = self.assets.spawn_y();
        let assets = self.assets.clone();
        let va = assets.for_version(self.version);

        self.send_raw(Phase::Play, PacketType::JoinGame, &va.join_game);
        self.send(Phase::Play, PacketType::PlayerAbilities, |buf, _| {
            packets::encode_abilities(buf);
        });
        self.send(Phase::Play, PacketType::SyncPlayerPosition, |buf, v| {
            packets::encode_sync_position(buf, v, SPAWN_X, spawn_y, SPAWN_Z, TELEPORT_ID);
        });
        self.send_raw(Phase::Play, PacketType::ChunkData, &va.chunk);
        self.send_raw(Phase::Play, PacketType::SectionBlocks, &va.platform);
        let token = self.keep_alive_token;
        self.send(Phase::Play, PacketType::KeepAlive, |buf, v| {
            packets::encode_keep_alive(buf, v, token);
        });
    }

    // ------------------------------------------------------------------
    // Gravity and collision
    // ------------------------------------------------------------------

    fn on_position(&mut self, x: f64, y: f64, z: f64, on_ground: bool) -> Verdict {
        let motion = self.assets.motion();
        let tolerance = self.config.gravity_tolerance;

        // Tunneling below the platform surface is unreachable under real
        // physics in this world.
        if y < PLATFORM_TOP_Y - tolerance {
            return self.fail(FailReason::CollisionMissed);
        }

        // Landing: Y settled on the platform top. Only valid once the whole
        // gravity window has been checked: a client claiming on_ground at
        // spawn height has skipped the fall.
        let settled = on_ground
            || (!self.last_y.is_nan() && (y - self.last_y).abs() <= f64::EPSILON);
        if settled && (y - PLATFORM_TOP_Y).abs() <= tolerance {
            if self.tick < motion.max_movement_ticks() {
                return self.fail(FailReason::GravityViolation {
                    tick: self.tick,
                    reported: y,
                    expected: motion.expected_y(self.tick),
                });
            }
            self.collision_seen = true;
            self.state = State::Collided;
            return self.on_collided(x, y, z);
        }

        // Match this Y against the expected curve. Probing starts one tick
        // back so a duplicated update is absorbed like a missing one.
        let start = self.tick.saturating_sub(1);
        let mut matched = None;
        for probe in start..=self.tick + self.config.max_ignored_ticks {
            if (y - motion.expected_y(probe)).abs() <= tolerance {
                matched = Some(probe);
                break;
            }
        }
        match matched {
            Some(probe) => {
                let ignored = if probe < self.tick {
                    1 // duplicate of the previous tick
                } else {
                    probe - self.tick
                };
                self.ignored_ticks += ignored;
                if self.ignored_ticks > self.config.max_ignored_ticks {
                    return self.fail(FailReason::GravityViolation {
                        tick: probe,
                        reported: y,
                        expected: motion.expected_y(probe),
                    });
                }
                self.tick = self.tick.max(probe + 1);
                self.last_y = y;
                Verdict::Pending
            }
            None => self.fail(FailReason::GravityViolation {
                tick: self.tick,
                reported: y,
                expected: motion.expected_y(self.tick),
            }),
        }
    }

    fn on_collided(&mut self, x: f64, y: f64, z: f64) -> Verdict {
        if self.config.check_collision {
            let lo = (BLOCKS_PER_ROW / 2) as f64;
            let hi = (3 * BLOCKS_PER_ROW / 2) as f64;
            let on_platform = (lo..hi).contains(&x) && (lo..hi).contains(&z);
            let at_surface = (y - PLATFORM_TOP_Y).abs() <= self.config.gravity_tolerance;
            if !on_platform || !at_surface {
                return self.fail(FailReason::CollisionMissed);
            }
        } else if (y - PLATFORM_TOP_Y).abs() > self.config.gravity_tolerance {
            debug!(peer = %self.peer, y, "landing off the platform surface (check disabled)");
        }
        self.succeed()
    }

    fn succeed(&mut self) -> Verdict {
        self.state = State::Success;
        let payload = self
            .assets
            .for_version(self.version)
            .disconnect
            .get(&DisconnectReason::VerificationSuccess)
            .cloned()
            .unwrap_or_default();
        self.send_raw(Phase::Play, PacketType::Disconnect, &payload);
        debug!(
            peer = %self.peer,
            user = %self.username,
            settings = self.settings_seen,
            brand = self.brand_seen,
            collided = self.collision_seen,
            "verification passed"
        );
        Verdict::Success {
            username: self.username.clone(),
            uuid: self.uuid,
        }
    }

    fn fail(&mut self, reason: FailReason) -> Verdict {
        self.state = State::Failed;
        let payload = self
            .assets
            .for_version(self.version)
            .disconnect
            .get(&reason.disconnect_reason())
            .cloned()
            .unwrap_or_default();
        self.send_raw(self.phase, PacketType::Disconnect, &payload);
        debug!(peer = %self.peer, %reason, "verification failed");
        Verdict::Failed(reason)
    }

    fn validate_brand(&self, data: &[u8]) -> bool {
        // 1.8+ prefixes the brand with a string varint length; 1.7 is raw
        let brand = if self.version > ProtocolVersion::V1_7_6 && !data.is_empty() {
            &data[1.min(data.len())..]
        } else {
            data
        };
        self.config.valid_brand(brand)
    }

    // ------------------------------------------------------------------
    // Outbound helpers
    // ------------------------------------------------------------------

    fn send(
        &mut self,
        phase: Phase,
        packet_type: PacketType,
        write: impl FnOnce(&mut BytesMut, ProtocolVersion),
    ) {
        let mut payload = BytesMut::new();
        write(&mut payload, self.version);
        self.send_raw(phase, packet_type, &payload);
    }

    fn send_raw(&mut self, phase: Phase, packet_type: PacketType, payload: &[u8]) {
        let id = match Registry::global().id_of(phase, Direction::Clientbound, self.version, packet_type)
        {
            Some(id) => id,
            // Packet absent for this version (e.g. SetCompression on 1.7)
            None => return,
        };
        match self.codec.encode_packet(id, payload) {
            Ok(framed) => self.outbound.extend_from_slice(&framed),
            Err(e) => {
                // Outbound images are precomputed and under the ceiling;
                // hitting this means a corrupted asset build.
                debug!(peer = %self.peer, error = %e, "dropping oversized outbound packet");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn keep_alive_token(&self) -> i64 {
        self.keep_alive_token
    }
}
