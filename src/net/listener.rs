//! TCP front door
//!
//! One task per accepted socket, one timer task for queue draining and
//! housekeeping. The connection task owns all socket I/O; protocol state
//! lives in the sans-IO [`Session`]. Whatever happens to the socket, the
//! admission slot is released exactly once, before the close completes.

use super::admission::{Admission, AdmissionGate, SessionOutcome};
use super::event::EventSink;
use crate::config::Config;
use crate::limbo::{Assets, FailReason, Session, Verdict};
use crate::protocol::frame::{DecodeResult, FrameCodec};
use crate::protocol::packets::{self, ServerPacket};
use crate::protocol::registry::Phase;
use crate::protocol::version::ProtocolVersion;
use crate::protocol::wire;
use crate::types::{now_millis, offline_uuid, DisconnectReason};
use bytes::{BufMut, BytesMut};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Queue drain cadence.
const DRAIN_INTERVAL: Duration = Duration::from_millis(500);

/// Housekeeping cadence (verified expiry, stale reconnect stamps).
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// How long a queued connection may wait for its slot.
const QUEUE_WAIT: Duration = Duration::from_secs(30);

pub struct Gateway {
    config: Arc<Config>,
    assets: Arc<Assets>,
    gate: Arc<AdmissionGate>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Bind the listener and start the accept and timer tasks.
    pub async fn bind(
        addr: SocketAddr,
        config: Arc<Config>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, std::io::Error> {
        let assets = Arc::new(Assets::prepare(&config));
        let gate = Arc::new(AdmissionGate::new(config.clone(), events));
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(accept_loop(
                listener,
                config.clone(),
                assets.clone(),
                gate.clone(),
                shutdown_rx.clone(),
            )),
            tokio::spawn(timer_loop(gate.clone(), shutdown_rx)),
        ];

        Ok(Self { config, assets, gate, local_addr, shutdown_tx, tasks })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn gate(&self) -> &Arc<AdmissionGate> {
        &self.gate
    }

    pub fn assets(&self) -> &Arc<Assets> {
        &self.assets
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    /// Stop accepting, reject the queue, cancel connection tasks.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        self.gate.drain_queue_for_shutdown().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        info!("Gateway stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<Config>,
    assets: Arc<Assets>,
    gate: Arc<AdmissionGate>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let config = config.clone();
                let assets = assets.clone();
                let gate = gate.clone();
                tokio::spawn(async move {
                    let ip = peer.ip();
                    gate.register_connection(ip).await;
                    if let Err(e) = handle_connection(stream, ip, config, assets, &gate).await {
                        debug!(%ip, "connection ended: {}", e);
                    }
                    gate.unregister_connection(ip).await;
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

async fn timer_loop(gate: Arc<AdmissionGate>, mut shutdown: watch::Receiver<bool>) {
    let mut drain = tokio::time::interval(DRAIN_INTERVAL);
    let mut maintenance = tokio::time::interval(MAINTENANCE_INTERVAL);
    loop {
        tokio::select! {
            _ = drain.tick() => gate.drain_queue().await,
            _ = maintenance.tick() => gate.maintain().await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

// =============================================================================
// PER-CONNECTION FLOW
// =============================================================================

async fn handle_connection(
    mut stream: TcpStream,
    ip: IpAddr,
    config: Arc<Config>,
    assets: Arc<Assets>,
    gate: &AdmissionGate,
) -> Result<(), std::io::Error> {
    let codec = FrameCodec::new(config.max_frame_size);
    let mut buffer = BytesMut::with_capacity(512);

    // Handshake first; its layout never changed, so any version decodes it.
    let handshake = read_packet(
        &mut stream,
        &codec,
        &mut buffer,
        Phase::Handshake,
        crate::protocol::MAX_SUPPORTED,
        &config,
    )
    .await?;
    let (protocol_id, next_state) = match handshake {
        Some(ServerPacket::Handshake { protocol, next_state, .. }) => (protocol, next_state),
        _ => return Ok(()),
    };

    if next_state == 1 {
        return serve_status(&mut stream, &codec, &mut buffer, protocol_id, &config).await;
    }
    if next_state != 2 {
        return Ok(());
    }

    // Lockdown and version support need nothing past the handshake, and an
    // unsupported version cannot even have its LoginStart decoded. The gate
    // re-checks both for embedders that call it directly.
    if config.lockdown {
        return send_login_disconnect(&mut stream, &codec, &config, DisconnectReason::Lockdown).await;
    }
    let decode_version = match ProtocolVersion::from_id(protocol_id) {
        Some(v) => v,
        None => {
            return send_login_disconnect(
                &mut stream,
                &codec,
                &config,
                DisconnectReason::InvalidProtocol,
            )
            .await;
        }
    };

    // LoginStart is version-sensitive, so decode with the negotiated layout.
    let login =
        read_packet(&mut stream, &codec, &mut buffer, Phase::Login, decode_version, &config)
            .await?;
    let (username, uuid) = match login {
        Some(ServerPacket::LoginStart { username, uuid }) => {
            let uuid = uuid.unwrap_or_else(|| offline_uuid(&username));
            (username, uuid)
        }
        _ => return Ok(()),
    };

    match gate.admit(ip, protocol_id, uuid).await {
        Admission::Bypass => {
            // Embedding deployments forward the connection to the backend
            // here; the standalone gateway confirms and lets go.
            send_login_disconnect(&mut stream, &codec, &config, DisconnectReason::VerificationSuccess)
                .await
        }
        Admission::Reject(reason) => {
            send_login_disconnect(&mut stream, &codec, &config, reason).await
        }
        Admission::Queued(permit) => match tokio::time::timeout(QUEUE_WAIT, permit).await {
            Ok(Ok(true)) => {
                run_session(stream, ip, config, assets, gate, decode_version, &username, uuid).await
            }
            Ok(Ok(false)) => {
                send_login_disconnect(&mut stream, &codec, &config, DisconnectReason::TooManyPlayers)
                    .await
            }
            // Sender dropped: a newer attempt from this IP replaced the slot
            Ok(Err(_)) => {
                send_login_disconnect(&mut stream, &codec, &config, DisconnectReason::AlreadyQueued)
                    .await
            }
            Err(_) => {
                send_login_disconnect(&mut stream, &codec, &config, DisconnectReason::TooManyPlayers)
                    .await
            }
        },
        Admission::Verify(version) => {
            run_session(stream, ip, config, assets, gate, version, &username, uuid).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_session(
    mut stream: TcpStream,
    ip: IpAddr,
    config: Arc<Config>,
    assets: Arc<Assets>,
    gate: &AdmissionGate,
    version: ProtocolVersion,
    username: &str,
    uuid: Uuid,
) -> Result<(), std::io::Error> {
    let mut session = Session::new(config.clone(), assets, ip, version);
    let outcome =
        drive_session(&mut stream, &mut session, &config, version, username, uuid).await;

    // Best-effort final flush (the disconnect packet), then release the
    // admission slot before the socket close.
    let out = session.take_outbound();
    if !out.is_empty() {
        let _ = stream.write_all(&out).await;
    }
    gate.release_session(ip, outcome).await;
    stream.shutdown().await.ok();
    Ok(())
}

/// Pump socket bytes through the session until a terminal verdict. Never
/// touches the gate; slot bookkeeping stays with the caller.
async fn drive_session(
    stream: &mut TcpStream,
    session: &mut Session,
    config: &Config,
    version: ProtocolVersion,
    username: &str,
    uuid: Uuid,
) -> SessionOutcome {
    // Replay a canonical LoginStart for what the gate already consumed:
    // no signature block, profile UUID present where the layout has one.
    let mut replay = BytesMut::new();
    wire::write_string(&mut replay, username);
    if version == ProtocolVersion::V1_19 || version == ProtocolVersion::V1_19_1 {
        replay.put_u8(0); // no signature data
    }
    if version >= ProtocolVersion::V1_19_1 && version < ProtocolVersion::V1_20_2 {
        replay.put_u8(1);
        replay.extend_from_slice(uuid.as_bytes());
    } else if version >= ProtocolVersion::V1_20_2 {
        replay.extend_from_slice(uuid.as_bytes());
    }
    let framed = match FrameCodec::new(config.max_frame_size).encode_packet(0x00, &replay) {
        Ok(f) => f,
        Err(_) => return SessionOutcome::Cancelled,
    };

    let mut verdict = session.receive(&framed);
    let mut read_buf = [0u8; 2048];
    loop {
        let out = session.take_outbound();
        if !out.is_empty() && stream.write_all(&out).await.is_err() {
            return SessionOutcome::Cancelled;
        }

        match verdict {
            Verdict::Pending => {}
            Verdict::Success { username, uuid } => {
                return SessionOutcome::Success { uuid, username };
            }
            Verdict::Failed(reason) => return SessionOutcome::Failed(reason),
        }

        if let Verdict::Failed(reason) = session.check_deadline(now_millis()) {
            return SessionOutcome::Failed(reason);
        }

        let read = tokio::time::timeout(
            Duration::from_millis(config.read_timeout_ms),
            stream.read(&mut read_buf),
        )
        .await;
        verdict = match read {
            Ok(Ok(0)) => return SessionOutcome::Cancelled,
            Ok(Ok(n)) => session.receive(&read_buf[..n]),
            Ok(Err(_)) => return SessionOutcome::Cancelled,
            Err(_) => return SessionOutcome::Failed(FailReason::Timeout),
        };
    }
}

/// Read and decode exactly one packet for `phase`, pre-compression.
async fn read_packet(
    stream: &mut TcpStream,
    codec: &FrameCodec,
    buffer: &mut BytesMut,
    phase: Phase,
    version: ProtocolVersion,
    config: &Config,
) -> Result<Option<ServerPacket>, std::io::Error> {
    let mut chunk = [0u8; 512];
    loop {
        match codec.decode(buffer) {
            Ok(DecodeResult::Frame(frame)) => {
                return match packets::decode_packet(phase, version, frame.packet_id, &frame.payload)
                {
                    Ok(p) => Ok(p),
                    Err(e) => {
                        debug!("pre-login decode failed: {}", e);
                        Ok(None)
                    }
                };
            }
            Ok(DecodeResult::NeedMore) => {}
            Err(e) => {
                debug!("pre-login framing failed: {}", e);
                return Ok(None);
            }
        }
        let n = tokio::time::timeout(
            Duration::from_millis(config.read_timeout_ms),
            stream.read(&mut chunk),
        )
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))??;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Login-phase disconnect: id 0x00 with a JSON component, identical across
/// every supported version, so it also serves protocol rejects.
async fn send_login_disconnect(
    stream: &mut TcpStream,
    codec: &FrameCodec,
    config: &Config,
    reason: DisconnectReason,
) -> Result<(), std::io::Error> {
    let component = serde_json::json!({ "text": config.message_for(reason.key()) }).to_string();
    let mut payload = BytesMut::new();
    packets::encode_disconnect(&mut payload, &component);
    let framed = codec
        .encode_packet(0x00, &payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&framed).await?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Minimal status response so server-list pings do not error while the
/// gateway fronts the backend.
async fn serve_status(
    stream: &mut TcpStream,
    codec: &FrameCodec,
    buffer: &mut BytesMut,
    protocol_id: i32,
    config: &Config,
) -> Result<(), std::io::Error> {
    let body = serde_json::json!({
        "version": { "name": "turnstile", "protocol": protocol_id },
        "players": { "max": 0, "online": 0 },
        "description": { "text": "" },
    })
    .to_string();
    let mut payload = BytesMut::new();
    wire::write_string(&mut payload, &body);
    let framed = codec
        .encode_packet(0x00, &payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&framed).await?;

    // Echo one ping; it may already sit buffered behind the request
    let mut chunk = [0u8; 64];
    for _ in 0..4 {
        if let Ok(DecodeResult::Frame(frame)) = codec.decode(buffer) {
            if frame.packet_id == 0x01 {
                let framed = codec
                    .encode_packet(0x01, &frame.payload)
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
                stream.write_all(&framed).await?;
                break;
            }
            continue; // the empty status request frame
        }
        match tokio::time::timeout(
            Duration::from_millis(config.read_timeout_ms),
            stream.read(&mut chunk),
        )
        .await
        {
            Ok(Ok(n)) if n > 0 => buffer.extend_from_slice(&chunk[..n]),
            _ => break,
        }
    }
    stream.shutdown().await.ok();
    Ok(())
}
