//! Admission gate
//!
//! Runs the ordered checks from the handshake/login boundary and owns every
//! piece of shared mutable state: the verified store, the blacklist, the
//! pending queue, the per-IP verifying set and the failure counters. The
//! verifying-set check and session registration happen under one lock so
//! "exactly one active session per IP" holds against concurrent accepts.

use super::attack::AttackTracker;
use super::blacklist::Blacklist;
use super::event::EventSink;
use super::queue::{AdmissionQueue, EnqueueResult};
use super::verified::VerifiedStore;
use crate::config::Config;
use crate::limbo::FailReason;
use crate::protocol::version::ProtocolVersion;
use crate::types::{now_millis, DisconnectReason};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

/// Gate verdict for one inbound login attempt.
#[derive(Debug)]
pub enum Admission {
    /// Known-good (IP, UUID) pair: hand the connection to the backend
    /// without a verification session.
    Bypass,
    /// Start a verification session. The listener must call
    /// [`AdmissionGate::release_session`] on any terminal transition.
    Verify(ProtocolVersion),
    /// Capacity was full; the connection waits on the receiver. `true`
    /// means a drain tick granted the slot, `false` means shutdown.
    Queued(oneshot::Receiver<bool>),
    Reject(DisconnectReason),
}

/// How a verification session ended, for counter and blacklist updates.
#[derive(Debug)]
pub enum SessionOutcome {
    Success { uuid: Uuid, username: String },
    Failed(FailReason),
    Cancelled,
}

pub struct AdmissionGate {
    config: Arc<Config>,
    events: Arc<dyn EventSink>,

    verified: Mutex<VerifiedStore>,
    blacklist: Mutex<Blacklist>,
    queue: Mutex<AdmissionQueue<oneshot::Sender<bool>>>,
    attack: Mutex<AttackTracker>,

    /// IPs with a live verification session. Guarded insert-and-count with
    /// `active_sessions` under the same lock.
    verifying: Mutex<HashSet<IpAddr>>,
    active_sessions: AtomicUsize,

    /// Millisecond timestamp of the last join attempt per IP.
    last_attempt: Mutex<HashMap<IpAddr, u64>>,
    /// Consecutive verification failures per IP.
    failures: Mutex<HashMap<IpAddr, u32>>,
    /// Open sockets per IP, maintained by the listener.
    online: Mutex<HashMap<IpAddr, usize>>,
}

impl AdmissionGate {
    pub fn new(config: Arc<Config>, events: Arc<dyn EventSink>) -> Self {
        let verified = VerifiedStore::new(config.max_verified_entries, config.verified_ttl_secs);
        Self::with_store(config, events, verified)
    }

    /// Start from a persisted verified store.
    pub fn with_store(
        config: Arc<Config>,
        events: Arc<dyn EventSink>,
        verified: VerifiedStore,
    ) -> Self {
        Self {
            blacklist: Mutex::new(Blacklist::with_ttl(config.blacklist_ttl_secs)),
            queue: Mutex::new(AdmissionQueue::new(config.max_queue_size)),
            attack: Mutex::new(AttackTracker::new(config.min_players_for_attack)),
            verified: Mutex::new(verified),
            verifying: Mutex::new(HashSet::new()),
            active_sessions: AtomicUsize::new(0),
            last_attempt: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            online: Mutex::new(HashMap::new()),
            config,
            events,
        }
    }

    // ------------------------------------------------------------------
    // Socket accounting (called from the accept loop)
    // ------------------------------------------------------------------

    pub async fn register_connection(&self, ip: IpAddr) {
        *self.online.lock().await.entry(ip).or_insert(0) += 1;
    }

    pub async fn unregister_connection(&self, ip: IpAddr) {
        let mut online = self.online.lock().await;
        if let Some(count) = online.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                online.remove(&ip);
            }
        }
    }

    // ------------------------------------------------------------------
    // The gate
    // ------------------------------------------------------------------

    /// Run the ordered admission checks for a login attempt. First match
    /// wins; the order is part of the contract.
    pub async fn admit(&self, ip: IpAddr, protocol_id: i32, uuid: Uuid) -> Admission {
        // 1. Lockdown rejects everything; bypass permissions can only be
        //    evaluated by the host platform after full auth.
        if self.config.lockdown {
            return Admission::Reject(DisconnectReason::Lockdown);
        }

        // 2. Version support
        let version = match ProtocolVersion::from_id(protocol_id) {
            Some(v) => v,
            None => return Admission::Reject(DisconnectReason::InvalidProtocol),
        };

        // 3. Too many open sockets from this IP
        let online = self.online.lock().await.get(&ip).copied().unwrap_or(0);
        if online > self.config.max_online_per_ip {
            return Admission::Reject(DisconnectReason::AlreadyConnected);
        }

        // 4. Verified pair goes straight through
        {
            let mut verified = self.verified.lock().await;
            if verified.contains(&ip, &uuid) {
                verified.touch(&ip);
                return Admission::Bypass;
            }
        }

        // 5. Fast reconnect window
        let ts = now_millis();
        {
            let mut last = self.last_attempt.lock().await;
            let previous = last.insert(ip, ts);
            if let Some(previous) = previous {
                if ts.saturating_sub(previous) < self.config.reconnect_delay_ms {
                    return Admission::Reject(DisconnectReason::TooFastReconnect);
                }
            }
        }

        // 6. Blacklist, before any further work
        if self.blacklist.lock().await.contains(&ip) {
            return Admission::Reject(DisconnectReason::Blacklisted);
        }

        // Attack tracking counts every attempt that got this far
        if let Some(started) = self.attack.lock().await.record() {
            if started {
                self.events.on_attack_start();
            } else {
                self.events.on_attack_end();
            }
        }

        // 7 + 8 + 9 under the verifying lock: exactly-one-session-per-IP
        // must be linearizable with session construction.
        let mut verifying = self.verifying.lock().await;
        if verifying.contains(&ip) {
            return Admission::Reject(DisconnectReason::AlreadyVerifying);
        }
        if self.active_sessions.load(Ordering::SeqCst) >= self.config.max_verifying_players {
            let (tx, rx) = oneshot::channel();
            return match self.queue.lock().await.enqueue(ip, tx) {
                EnqueueResult::Queued => Admission::Queued(rx),
                EnqueueResult::Replaced => Admission::Queued(rx),
                EnqueueResult::Full => Admission::Reject(DisconnectReason::TooManyPlayers),
            };
        }
        verifying.insert(ip);
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        drop(verifying);

        if self.should_log().await {
            self.events.on_admit(ip);
        }
        Admission::Verify(version)
    }

    /// Claim a session slot for an IP promoted from the queue.
    async fn claim_queued_slot(&self, ip: IpAddr) -> bool {
        let mut verifying = self.verifying.lock().await;
        if verifying.contains(&ip) {
            return false;
        }
        if self.active_sessions.load(Ordering::SeqCst) >= self.config.max_verifying_players {
            return false;
        }
        verifying.insert(ip);
        self.active_sessions.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Release the slot and apply the outcome. Must run before the socket
    /// close completes so a reconnect cannot race the verifying marker.
    pub async fn release_session(&self, ip: IpAddr, outcome: SessionOutcome) {
        {
            let mut verifying = self.verifying.lock().await;
            if verifying.remove(&ip) {
                self.active_sessions.fetch_sub(1, Ordering::SeqCst);
            }
        }

        match outcome {
            SessionOutcome::Success { uuid, username } => {
                self.failures.lock().await.remove(&ip);
                self.verified.lock().await.put(ip, uuid, &username);
                self.events.on_success(ip, uuid, &username);
            }
            SessionOutcome::Failed(reason) => {
                let count = {
                    let mut failures = self.failures.lock().await;
                    let count = failures.entry(ip).or_insert(0);
                    *count += 1;
                    *count
                };
                let threshold = if self.attack_active().await {
                    self.config.blacklist_threshold_attack
                } else {
                    self.config.blacklist_threshold
                };
                if count >= threshold {
                    self.blacklist.lock().await.add(&ip);
                    self.failures.lock().await.remove(&ip);
                    self.events.on_blacklist(ip);
                }
                if self.should_log().await {
                    self.events.on_fail(ip, &reason);
                }
            }
            SessionOutcome::Cancelled => {}
        }
    }

    // ------------------------------------------------------------------
    // Timer duties
    // ------------------------------------------------------------------

    /// Promote up to `max_queue_polls` waiting connections. Runs on the
    /// 500 ms tick.
    pub async fn drain_queue(&self) {
        let batch = {
            let mut queue = self.queue.lock().await;
            queue.drain(self.config.max_queue_polls)
        };
        for (ip, permit_tx) in batch {
            if self.claim_queued_slot(ip).await {
                if permit_tx.send(true).is_err() {
                    // Receiver gave up waiting; free the slot again
                    self.release_session(ip, SessionOutcome::Cancelled).await;
                }
            } else {
                let _ = permit_tx.send(false);
            }
        }

        if let Some(false) = self.attack.lock().await.tick() {
            self.events.on_attack_end();
        }
    }

    /// Periodic housekeeping: expire verified entries and forget stale
    /// reconnect timestamps.
    pub async fn maintain(&self) {
        self.verified.lock().await.expire();
        let floor = now_millis().saturating_sub(self.config.reconnect_delay_ms * 4);
        self.last_attempt.lock().await.retain(|_, ts| *ts >= floor);
    }

    /// Reject every queued connection, for shutdown.
    pub async fn drain_queue_for_shutdown(&self) {
        let pending = self.queue.lock().await.drain_all();
        let count = pending.len();
        for (_, tx) in pending {
            let _ = tx.send(false);
        }
        if count > 0 {
            info!("Rejected {} queued connections on shutdown", count);
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub async fn attack_active(&self) -> bool {
        self.attack.lock().await.is_active()
    }

    /// Whether per-connection events should be emitted right now.
    pub async fn should_log(&self) -> bool {
        self.config.log_during_attack || !self.attack_active().await
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn blacklist_size(&self) -> u32 {
        self.blacklist.lock().await.estimated_size()
    }

    pub async fn verified_len(&self) -> usize {
        self.verified.lock().await.len()
    }

    /// Persist the verified store.
    pub async fn save_verified<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), std::io::Error> {
        self.verified.lock().await.save(path)
    }

    /// Record a verified pair directly, e.g. when the host platform has its
    /// own trust source.
    pub async fn insert_verified(&self, ip: IpAddr, uuid: Uuid, username: &str) {
        self.verified.lock().await.put(ip, uuid, username);
    }

    /// Manually blacklist an address.
    pub async fn insert_blacklist(&self, ip: IpAddr) {
        self.blacklist.lock().await.add(&ip);
        debug!(%ip, "manually blacklisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::event::NullSink;

    fn gate(config: Config) -> AdmissionGate {
        AdmissionGate::new(Arc::new(config), Arc::new(NullSink))
    }

    fn ip(last: u8) -> IpAddr {
        format!("10.0.0.{last}").parse().unwrap()
    }

    fn fail() -> SessionOutcome {
        SessionOutcome::Failed(FailReason::KeepAliveMismatch)
    }

    #[tokio::test]
    async fn test_invalid_protocol_rejected_first() {
        let g = gate(Config::default());
        for bad in [3, 9999] {
            assert!(matches!(
                g.admit(ip(1), bad, Uuid::nil()).await,
                Admission::Reject(DisconnectReason::InvalidProtocol)
            ));
        }
        // No session slot was consumed
        assert_eq!(g.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_exactly_one_session_per_ip() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        let g = gate(config);

        assert!(matches!(g.admit(ip(1), 47, Uuid::nil()).await, Admission::Verify(_)));
        assert!(matches!(
            g.admit(ip(1), 47, Uuid::nil()).await,
            Admission::Reject(DisconnectReason::AlreadyVerifying)
        ));

        g.release_session(ip(1), SessionOutcome::Cancelled).await;
        assert!(matches!(g.admit(ip(1), 47, Uuid::nil()).await, Admission::Verify(_)));
    }

    #[tokio::test]
    async fn test_fast_reconnect_window() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 8000;
        let g = gate(config);

        assert!(matches!(g.admit(ip(2), 47, Uuid::nil()).await, Admission::Verify(_)));
        g.release_session(ip(2), SessionOutcome::Cancelled).await;
        assert!(matches!(
            g.admit(ip(2), 47, Uuid::nil()).await,
            Admission::Reject(DisconnectReason::TooFastReconnect)
        ));
    }

    #[tokio::test]
    async fn test_verified_pair_bypasses() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        let g = gate(config);
        let uuid = Uuid::from_u128(9);

        g.insert_verified(ip(3), uuid, "Alice").await;
        assert!(matches!(g.admit(ip(3), 47, uuid).await, Admission::Bypass));
        // Different UUID from the same IP still verifies
        assert!(matches!(g.admit(ip(3), 47, Uuid::nil()).await, Admission::Verify(_)));
        assert_eq!(g.active_sessions(), 1);
    }

    #[tokio::test]
    async fn test_blacklist_promotion_after_threshold() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        config.blacklist_threshold = 3;
        let g = gate(config);

        for _ in 0..3 {
            assert!(matches!(g.admit(ip(4), 47, Uuid::nil()).await, Admission::Verify(_)));
            g.release_session(ip(4), fail()).await;
        }
        // Fourth connection is rejected before any session machinery
        assert!(matches!(
            g.admit(ip(4), 47, Uuid::nil()).await,
            Admission::Reject(DisconnectReason::Blacklisted)
        ));
        assert_eq!(g.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_queue_saturation_and_promotion() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        config.max_verifying_players = 2;
        let g = gate(config);

        assert!(matches!(g.admit(ip(5), 47, Uuid::nil()).await, Admission::Verify(_)));
        assert!(matches!(g.admit(ip(6), 47, Uuid::nil()).await, Admission::Verify(_)));

        let mut rx = match g.admit(ip(7), 47, Uuid::nil()).await {
            Admission::Queued(rx) => rx,
            other => panic!("expected queue, got {other:?}"),
        };
        assert_eq!(g.queue_len().await, 1);

        // Free a slot, then let the tick promote the waiter
        g.release_session(ip(5), SessionOutcome::Cancelled).await;
        g.drain_queue().await;
        assert!(matches!(rx.try_recv(), Ok(true)));
        assert_eq!(g.active_sessions(), 2);
    }

    #[tokio::test]
    async fn test_success_records_verified() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        let g = gate(config);
        let uuid = Uuid::from_u128(77);

        assert!(matches!(g.admit(ip(8), 47, uuid).await, Admission::Verify(_)));
        g.release_session(ip(8), SessionOutcome::Success { uuid, username: "Alice".into() })
            .await;

        assert!(matches!(g.admit(ip(8), 47, uuid).await, Admission::Bypass));
        assert_eq!(g.verified_len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queue() {
        let mut config = Config::default();
        config.reconnect_delay_ms = 0;
        config.max_verifying_players = 0;
        let g = gate(config);

        let mut rx = match g.admit(ip(9), 47, Uuid::nil()).await {
            Admission::Queued(rx) => rx,
            other => panic!("expected queue, got {other:?}"),
        };
        g.drain_queue_for_shutdown().await;
        assert!(matches!(rx.try_recv(), Ok(false)));
    }
}
