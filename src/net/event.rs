//! Observability seam
//!
//! The gate and sessions report through this trait; the default sink just
//! logs. Host platforms plug their own implementation in for counters,
//! action bars, or webhooks.

use crate::limbo::FailReason;
use std::net::IpAddr;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub trait EventSink: Send + Sync {
    fn on_admit(&self, ip: IpAddr) {
        let _ = ip;
    }
    fn on_success(&self, ip: IpAddr, uuid: Uuid, username: &str) {
        let _ = (ip, uuid, username);
    }
    fn on_fail(&self, ip: IpAddr, reason: &FailReason) {
        let _ = (ip, reason);
    }
    fn on_blacklist(&self, ip: IpAddr) {
        let _ = ip;
    }
    fn on_attack_start(&self) {}
    fn on_attack_end(&self) {}
}

/// Logs every event through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_admit(&self, ip: IpAddr) {
        debug!(%ip, "verification started");
    }

    fn on_success(&self, ip: IpAddr, uuid: Uuid, username: &str) {
        info!(%ip, %uuid, username, "verification passed");
    }

    fn on_fail(&self, ip: IpAddr, reason: &FailReason) {
        debug!(%ip, %reason, "verification failed");
    }

    fn on_blacklist(&self, ip: IpAddr) {
        warn!(%ip, "address blacklisted");
    }

    fn on_attack_start(&self) {
        warn!("attack detected");
    }

    fn on_attack_end(&self) {
        info!("attack over");
    }
}

/// Drops everything. Used while attack mode suppresses per-connection logs.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {}
