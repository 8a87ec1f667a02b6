//! Verified-pair store
//!
//! The authoritative set of (IP, UUID) pairs that have passed verification.
//! Entries age out on a configured horizon and the map is LRU-bounded;
//! membership is the bypass predicate in the admission gate. Optional file
//! persistence uses the same size-capped bincode discipline as the rest of
//! the on-disk state.

use crate::types::now;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

/// Security limit for the persisted file: ~100k entries at ~60 bytes.
const MAX_STORE_FILE_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    uuids: HashSet<Uuid>,
    /// Username last seen for this IP, for operator queries.
    username: String,
    verified_at: u64,
    last_seen: u64,
}

/// Bounded, time-expiring (IP → set<UUID>) map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifiedStore {
    entries: HashMap<IpAddr, Entry>,
    max_entries: usize,
    ttl_secs: u64,
}

impl VerifiedStore {
    pub fn new(max_entries: usize, ttl_secs: u64) -> Self {
        Self {
            entries: HashMap::with_capacity(max_entries.min(1024)),
            max_entries,
            ttl_secs,
        }
    }

    /// Record a passed verification. Read-your-writes: a membership query
    /// on the same store after this call sees the pair.
    pub fn put(&mut self, ip: IpAddr, uuid: Uuid, username: &str) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&ip) {
            self.evict_oldest();
        }
        let ts = now();
        let entry = self.entries.entry(ip).or_insert_with(|| Entry {
            uuids: HashSet::new(),
            username: username.to_string(),
            verified_at: ts,
            last_seen: ts,
        });
        entry.uuids.insert(uuid);
        entry.username = username.to_string();
        entry.last_seen = ts;
    }

    /// Membership is the exact (IP, UUID) pair, not the IP alone.
    pub fn contains(&self, ip: &IpAddr, uuid: &Uuid) -> bool {
        match self.entries.get(ip) {
            Some(entry) => !self.expired(entry) && entry.uuids.contains(uuid),
            None => false,
        }
    }

    /// Whether any identity at this IP is verified.
    pub fn contains_ip(&self, ip: &IpAddr) -> bool {
        self.entries.get(ip).is_some_and(|e| !self.expired(e))
    }

    /// Refresh recency on a successful bypass.
    pub fn touch(&mut self, ip: &IpAddr) {
        if let Some(entry) = self.entries.get_mut(ip) {
            entry.last_seen = now();
        }
    }

    pub fn remove(&mut self, ip: &IpAddr) -> bool {
        self.entries.remove(ip).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IpAddr, Uuid)> + '_ {
        self.entries
            .iter()
            .flat_map(|(ip, e)| e.uuids.iter().map(move |uuid| (*ip, *uuid)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries past the horizon. Run from the maintenance tick.
    pub fn expire(&mut self) {
        let before = self.entries.len();
        let horizon = now().saturating_sub(self.ttl_secs);
        self.entries.retain(|_, e| e.last_seen >= horizon);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            debug!("Expired {} verified entries", dropped);
        }
    }

    fn expired(&self, entry: &Entry) -> bool {
        now().saturating_sub(entry.last_seen) > self.ttl_secs
    }

    fn evict_oldest(&mut self) {
        if let Some(ip) = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_seen)
            .map(|(ip, _)| *ip)
        {
            self.entries.remove(&ip);
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn load<P: AsRef<Path>>(path: P, max_entries: usize, ttl_secs: u64) -> Result<Self, std::io::Error> {
        let data = std::fs::read(&path)?;
        if data.len() as u64 > MAX_STORE_FILE_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("verified store file too large: {} bytes", data.len()),
            ));
        }
        let mut store: Self = bincode::deserialize(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        // The file's bounds are advisory; the live config wins
        store.max_entries = max_entries;
        store.ttl_secs = ttl_secs;
        store.expire();
        info!("Loaded {} verified entries", store.len());
        Ok(store)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let data = bincode::serialize(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, data)
    }
}
