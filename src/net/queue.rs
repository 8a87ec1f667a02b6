//! Admission queue — insertion-ordered, one slot per IP
//!
//! Producers never hold the structure across admission work: a handshake
//! either enqueues and returns, or is rejected. The 500 ms timer task pops
//! at most `max_queue_polls` ready entries per tick and performs the
//! deferred admissions outside the lock.

use std::collections::HashMap;
use std::net::IpAddr;

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Queued,
    /// The IP already had a pending slot; it was replaced.
    Replaced,
    Full,
}

#[derive(Debug)]
pub struct AdmissionQueue<T> {
    /// Insertion-ordered ring of waiting IPs. Stale duplicates are skipped
    /// at drain time via the generation check.
    order: std::collections::VecDeque<(IpAddr, u64)>,
    /// Pending payload and its live generation per IP.
    pending: HashMap<IpAddr, (T, u64)>,
    next_generation: u64,
    capacity: usize,
}

impl<T> AdmissionQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            order: std::collections::VecDeque::new(),
            pending: HashMap::new(),
            next_generation: 0,
            capacity,
        }
    }

    /// Add or replace the pending slot for `ip`. Last admit wins.
    pub fn enqueue(&mut self, ip: IpAddr, item: T) -> EnqueueResult {
        let replaced = self.pending.contains_key(&ip);
        if !replaced && self.pending.len() >= self.capacity {
            return EnqueueResult::Full;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending.insert(ip, (item, generation));
        self.order.push_back((ip, generation));
        if replaced {
            EnqueueResult::Replaced
        } else {
            EnqueueResult::Queued
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.pending.contains_key(ip)
    }

    /// Pop up to `max` entries in arrival order. A replaced entry drains at
    /// its replacement position, not the original one.
    pub fn drain(&mut self, max: usize) -> Vec<(IpAddr, T)> {
        let mut out = Vec::with_capacity(max.min(self.pending.len()));
        while out.len() < max {
            let (ip, generation) = match self.order.pop_front() {
                Some(entry) => entry,
                None => break,
            };
            // Skip ring entries that a replacement superseded
            let live = self.pending.get(&ip).map(|(_, g)| *g);
            if live == Some(generation) {
                if let Some((item, _)) = self.pending.remove(&ip) {
                    out.push((ip, item));
                }
            }
        }
        out
    }

    /// Remove and return every pending entry, for shutdown rejection.
    pub fn drain_all(&mut self) -> Vec<(IpAddr, T)> {
        let len = self.pending.len();
        self.drain(len)
    }

    pub fn remove(&mut self, ip: &IpAddr) -> Option<T> {
        self.pending.remove(ip).map(|(item, _)| item)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
