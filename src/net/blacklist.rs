//! Blacklist — rolling bloom filter over IP addresses
//!
//! Probabilistic on purpose: a false positive turns one legitimate visitor
//! away for a few minutes, which is an acceptable cost of defense, and the
//! structure stays a few kilobytes under any attack volume. Expiry works by
//! generation rolling — two filter halves, the older one cleared whenever
//! the newer fills or its time slice lapses.

use crate::types::now;
use siphasher::sip::SipHasher24;
use std::hash::Hasher;
use std::net::IpAddr;

pub struct Blacklist {
    data: Vec<u64>,
    n_hash: u32,
    n_entries: u32,
    max_entries: u32,
    generation: u32,
    /// Epoch second the current generation started.
    generation_start: u64,
    /// A generation is cleared after this many seconds, so an entry lives
    /// at most two slices.
    slice_secs: u64,
    tweak: u64,
}

impl Blacklist {
    /// `ttl_secs` is the maximum lifetime of an entry; each generation
    /// covers half of it.
    pub fn new(max_entries: u32, fp_rate: f64, ttl_secs: u64) -> Self {
        let n_filter_bytes =
            (-1.0 / (2.0_f64.ln().powi(2)) * f64::from(max_entries) * fp_rate.ln()).ceil() as usize;
        let n_u64 = n_filter_bytes.max(1).div_ceil(8);

        let n_hash = (n_filter_bytes as f64 * 8.0 / f64::from(max_entries) * 2.0_f64.ln())
            .round() as u32;

        Self {
            data: vec![0; n_u64 * 2],
            n_hash: n_hash.clamp(1, 50),
            n_entries: 0,
            max_entries,
            generation: 1,
            generation_start: now(),
            slice_secs: (ttl_secs / 2).max(1),
            tweak: rand::random(),
        }
    }

    /// Defaults sized for sustained attack traffic: 10k entries, 1e-4 FP.
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self::new(10_000, 0.0001, ttl_secs)
    }

    pub fn add(&mut self, ip: &IpAddr) {
        self.maybe_roll();
        let key = ip_key(ip);
        let half = self.data.len() / 2;
        for i in 0..self.n_hash {
            let bit = self.hash(i, &key);
            let word = bit / 64;
            let mask = 1u64 << (bit % 64);
            if self.generation % 2 == 1 {
                self.data[word] |= mask;
            } else {
                self.data[half + word] |= mask;
            }
        }
        self.n_entries += 1;
    }

    pub fn contains(&mut self, ip: &IpAddr) -> bool {
        self.maybe_roll();
        let key = ip_key(ip);
        let half = self.data.len() / 2;
        for i in 0..self.n_hash {
            let bit = self.hash(i, &key);
            let word = bit / 64;
            let mask = 1u64 << (bit % 64);
            if self.data[word] & mask == 0 && self.data[half + word] & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Approximate live entry count, for observability.
    pub fn estimated_size(&self) -> u32 {
        self.n_entries
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
        self.n_entries = 0;
        self.generation = 1;
        self.generation_start = now();
        self.tweak = rand::random();
    }

    fn maybe_roll(&mut self) {
        let stale = now().saturating_sub(self.generation_start) >= self.slice_secs;
        if self.n_entries >= self.max_entries || stale {
            self.roll();
        }
    }

    fn roll(&mut self) {
        let half = self.data.len() / 2;
        if self.generation % 2 == 1 {
            self.data[half..].fill(0);
        } else {
            self.data[..half].fill(0);
        }
        self.generation += 1;
        self.generation_start = now();
        self.n_entries = 0;
    }

    fn hash(&self, n: u32, key: &[u8]) -> usize {
        let mut hasher =
            SipHasher24::new_with_keys(self.tweak, (u64::from(n) << 32) | u64::from(self.generation));
        hasher.write(key);
        (hasher.finish() as usize) % (self.data.len() / 2 * 64)
    }
}

fn ip_key(ip: &IpAddr) -> Vec<u8> {
    let mut key = Vec::with_capacity(17);
    match ip {
        IpAddr::V4(v4) => {
            key.push(4);
            key.extend_from_slice(&v4.octets());
        }
        IpAddr::V6(v6) => {
            key.push(6);
            key.extend_from_slice(&v6.octets());
        }
    }
    key
}
