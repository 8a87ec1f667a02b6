//! Attack detection — one-second admission rate over a sliding window

use crate::types::now_millis;
use std::collections::VecDeque;
use tracing::{info, warn};

/// Attack mode is left only after the rate stays below the trigger for this
/// long, so it does not flap at the threshold.
const COOLDOWN_MS: u64 = 10_000;

#[derive(Debug)]
pub struct AttackTracker {
    /// Millisecond timestamps of recent admissions, pruned to one second.
    window: VecDeque<u64>,
    trigger: usize,
    active: bool,
    /// Last instant the rate was at or above the trigger.
    last_over: u64,
    attacks_seen: u64,
}

impl AttackTracker {
    pub fn new(trigger: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(trigger * 2),
            trigger,
            active: false,
            last_over: 0,
            attacks_seen: 0,
        }
    }

    /// Record one admission attempt. Returns `Some(true)` on entering
    /// attack mode, `Some(false)` on leaving it, `None` when unchanged.
    pub fn record(&mut self) -> Option<bool> {
        self.record_at(now_millis())
    }

    fn record_at(&mut self, ts: u64) -> Option<bool> {
        self.window.push_back(ts);
        self.prune(ts);

        if self.window.len() > self.trigger {
            self.last_over = ts;
            if !self.active {
                self.active = true;
                self.attacks_seen += 1;
                warn!(
                    rate = self.window.len(),
                    trigger = self.trigger,
                    "attack mode engaged"
                );
                return Some(true);
            }
        } else if self.active && ts.saturating_sub(self.last_over) >= COOLDOWN_MS {
            self.active = false;
            info!("attack mode cleared");
            return Some(false);
        }
        None
    }

    /// Re-evaluate without an admission, so the mode clears on idle.
    pub fn tick(&mut self) -> Option<bool> {
        let ts = now_millis();
        self.prune(ts);
        if self.active
            && self.window.len() <= self.trigger
            && ts.saturating_sub(self.last_over) >= COOLDOWN_MS
        {
            self.active = false;
            info!("attack mode cleared");
            return Some(false);
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn attacks_seen(&self) -> u64 {
        self.attacks_seen
    }

    fn prune(&mut self, ts: u64) {
        let floor = ts.saturating_sub(1000);
        while self.window.front().is_some_and(|&t| t < floor) {
            self.window.pop_front();
        }
    }
}
