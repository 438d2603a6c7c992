//! Trailing-edge debouncing of raw change notifications.
//!
//! Time is passed in by the caller so the logic stays deterministic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Collapses bursts of notifications per key into one emission.
///
/// A key becomes ready once no notification for it has been recorded for
/// `window`. Keys are emitted in the order they were first recorded.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<String, Pending>,
    next_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    last_seen: Instant,
    seq: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Record a raw notification for `key` observed at `now`.
    pub fn record(&mut self, key: &str, now: Instant) {
        if let Some(pending) = self.pending.get_mut(key) {
            pending.last_seen = pending.last_seen.max(now);
            return;
        }
        self.pending.insert(
            key.to_string(),
            Pending {
                last_seen: now,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
    }

    /// Remove and return keys that have been quiet for the whole window.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<String> {
        let mut ready: Vec<(u64, String)> = self
            .pending
            .iter()
            .filter(|(_, pending)| now.saturating_duration_since(pending.last_seen) >= self.window)
            .map(|(key, pending)| (pending.seq, key.clone()))
            .collect();
        ready.sort();
        for (_, key) in &ready {
            self.pending.remove(key);
        }
        ready.into_iter().map(|(_, key)| key).collect()
    }

    /// How long until the earliest pending key becomes ready.
    pub fn next_deadline(&self, now: Instant) -> Option<Duration> {
        self.pending
            .values()
            .map(|pending| (pending.last_seen + self.window).saturating_duration_since(now))
            .min()
    }
}
