//! Generation bookkeeping for stale-outcome rejection.

use std::collections::HashMap;

/// Session-wide generation counter plus the newest generation seen per exercise.
///
/// Outcomes are committed last-writer-wins by generation, never by arrival
/// order: an outcome below the newest generation for its exercise is stale.
#[derive(Debug, Default, Clone)]
pub struct GenerationTracker {
    counter: u64,
    latest: HashMap<String, u64>,
}

impl GenerationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new generation for `id`; every older outcome for `id` becomes stale.
    pub fn issue(&mut self, id: &str) -> u64 {
        self.counter += 1;
        self.latest.insert(id.to_string(), self.counter);
        self.counter
    }

    /// Make all outstanding outcomes for `id` stale without starting a check.
    pub fn invalidate(&mut self, id: &str) {
        self.issue(id);
    }

    /// Decide whether an outcome stamped `generation` may commit for `id`.
    ///
    /// Accepts generations at or above the newest one seen (and records it);
    /// rejects anything lower.
    pub fn accept(&mut self, id: &str, generation: u64) -> bool {
        match self.latest.get(id) {
            Some(latest) if generation < *latest => false,
            _ => {
                self.latest.insert(id.to_string(), generation);
                self.counter = self.counter.max(generation);
                true
            }
        }
    }
}
