//! Per-path debouncing logic
//!
//! Collapses bursts of change events into one "changed" signal per path.
//! Each event pushes the path's quiescence deadline to `last + window`; when
//! the deadline passes with no further event the burst is complete. An
//! optional maximum burst duration caps the deadline at `first + max_burst`
//! so a file that never stops changing is still converted.
//!
//! The state machine takes instants as input and never reads a clock, so the
//! coordinator owns all timing and tests can inject synthetic timelines.

use lw_core::ChangeEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Accumulator for one path's in-progress burst
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingBurst {
    /// Arrival of the first event in the burst
    pub first: Instant,
    /// Arrival of the most recent event
    pub last: Instant,
    /// Events coalesced so far
    pub events: u32,
}

/// Per-path burst coalescer
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    max_burst: Option<Duration>,
    pending: HashMap<PathBuf, PendingBurst>,
}

impl Debouncer {
    /// Create a debouncer with a quiescence `window` and optional burst bound
    pub fn new(window: Duration, max_burst: Option<Duration>) -> Self {
        Self {
            window,
            max_burst,
            pending: HashMap::new(),
        }
    }

    /// Record an event, opening or extending the path's burst
    pub fn observe(&mut self, event: ChangeEvent) {
        let at = event.at;
        self.pending
            .entry(event.path)
            .and_modify(|burst| {
                // Timestamps come from different threads; never move backwards
                burst.last = burst.last.max(at);
                burst.events = burst.events.saturating_add(1);
            })
            .or_insert(PendingBurst {
                first: at,
                last: at,
                events: 1,
            });
    }

    /// When the earliest pending burst completes, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|b| self.deadline(b)).min()
    }

    /// Remove and return every path whose burst completed by `now`
    ///
    /// Paths are ordered by deadline, earliest first.
    pub fn drain_ready(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<(Instant, PathBuf)> = self
            .pending
            .iter()
            .map(|(path, burst)| (self.deadline(burst), path))
            .filter(|(deadline, _)| *deadline <= now)
            .map(|(deadline, path)| (deadline, path.clone()))
            .collect();
        ready.sort();

        for (_, path) in &ready {
            self.pending.remove(path);
        }
        ready.into_iter().map(|(_, path)| path).collect()
    }

    /// The path's in-progress burst, if any
    pub fn pending(&self, path: &Path) -> Option<&PendingBurst> {
        self.pending.get(path)
    }

    /// True when no burst is in progress
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard every in-progress burst, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn deadline(&self, burst: &PendingBurst) -> Instant {
        let quiet = burst.last + self.window;
        match self.max_burst {
            Some(max) => quiet.min(burst.first + max),
            None => quiet,
        }
    }
}
