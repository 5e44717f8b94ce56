//! Conversion serialization
//!
//! At most one conversion runs per session. A "changed" signal that arrives
//! while one is in flight is queued as a re-run (one per path) rather than
//! started in parallel or dropped.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Serializes conversions for one session
#[derive(Debug, Default)]
pub struct ConversionTrigger {
    in_flight: Option<PathBuf>,
    queued: VecDeque<PathBuf>,
    closed: bool,
}

impl ConversionTrigger {
    /// Create an open trigger with nothing running
    pub fn new() -> Self {
        Self::default()
    }

    /// A burst for `path` completed
    ///
    /// Returns the path to convert now, or `None` if the signal was queued
    /// behind the in-flight conversion (or the trigger is closed).
    pub fn on_changed(&mut self, path: PathBuf) -> Option<PathBuf> {
        if self.closed {
            return None;
        }
        if self.in_flight.is_some() {
            if !self.queued.contains(&path) {
                self.queued.push_back(path);
            }
            return None;
        }
        self.in_flight = Some(path.clone());
        Some(path)
    }

    /// The in-flight conversion finished; returns the next path to convert
    pub fn on_finished(&mut self) -> Option<PathBuf> {
        self.in_flight = None;
        if self.closed {
            return None;
        }
        let next = self.queued.pop_front()?;
        self.in_flight = Some(next.clone());
        Some(next)
    }

    /// Refuse new signals and discard queued re-runs
    ///
    /// The in-flight conversion, if any, is left to finish. Returns the
    /// number of discarded re-runs.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let dropped = self.queued.len();
        self.queued.clear();
        dropped
    }

    /// Path currently being converted
    pub fn in_flight(&self) -> Option<&Path> {
        self.in_flight.as_deref()
    }

    /// Number of queued re-runs
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// True when nothing runs and nothing waits
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.queued.is_empty()
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_first_signal_starts_immediately() {
        let mut trigger = ConversionTrigger::new();
        assert!(trigger.is_idle());
        assert_eq!(trigger.on_changed(p("bun.lock")), Some(p("bun.lock")));
        assert_eq!(trigger.in_flight(), Some(Path::new("bun.lock")));
        assert!(!trigger.is_idle());
    }

    #[test]
    fn test_signals_during_flight_merge_into_one_rerun() {
        let mut trigger = ConversionTrigger::new();
        trigger.on_changed(p("bun.lock"));

        assert_eq!(trigger.on_changed(p("bun.lock")), None);
        assert_eq!(trigger.on_changed(p("bun.lock")), None);
        assert_eq!(trigger.queued(), 1);

        assert_eq!(trigger.on_finished(), Some(p("bun.lock")));
        assert_eq!(trigger.on_finished(), None);
        assert!(trigger.is_idle());
    }

    #[test]
    fn test_queue_preserves_order_across_paths() {
        let mut trigger = ConversionTrigger::new();
        trigger.on_changed(p("a.lock"));
        trigger.on_changed(p("b.lock"));
        trigger.on_changed(p("c.lock"));
        trigger.on_changed(p("b.lock"));

        assert_eq!(trigger.on_finished(), Some(p("b.lock")));
        assert_eq!(trigger.on_finished(), Some(p("c.lock")));
        assert_eq!(trigger.on_finished(), None);
    }

    #[test]
    fn test_close_drops_queue_but_keeps_in_flight() {
        let mut trigger = ConversionTrigger::new();
        trigger.on_changed(p("a.lock"));
        trigger.on_changed(p("b.lock"));

        assert_eq!(trigger.close(), 1);
        assert_eq!(trigger.in_flight(), Some(Path::new("a.lock")));
        assert_eq!(trigger.on_changed(p("c.lock")), None);

        assert_eq!(trigger.on_finished(), None);
        assert!(trigger.is_idle());
        assert!(trigger.is_closed());
    }
}
