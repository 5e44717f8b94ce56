//! Raw change notifications

use std::path::PathBuf;
use tokio::time::Instant;

/// A single write notification for a watched path
///
/// Ephemeral: produced by an event source, consumed by the debouncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Watched path that changed (as configured, not as reported by the OS)
    pub path: PathBuf,
    /// Monotonic arrival time
    pub at: Instant,
}

impl ChangeEvent {
    /// Create an event stamped with the current instant
    pub fn now(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            at: Instant::now(),
        }
    }

    /// Create an event with an explicit timestamp
    pub fn at(path: impl Into<PathBuf>, at: Instant) -> Self {
        Self {
            path: path.into(),
            at,
        }
    }
}
