//! Watch session lifecycle states

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Where a watch session is in its life
///
/// `Stopped` and `Failed` are terminal. The state describes the watch, not
/// the wrapped command, which may still be running after `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Starting,
    Active,
    Stopping,
    Stopped,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_move_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Active)
                | (Starting, Failed)
                | (Starting, Stopped)
                | (Active, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Starting => "starting",
            LifecycleState::Active => "active",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, read-mostly view of a session's state
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<LifecycleState>>,
}

impl StateHandle {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LifecycleState::Idle)),
        }
    }

    pub fn get(&self) -> LifecycleState {
        *self.inner.lock()
    }

    /// Move to `next`; illegal transitions are ignored and return false
    pub(crate) fn transition(&self, next: LifecycleState) -> bool {
        let mut state = self.inner.lock();
        if !state.can_move_to(next) {
            tracing::debug!("Ignoring transition {} -> {}", *state, next);
            return false;
        }
        info!("Watch session {} -> {}", *state, next);
        *state = next;
        true
    }
}
