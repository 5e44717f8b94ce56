//! Lifetime supervision for lockwatch
//!
//! This crate provides:
//! - `WatchSession`: observer, command and pipeline lifetimes for one invocation
//! - `Registry`: per-directory watch leases across invocations
//! - Wrapped command launch with shell-convention exit codes
//! - Cancellation and OS signal forwarding

pub mod command;
pub mod registry;
pub mod session;
pub mod signals;
pub mod state;

// Re-exports
pub use command::{CommandExit, SpawnError, WrappedCommand, EXIT_INTERNAL};
pub use registry::{Acquired, LeaseHolder, LeaseStatus, Registry, WatchLease};
pub use session::{
    SessionError, SessionOptions, SessionOutcome, StopReason, Unwatched, WatchSession,
    EXIT_UNAVAILABLE,
};
pub use signals::{forward_os_signals, CancelHandle};
pub use state::{LifecycleState, StateHandle};
