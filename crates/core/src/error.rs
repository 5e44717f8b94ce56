//! Error taxonomy shared by the watcher and the supervisor

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by a watch session
#[derive(Debug, Error)]
pub enum Error {
    /// The filesystem observer could not be established
    #[error("watch unavailable for {path}: {reason}")]
    WatchUnavailable {
        /// Path that could not be watched
        path: PathBuf,
        /// Why the observer could not start
        reason: String,
    },

    /// A single conversion failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The observer did not terminate after stop and escalation
    #[error("observer {observer} did not terminate within {grace:?}")]
    CleanupTimeout {
        /// Observer identity (process name or backend name)
        observer: String,
        /// Grace period that elapsed
        grace: Duration,
    },

    /// Invalid configuration value or unreadable config file
    #[error("configuration error: {0}")]
    Config(String),

    /// The per-directory watch lease could not be read or written
    #[error("watch lease: {0}")]
    Lease(String),

    /// I/O failure outside of conversion
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a `WatchUnavailable` error
    pub fn unavailable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::WatchUnavailable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of one converter invocation
///
/// These are reported per burst and never end the session.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Lock file could not be read for fingerprinting
    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Converter program could not be started
    #[error("failed to start converter `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Converter exited unsuccessfully
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    /// Converter exceeded its time budget and was killed
    #[error("converter timed out after {0:?}")]
    TimedOut(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_names_path() {
        let err = Error::unavailable("/tmp/missing/bun.lock", "no such directory");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/missing/bun.lock"));
        assert!(msg.contains("no such directory"));
    }

    #[test]
    fn test_conversion_error_is_transparent() {
        let err: Error = ConversionError::TimedOut(Duration::from_secs(3)).into();
        assert_eq!(err.to_string(), "converter timed out after 3s");
    }
}
