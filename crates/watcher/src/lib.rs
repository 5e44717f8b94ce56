//! File system watching for lockwatch
//!
//! This crate provides:
//! - Event sources: in-process `notify` watches or an `inotifywait` child
//! - Per-path debouncing with an optional maximum burst duration
//! - Serialized, idempotent conversion of completed bursts

pub mod debounce;
pub mod native;
pub mod pipeline;
pub mod platform;
pub mod source;
pub mod trigger;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use debounce::Debouncer;
pub use native::NotifySource;
pub use pipeline::{Activity, Pipeline, PipelineReport};
pub use source::{EventSource, TargetSet};
pub use trigger::ConversionTrigger;

use lw_core::{Backend, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Start the observer for `backend`
///
/// Returns only once the observer is ready to report writes. `grace` bounds
/// each termination step of process-backed observers.
pub async fn start_source(
    backend: Backend,
    paths: &[PathBuf],
    grace: Duration,
) -> Result<Box<dyn EventSource>> {
    match backend {
        Backend::Native => {
            let _ = grace;
            Ok(Box::new(NotifySource::start(paths)?))
        }
        #[cfg(target_os = "linux")]
        Backend::Inotifywait => Ok(Box::new(
            platform::InotifywaitSource::start(paths, grace).await?,
        )),
        #[cfg(not(target_os = "linux"))]
        Backend::Inotifywait => Err(lw_core::Error::unavailable(
            paths.first().cloned().unwrap_or_default(),
            "inotifywait backend is only available on Linux",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_native_source_starts_and_stops() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = start_source(
            Backend::Native,
            &[temp_dir.path().join("bun.lock")],
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert!(!source.is_stopped());
        source.stop().await.unwrap();
        assert!(source.is_stopped());
        assert!(source.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let result = start_source(
            Backend::Native,
            &[temp_dir.path().join("gone").join("bun.lock")],
            Duration::from_secs(1),
        )
        .await;

        assert!(matches!(result, Err(lw_core::Error::WatchUnavailable { .. })));
    }
}
