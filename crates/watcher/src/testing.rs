//! In-process converter for tests
//!
//! Enabled for this crate's tests and, through the `test-support` feature,
//! for downstream crates.

use async_trait::async_trait;
use lw_core::{ConversionError, Converter};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Converter that records its calls and writes `<lock>.nix` itself
///
/// The derived file holds a header line followed by the lock contents.
#[derive(Debug, Default)]
pub struct RecordingConverter {
    calls: Mutex<Vec<PathBuf>>,
    delay: Duration,
    failures_left: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicUsize,
}

impl RecordingConverter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every conversion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first `n` conversions
    pub fn failing_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Paths passed to `convert`, in call order
    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Conversions that ran to the end, successful or not
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous conversions observed
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Converter for RecordingConverter {
    async fn convert(&self, lock: &Path) -> Result<PathBuf, ConversionError> {
        self.calls.lock().push(lock.to_path_buf());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = if self.take_failure() {
            Err(ConversionError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            })
        } else {
            write_derived(lock)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn write_derived(lock: &Path) -> Result<PathBuf, ConversionError> {
    let contents = std::fs::read_to_string(lock).map_err(|source| ConversionError::Unreadable {
        path: lock.to_path_buf(),
        source,
    })?;
    let output = lock.with_extension("nix");
    std::fs::write(&output, format!("# derived from {}\n{}", lock.display(), contents)).map_err(
        |source| ConversionError::Unreadable {
            path: output.clone(),
            source,
        },
    )?;
    Ok(output)
}
