//! Event source contract and target path filtering

use async_trait::async_trait;
use lw_core::{ChangeEvent, Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// A lazy, unbounded sequence of change notifications
///
/// `next_event` suspends until a watched path is written or the source is
/// stopped. After `stop` it returns `None` immediately, forever. `stop` is
/// idempotent and releases the underlying primitive (and reaps it, for
/// process-backed sources) before returning.
#[async_trait]
pub trait EventSource: Send {
    /// Next change, or `None` once the source is closed
    ///
    /// Cancel safe: dropping the future loses no event.
    async fn next_event(&mut self) -> Option<ChangeEvent>;

    /// Terminate the observer and release its resources
    ///
    /// Returns `Error::CleanupTimeout` if the observer could not be reaped.
    async fn stop(&mut self) -> Result<()>;

    /// Whether `stop` has run
    fn is_stopped(&self) -> bool;

    /// Observer identity for log lines (backend or process name)
    fn describe(&self) -> &str;
}

/// The set of watched files, indexed for matching raw OS paths
///
/// Parent directories are watched rather than the files themselves so that
/// replace-by-rename writes are seen and files that do not exist yet can be
/// watched.
#[derive(Debug, Clone)]
pub struct TargetSet {
    targets: Vec<Target>,
}

#[derive(Debug, Clone)]
struct Target {
    /// Path as configured; this is what events carry
    path: PathBuf,
    dir: PathBuf,
    canonical_dir: Option<PathBuf>,
    file_name: std::ffi::OsString,
}

impl TargetSet {
    /// Build the set, failing with `WatchUnavailable` when a parent
    /// directory is missing
    pub fn new(paths: &[PathBuf]) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::unavailable("", "no paths to watch"));
        }

        let mut targets = Vec::with_capacity(paths.len());
        for path in paths {
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::unavailable(path, "not a file path"))?
                .to_os_string();
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !dir.is_dir() {
                return Err(Error::unavailable(path, "parent directory does not exist"));
            }
            let canonical_dir = dir.canonicalize().ok();
            targets.push(Target {
                path: path.clone(),
                dir,
                canonical_dir,
                file_name,
            });
        }

        Ok(Self { targets })
    }

    /// Distinct directories to register with the OS
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.targets
            .iter()
            .map(|t| t.dir.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Configured paths, in configuration order
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.targets.iter().map(|t| t.path.as_path())
    }

    /// Configured path matching a raw OS path, if any
    pub fn resolve(&self, raw: &Path) -> Option<&Path> {
        let name = raw.file_name()?;
        let parent = raw.parent()?;
        self.targets
            .iter()
            .find(|t| {
                t.file_name.as_os_str() == name
                    && (parent == t.dir.as_path() || t.canonical_dir.as_deref() == Some(parent))
            })
            .map(|t| t.path.as_path())
    }

    /// Number of targets
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True when there are no targets
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
