//! In-process observer backed by the `notify` crate
//!
//! Uses the platform's recommended watcher (inotify, FSEvents, kqueue).
//! Events arrive on notify's own thread and are forwarded over an unbounded
//! channel, filtered to the configured targets.

use crate::source::{EventSource, TargetSet};
use async_trait::async_trait;
use lw_core::{ChangeEvent, Error, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Observer backed by `notify::RecommendedWatcher`
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    stopped: bool,
}

impl NotifySource {
    /// Register watches on the parent directories of `paths`
    pub fn start(paths: &[PathBuf]) -> Result<Self> {
        let targets = TargetSet::new(paths)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let filter = targets.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for path in changed_targets(&filter, &event) {
                        // Receiver gone means the session is stopping
                        let _ = tx.send(ChangeEvent::now(path));
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            }
        })
        .map_err(|e| Error::unavailable(first_path(paths), e))?;

        for dir in targets.dirs() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| Error::unavailable(&dir, e))?;
        }

        info!("Watching {} path(s) with native observer", targets.len());

        Ok(Self {
            watcher: Some(watcher),
            rx,
            stopped: false,
        })
    }
}

#[async_trait]
impl EventSource for NotifySource {
    async fn next_event(&mut self) -> Option<ChangeEvent> {
        if self.stopped {
            return None;
        }
        self.rx.recv().await
    }

    async fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        // Dropping the watcher joins notify's thread and drops the sender
        self.watcher.take();
        self.rx.close();
        debug!("Native observer stopped");
        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn describe(&self) -> &str {
        "native"
    }
}

/// Targets written by `event`
///
/// Only content-changing kinds count: creation, data modification, a rename
/// onto the target, or close-after-write. Metadata, access and removal are
/// ignored. A rescan request (queue overflow) marks every target changed.
fn changed_targets(targets: &TargetSet, event: &Event) -> Vec<PathBuf> {
    if event.need_rescan() {
        return targets.paths().map(|p| p.to_path_buf()).collect();
    }

    let relevant = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(mode)) => {
            matches!(mode, RenameMode::To | RenameMode::Both | RenameMode::Any)
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    };
    if !relevant {
        return Vec::new();
    }

    let mut hits: Vec<PathBuf> = Vec::new();
    for raw in &event.paths {
        if let Some(target) = targets.resolve(raw) {
            if !hits.iter().any(|h| h == target) {
                hits.push(target.to_path_buf());
            }
        }
    }
    hits
}

fn first_path(paths: &[PathBuf]) -> PathBuf {
    paths.first().cloned().unwrap_or_default()
}
