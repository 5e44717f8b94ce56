//! `inotifywait` child-process observer
//!
//! Runs `inotifywait -m` on the parent directories of the watched files and
//! parses one `%w%f` line per event. The child is a resource: it is started
//! with `kill_on_drop`, stopped with SIGTERM then SIGKILL, and always reaped
//! before `stop` returns.

use crate::source::{EventSource, TargetSet};
use async_trait::async_trait;
use lw_core::{ChangeEvent, Error, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

/// Program name; also what process listings show
pub const INOTIFYWAIT: &str = "inotifywait";

/// How long to wait for the "Watches established." banner
const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Observer backed by an `inotifywait -m` child process
pub struct InotifywaitSource {
    child: Option<Child>,
    lines: Option<Lines<BufReader<ChildStdout>>>,
    targets: TargetSet,
    grace: Duration,
}

impl InotifywaitSource {
    /// Spawn `inotifywait` and wait until its watches are established
    ///
    /// `grace` bounds each termination step in `stop`.
    pub async fn start(paths: &[PathBuf], grace: Duration) -> Result<Self> {
        Self::start_program(INOTIFYWAIT, paths, grace).await
    }

    async fn start_program(program: &str, paths: &[PathBuf], grace: Duration) -> Result<Self> {
        let targets = TargetSet::new(paths)?;
        let first = paths.first().cloned().unwrap_or_default();

        let mut child = Command::new(program)
            .arg("-m")
            .args(["-e", "close_write", "-e", "moved_to", "-e", "create"])
            .args(["--format", "%w%f"])
            .args(targets.dirs())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::unavailable(&first, format!("{} not found on PATH", program)),
                _ => Error::unavailable(&first, format!("cannot spawn {}: {}", program, e)),
            })?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => return Err(Error::unavailable(&first, "observer pipes unavailable")),
        };

        // Writes racing the setup would be lost, so hold until the banner
        let mut stderr_lines = BufReader::new(stderr).lines();
        let ready = tokio::time::timeout(READY_TIMEOUT, async {
            let mut diagnostics = Vec::new();
            loop {
                match stderr_lines.next_line().await {
                    Ok(Some(line)) if line.contains("Watches established") => return Ok(()),
                    Ok(Some(line)) if line.contains("Setting up watches") => continue,
                    Ok(Some(line)) => diagnostics.push(line),
                    Ok(None) | Err(_) => return Err(diagnostics.join("; ")),
                }
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => {}
            Ok(Err(diagnostics)) => {
                reap(&mut child).await;
                let reason = if diagnostics.is_empty() {
                    format!("{} exited during setup", program)
                } else {
                    diagnostics
                };
                return Err(Error::unavailable(&first, reason));
            }
            Err(_) => {
                reap(&mut child).await;
                return Err(Error::unavailable(
                    &first,
                    format!("{} did not establish watches within {:?}", program, READY_TIMEOUT),
                ));
            }
        }

        // Keep draining stderr so the pipe never fills
        tokio::spawn(async move {
            while let Ok(Some(line)) = stderr_lines.next_line().await {
                debug!("{}: {}", INOTIFYWAIT, line);
            }
        });

        info!(
            "Watching {} path(s) with {} (pid {})",
            targets.len(),
            program,
            child.id().unwrap_or_default()
        );

        Ok(Self {
            child: Some(child),
            lines: Some(BufReader::new(stdout).lines()),
            targets,
            grace,
        })
    }

    /// Process id while running
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }
}

#[async_trait]
impl EventSource for InotifywaitSource {
    async fn next_event(&mut self) -> Option<ChangeEvent> {
        loop {
            let lines = self.lines.as_mut()?;
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(target) = self.targets.resolve(Path::new(line.trim_end())) {
                        return Some(ChangeEvent::now(target));
                    }
                }
                Ok(None) | Err(_) => {
                    warn!("{} exited unexpectedly", INOTIFYWAIT);
                    self.lines = None;
                    return None;
                }
            }
        }
    }

    async fn stop(&mut self) -> Result<()> {
        self.lines = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        if tokio::time::timeout(self.grace, child.wait()).await.is_ok() {
            debug!("{} terminated", INOTIFYWAIT);
            return Ok(());
        }

        warn!("{} ignored SIGTERM for {:?}, sending SIGKILL", INOTIFYWAIT, self.grace);
        let _ = child.start_kill();
        match tokio::time::timeout(self.grace, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(Error::CleanupTimeout {
                observer: INOTIFYWAIT.to_string(),
                grace: self.grace * 2,
            }),
        }
    }

    fn is_stopped(&self) -> bool {
        self.child.is_none()
    }

    fn describe(&self) -> &str {
        INOTIFYWAIT
    }
}

impl Drop for InotifywaitSource {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            warn!("{} dropped without stop; killing", INOTIFYWAIT);
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
    }
}

/// Kill and reap a child that failed during setup
async fn reap(child: &mut Child) {
    let _ = child.start_kill();
    let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
}
