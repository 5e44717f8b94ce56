//! Lifetime supervisor for one wrapped-command invocation
//!
//! A session claims the working directory's lease, starts the observer,
//! launches the command, and pumps events into the conversion pipeline until
//! the first of: the command exits (and the pipeline settles), the idle
//! timeout passes without filesystem activity, cancellation, or the observer
//! dying. The observer is then stopped and reaped, the pipeline drained, and
//! the lease released, on every path out of `run`.

use crate::command::{CommandExit, RunningCommand, SpawnError, WrappedCommand, EXIT_INTERNAL};
use crate::registry::{Acquired, LeaseHolder, Registry};
use crate::signals::{self, CancelHandle};
use crate::state::{LifecycleState, StateHandle};
use lw_core::{Backend, Converter, UnavailablePolicy, WatchSettings};
use nix::sys::signal::Signal;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn};
use watcher::pipeline::{self, Pipeline, PipelineReport};
use watcher::{Debouncer, EventSource};

/// Exit code when watching is unavailable under the abort policy (`EX_UNAVAILABLE`)
pub const EXIT_UNAVAILABLE: i32 = 69;

/// Timing and policy for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Absolute paths of the watched lock files
    pub paths: Vec<PathBuf>,
    pub backend: Backend,
    pub debounce: Duration,
    pub max_burst: Option<Duration>,
    /// Observer lifetime without filesystem activity
    pub idle_timeout: Duration,
    /// Per-step bound on observer termination
    pub grace: Duration,
    pub on_unavailable: UnavailablePolicy,
}

impl SessionOptions {
    /// Options from configured settings, with paths resolved against `workdir`
    pub fn from_settings(settings: &WatchSettings, workdir: &Path) -> Self {
        Self {
            paths: settings.resolve_paths(workdir),
            backend: settings.backend,
            debounce: settings.debounce(),
            max_burst: settings.max_burst(),
            idle_timeout: settings.idle_timeout(),
            grace: settings.grace(),
            on_unavailable: settings.on_unavailable,
        }
    }
}

/// Why an active watch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The command exited and pending conversions settled
    CommandExited,
    /// No filesystem activity within the idle timeout
    IdleTimeout,
    Cancelled,
    /// The observer ended on its own
    ObserverClosed,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::CommandExited => "command exited",
            StopReason::IdleTimeout => "idle timeout",
            StopReason::Cancelled => "cancelled",
            StopReason::ObserverClosed => "observer closed",
        }
    }
}

/// Why the command ran without a watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unwatched {
    /// Another session watches this working directory
    LeaseHeld(Option<LeaseHolder>),
    /// The observer could not be established
    Unavailable(String),
}

/// Result of a completed session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// How the wrapped command ended
    pub exit: CommandExit,
    /// Set when the command ran under a watcher
    pub stop_reason: Option<StopReason>,
    /// Set when the command ran without one
    pub unwatched: Option<Unwatched>,
    pub report: PipelineReport,
    /// Observer cleanup failure, reported but never fatal
    pub cleanup_error: Option<String>,
}

impl SessionOutcome {
    fn unwatched(exit: CommandExit, why: Unwatched) -> Self {
        Self {
            exit,
            stop_reason: None,
            unwatched: Some(why),
            report: PipelineReport::default(),
            cleanup_error: None,
        }
    }

    /// Process exit code: always the command's own
    pub fn exit_code(&self) -> i32 {
        self.exit.code()
    }
}

/// Failures that prevent a command result
#[derive(Debug, Error)]
pub enum SessionError {
    /// Watching failed under the abort policy; the command was not run
    #[error(transparent)]
    Unavailable(lw_core::Error),

    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("failed waiting for command: {0}")]
    Wait(#[source] io::Error),
}

impl SessionError {
    pub fn exit_code(&self) -> i32 {
        match self {
            SessionError::Unavailable(_) => EXIT_UNAVAILABLE,
            SessionError::Spawn(e) => e.exit_code(),
            SessionError::Wait(_) => EXIT_INTERNAL,
        }
    }
}

/// One wrapped-command invocation and the watch around it
pub struct WatchSession {
    workdir: PathBuf,
    options: SessionOptions,
    converter: Arc<dyn Converter>,
    registry: Option<Registry>,
    state: StateHandle,
    cancel: CancelHandle,
}

struct WatchEnd {
    reason: StopReason,
    exit: Option<io::Result<CommandExit>>,
}

impl WatchSession {
    /// Create a session leasing `workdir` in the default registry
    pub fn new(workdir: impl Into<PathBuf>, options: SessionOptions, converter: Arc<dyn Converter>) -> Self {
        Self {
            workdir: workdir.into(),
            options,
            converter,
            registry: Some(Registry::default_location()),
            state: StateHandle::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Use `registry` for the per-directory lease; `None` skips leasing
    pub fn with_registry(mut self, registry: Option<Registry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    /// State view that outlives `run` taking the session
    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run `command` under the watch and return its result
    ///
    /// The observer is stopped and reaped before this returns, whatever the
    /// command does.
    pub async fn run(self, command: WrappedCommand) -> Result<SessionOutcome, SessionError> {
        let mut cancel_rx = self.cancel.subscribe();
        let command = command.current_dir(&self.workdir);

        // 1. Claim the working directory
        self.state.transition(LifecycleState::Starting);
        let lease = match self.registry.clone() {
            None => None,
            Some(registry) => match acquire_lease(registry, self.workdir.clone()).await {
                Ok(Acquired::Lease(lease)) => Some(lease),
                Ok(Acquired::HeldBy(holder)) => {
                    let pid = holder
                        .as_ref()
                        .map(|h| h.pid.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!(
                        "{} is already watched by pid {}; running without a watcher",
                        self.workdir.display(),
                        pid
                    );
                    self.state.transition(LifecycleState::Stopped);
                    let exit = run_unwatched(&command, &mut cancel_rx).await?;
                    return Ok(SessionOutcome::unwatched(exit, Unwatched::LeaseHeld(holder)));
                }
                Err(e) => {
                    warn!("Watch lease unavailable, continuing without it: {}", e);
                    None
                }
            },
        };

        // 2. Start the observer before the command so early writes are seen
        let started =
            watcher::start_source(self.options.backend, &self.options.paths, self.options.grace).await;
        let mut source = match started {
            Ok(source) => source,
            Err(e) => {
                self.state.transition(LifecycleState::Failed);
                drop(lease);
                return match self.options.on_unavailable {
                    UnavailablePolicy::Abort => {
                        error!("Watching unavailable: {}", e);
                        Err(SessionError::Unavailable(e))
                    }
                    UnavailablePolicy::Degrade => {
                        warn!("Watching unavailable, running command without a watcher: {}", e);
                        let exit = run_unwatched(&command, &mut cancel_rx).await?;
                        Ok(SessionOutcome::unwatched(exit, Unwatched::Unavailable(e.to_string())))
                    }
                };
            }
        };

        // 3. Launch the command
        let mut running = match command.spawn() {
            Ok(running) => running,
            Err(e) => {
                if let Err(stop_err) = source.stop().await {
                    error!("Observer cleanup failed: {}", stop_err);
                }
                self.state.transition(LifecycleState::Stopped);
                return Err(e.into());
            }
        };

        // 4. Watch until the command exits, idles out, or is cancelled
        let pipeline = Pipeline::spawn(
            Arc::clone(&self.converter),
            Debouncer::new(self.options.debounce, self.options.max_burst),
            pipeline::baseline(&self.options.paths),
        );
        self.state.transition(LifecycleState::Active);
        let end = self
            .watch(source.as_mut(), &pipeline, &mut running, &mut cancel_rx)
            .await;
        info!("Stopping {} observer: {}", source.describe(), end.reason.as_str());

        // 5. Stop and reap the observer, then drain the pipeline
        self.state.transition(LifecycleState::Stopping);
        let cleanup_error = match source.stop().await {
            Ok(()) => None,
            Err(e) => {
                error!("Observer cleanup failed, watcher may have leaked: {}", e);
                Some(e.to_string())
            }
        };
        let report = pipeline.shutdown().await;
        self.state.transition(LifecycleState::Stopped);
        if let Some(lease) = lease {
            if let Err(e) = lease.release() {
                warn!("Failed to release watch lease: {}", e);
            }
        }
        info!(
            "Session finished: {} conversion(s), {} unchanged, {} failed",
            report.conversions, report.unchanged, report.failures
        );

        // 6. The command's own result is authoritative
        let exit = match end.exit {
            Some(exit) => exit,
            None => {
                let forwarded = end.reason == StopReason::Cancelled;
                wait_command(&mut running, &mut cancel_rx, forwarded).await
            }
        }
        .map_err(SessionError::Wait)?;

        Ok(SessionOutcome {
            exit,
            stop_reason: Some(end.reason),
            unwatched: None,
            report,
            cleanup_error,
        })
    }

    async fn watch(
        &self,
        source: &mut dyn EventSource,
        pipeline: &Pipeline,
        running: &mut RunningCommand,
        cancel_rx: &mut watch::Receiver<Option<Signal>>,
    ) -> WatchEnd {
        let idle = self.options.idle_timeout;
        let mut idle_deadline = Instant::now() + idle;
        let mut submitted = 0u64;
        let mut exit: Option<io::Result<CommandExit>> = None;
        let mut settle_at: Option<Instant> = None;

        let reason = loop {
            tokio::select! {
                signal = signals::cancelled(cancel_rx) => {
                    info!("Cancelled, forwarding {} to command", signal);
                    running.signal(signal);
                    break StopReason::Cancelled;
                }
                result = running.wait(), if exit.is_none() => {
                    if let Ok(status) = &result {
                        info!("Command finished with {}", status);
                    }
                    exit = Some(result);
                    // Linger one window so a write made just before exit is seen
                    settle_at = Some(Instant::now() + self.options.debounce);
                }
                event = source.next_event() => match event {
                    Some(event) => {
                        idle_deadline = Instant::now() + idle;
                        if pipeline.submit(event) {
                            submitted += 1;
                        }
                    }
                    None => {
                        warn!("{} observer closed unexpectedly", source.describe());
                        break StopReason::ObserverClosed;
                    }
                },
                // Pending and in-flight conversions finish before the idle stop
                _ = settled(pipeline, submitted, Some(idle_deadline)) => {
                    if exit.is_none() {
                        info!("No filesystem activity for {:?}, command still running", idle);
                    }
                    break StopReason::IdleTimeout;
                }
                _ = settled(pipeline, submitted, settle_at), if settle_at.is_some() => {
                    break StopReason::CommandExited;
                }
            }
        };

        WatchEnd { reason, exit }
    }
}

/// Take the lease off the runtime; `try_acquire` may sleep between retries
async fn acquire_lease(registry: Registry, workdir: PathBuf) -> lw_core::Result<Acquired> {
    tokio::task::spawn_blocking(move || registry.try_acquire(&workdir))
        .await
        .map_err(|e| lw_core::Error::Lease(format!("lease task failed: {}", e)))?
}

/// Resolve once `settle_at` has passed and the pipeline has gone quiet
async fn settled(pipeline: &Pipeline, submitted: u64, settle_at: Option<Instant>) {
    if let Some(at) = settle_at {
        sleep_until(at).await;
    }
    pipeline.wait_quiet(submitted).await;
}

async fn run_unwatched(
    command: &WrappedCommand,
    cancel_rx: &mut watch::Receiver<Option<Signal>>,
) -> Result<CommandExit, SessionError> {
    let mut running = command.spawn()?;
    wait_command(&mut running, cancel_rx, false)
        .await
        .map_err(SessionError::Wait)
}

/// Wait for the command, forwarding every cancellation request
///
/// `forwarded` says the current request was already delivered.
async fn wait_command(
    running: &mut RunningCommand,
    cancel_rx: &mut watch::Receiver<Option<Signal>>,
    mut forwarded: bool,
) -> io::Result<CommandExit> {
    loop {
        tokio::select! {
            exit = running.wait() => return exit,
            signal = signals::next_request(cancel_rx, forwarded) => {
                running.signal(signal);
                forwarded = true;
            }
        }
    }
}
