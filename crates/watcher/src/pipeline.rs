//! Debounce-and-convert pipeline
//!
//! A single coordinator task owns the debouncer, the conversion trigger and
//! the fingerprint table. Events reach it over a channel; timer expiry and
//! conversion completion are branches of the same `select!`, so the
//! event/timer race never needs a lock.

use crate::debounce::Debouncer;
use crate::trigger::ConversionTrigger;
use lw_core::fingerprint::{fingerprint_file, fingerprint_if_present};
use lw_core::{ChangeEvent, ConversionError, Converter, Fingerprint};
use std::collections::HashMap;
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Progress snapshot published after every coordinator step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    /// Events the coordinator has taken off its channel
    pub received: u64,
    /// A burst is pending or a conversion is running or queued
    pub busy: bool,
}

/// Totals for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Raw events received
    pub events: u64,
    /// Completed bursts
    pub bursts: u64,
    /// Successful converter runs
    pub conversions: u64,
    /// Bursts skipped because content matched the last conversion
    pub unchanged: u64,
    /// Failed conversions
    pub failures: u64,
    /// Bursts and re-runs dropped at shutdown
    pub discarded: u64,
}

enum Message {
    Event(ChangeEvent),
    Close,
}

enum Outcome {
    Converted {
        path: PathBuf,
        derived: PathBuf,
        fingerprint: Fingerprint,
    },
    Unchanged {
        path: PathBuf,
    },
    Failed {
        path: PathBuf,
        error: ConversionError,
    },
}

/// Handle to a running coordinator task
pub struct Pipeline {
    tx: mpsc::UnboundedSender<Message>,
    activity: watch::Receiver<Activity>,
    task: JoinHandle<PipelineReport>,
}

impl Pipeline {
    /// Spawn the coordinator
    ///
    /// `baseline` holds the fingerprints of the watched files as the session
    /// starts; bursts that leave a file at its baseline content do not reach
    /// the converter.
    pub fn spawn(
        converter: Arc<dyn Converter>,
        debouncer: Debouncer,
        baseline: HashMap<PathBuf, Fingerprint>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (activity_tx, activity) = watch::channel(Activity::default());

        let coordinator = Coordinator {
            converter,
            debouncer,
            trigger: ConversionTrigger::new(),
            fingerprints: baseline,
            activity: activity_tx,
            report: PipelineReport::default(),
        };
        let task = tokio::spawn(coordinator.run(rx));

        Self { tx, activity, task }
    }

    /// Hand an event to the coordinator; false once it has shut down
    pub fn submit(&self, event: ChangeEvent) -> bool {
        self.tx.send(Message::Event(event)).is_ok()
    }

    /// Subscribe to progress snapshots
    pub fn activity(&self) -> watch::Receiver<Activity> {
        self.activity.clone()
    }

    /// Resolve once `submitted` events have been received and nothing is
    /// pending, running or queued
    pub async fn wait_quiet(&self, submitted: u64) {
        let mut activity = self.activity.clone();
        // Err means the coordinator is gone, which is as quiet as it gets
        let _ = activity
            .wait_for(|a| a.received >= submitted && !a.busy)
            .await;
    }

    /// Stop accepting work and wait for the in-flight conversion to drain
    ///
    /// Pending bursts and queued re-runs are discarded.
    pub async fn shutdown(self) -> PipelineReport {
        let _ = self.tx.send(Message::Close);
        match self.task.await {
            Ok(report) => report,
            Err(e) => {
                error!("Conversion pipeline task failed: {}", e);
                PipelineReport::default()
            }
        }
    }
}

/// Fingerprints of whichever `paths` currently exist
pub fn baseline(paths: &[PathBuf]) -> HashMap<PathBuf, Fingerprint> {
    paths
        .iter()
        .filter_map(|p| fingerprint_if_present(p).map(|fp| (p.clone(), fp)))
        .collect()
}

struct Coordinator {
    converter: Arc<dyn Converter>,
    debouncer: Debouncer,
    trigger: ConversionTrigger,
    fingerprints: HashMap<PathBuf, Fingerprint>,
    activity: watch::Sender<Activity>,
    report: PipelineReport,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) -> PipelineReport {
        let mut in_flight: Option<JoinHandle<Outcome>> = None;
        let mut closing = false;

        loop {
            let deadline = self.debouncer.next_deadline();

            tokio::select! {
                msg = rx.recv(), if !closing => match msg {
                    Some(Message::Event(event)) => {
                        self.report.events += 1;
                        debug!("Change event for {}", event.path.display());
                        self.debouncer.observe(event);
                    }
                    Some(Message::Close) | None => {
                        closing = true;
                        let dropped = self.debouncer.clear() + self.trigger.close();
                        self.report.discarded += dropped as u64;
                        if dropped > 0 {
                            debug!("Discarded {} pending conversion(s) at shutdown", dropped);
                        }
                    }
                },
                _ = sleep_until_opt(deadline), if deadline.is_some() && !closing => {
                    for path in self.debouncer.drain_ready(Instant::now()) {
                        self.report.bursts += 1;
                        if let Some(path) = self.trigger.on_changed(path) {
                            in_flight = Some(self.start(path));
                        }
                    }
                }
                joined = join_opt(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    self.finish(joined);
                    if let Some(next) = self.trigger.on_finished() {
                        in_flight = Some(self.start(next));
                    }
                }
            }

            if closing && in_flight.is_none() {
                break;
            }
            self.publish();
        }

        self.publish();
        self.report
    }

    fn start(&self, path: PathBuf) -> JoinHandle<Outcome> {
        let converter = Arc::clone(&self.converter);
        let previous = self.fingerprints.get(&path).copied();
        tokio::spawn(convert_once(converter, path, previous))
    }

    fn finish(&mut self, joined: Result<Outcome, JoinError>) {
        match joined {
            Ok(Outcome::Converted {
                path,
                derived,
                fingerprint,
            }) => {
                info!(
                    "Converted {} -> {} ({})",
                    path.display(),
                    derived.display(),
                    fingerprint.short()
                );
                self.fingerprints.insert(path, fingerprint);
                self.report.conversions += 1;
            }
            Ok(Outcome::Unchanged { path }) => {
                debug!("{} unchanged since last conversion, skipping", path.display());
                self.report.unchanged += 1;
            }
            Ok(Outcome::Failed { path, error }) => {
                warn!("Conversion of {} failed: {}", path.display(), error);
                self.report.failures += 1;
            }
            Err(e) => {
                error!("Conversion task aborted: {}", e);
                self.report.failures += 1;
            }
        }
    }

    fn publish(&self) {
        let busy = !self.debouncer.is_idle() || !self.trigger.is_idle();
        self.activity.send_replace(Activity {
            received: self.report.events,
            busy,
        });
    }
}

/// One converter run, skipped when content matches `previous`
async fn convert_once(
    converter: Arc<dyn Converter>,
    path: PathBuf,
    previous: Option<Fingerprint>,
) -> Outcome {
    // Lock files are small; hash inline rather than on the blocking pool
    let fingerprint = match fingerprint_file(&path) {
        Ok(fp) => fp,
        Err(source) => {
            return Outcome::Failed {
                error: ConversionError::Unreadable {
                    path: path.clone(),
                    source,
                },
                path,
            }
        }
    };

    if previous == Some(fingerprint) {
        return Outcome::Unchanged { path };
    }

    debug!("Running {} on {}", converter.name(), path.display());
    match converter.convert(&path).await {
        Ok(derived) => Outcome::Converted {
            path,
            derived,
            fingerprint,
        },
        Err(error) => Outcome::Failed { path, error },
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join_opt(task: &mut Option<JoinHandle<Outcome>>) -> Result<Outcome, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => pending().await,
    }
}
