//! Run a command under a watch session

use anyhow::{Context, Result};
use cli_lib::settings::{self, Overrides};
use lw_core::CommandConverter;
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use supervisor::{forward_os_signals, Registry, SessionOptions, WatchSession, WrappedCommand};
use tracing::info;

pub async fn run(workdir: &Path, overrides: &Overrides, no_lease: bool, argv: &[String]) -> Result<i32> {
    // 1. Resolve configuration
    let config = settings::load(workdir, overrides)?;
    let command = WrappedCommand::from_argv(argv).context("No command given after --")?;

    // 2. Build the session
    let converter = Arc::new(CommandConverter::from_config(&config.converter, workdir));
    let options = SessionOptions::from_settings(&config.watch, workdir);
    let registry = (!no_lease).then(Registry::default_location);
    let session = WatchSession::new(workdir, options, converter).with_registry(registry);

    // 3. Route SIGINT/SIGTERM to the session
    let signals = forward_os_signals(session.cancel_handle())
        .context("Failed to install signal handlers")?;

    // 4. Run to completion; the command's exit code is ours
    let result = session.run(command).await;
    signals.abort();

    match result {
        Ok(outcome) => {
            if let Some(cleanup) = &outcome.cleanup_error {
                eprintln!("{} {}", "lockwatch: warning:".yellow().bold(), cleanup);
            }
            info!(
                "Exiting with {} ({} conversion(s))",
                outcome.exit, outcome.report.conversions
            );
            Ok(outcome.exit_code())
        }
        Err(e) => {
            eprintln!("{} {}", "lockwatch:".red().bold(), e);
            Ok(e.exit_code())
        }
    }
}
