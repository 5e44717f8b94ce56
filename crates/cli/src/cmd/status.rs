//! Show whether a watch session holds the working directory

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use supervisor::{LeaseStatus, Registry};

#[derive(Serialize)]
struct StatusReport {
    workdir: PathBuf,
    /// "watching", "idle" or "stale"
    state: &'static str,
    pid: Option<u32>,
    started_at: Option<u64>,
    lease: PathBuf,
}

pub async fn run(workdir: &Path, json: bool) -> Result<i32> {
    // 1. Probe the lease
    let registry = Registry::default_location();
    let status = registry
        .status(workdir)
        .context("Failed to read watch lease")?;

    let (state, holder) = match &status {
        LeaseStatus::Free => ("idle", None),
        LeaseStatus::Held(holder) => ("watching", Some(holder)),
        LeaseStatus::Stale(holder) => ("stale", holder.as_ref()),
    };
    let report = StatusReport {
        workdir: workdir.to_path_buf(),
        state,
        pid: holder.map(|h| h.pid),
        started_at: holder.map(|h| h.started_at),
        lease: registry.lease_path(workdir),
    };

    // 2. Display output
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize status")?
        );
        return Ok(0);
    }

    println!("Directory:  {}", workdir.display().to_string().cyan());
    print!("Watcher:    ");
    match status {
        LeaseStatus::Free => println!("{}", "Not running".yellow()),
        LeaseStatus::Held(holder) => {
            println!("{}", "Running ✓".green());
            println!("  PID:      {}", holder.pid);
            println!(
                "  Started:  {} ({})",
                util::format_relative_time(holder.started_at),
                util::format_absolute_time(holder.started_at).dimmed()
            );
        }
        LeaseStatus::Stale(holder) => {
            println!("{}", "Not running".yellow());
            if let Some(holder) = holder {
                println!(
                    "  {}",
                    format!("Stale lease from pid {}, reclaimed on next run", holder.pid).dimmed()
                );
            }
        }
    }

    Ok(0)
}
