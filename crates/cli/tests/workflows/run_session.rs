//! `lockwatch run` end to end
//!
//! Each test wraps a small shell script, lets it edit `bun.lock`, and
//! checks what the converter saw once the binary has exited.

use crate::common::cli::LwCommand;
use crate::common::fixtures::{process_count, program_available};
use crate::common::TestProject;
use crate::lockwatch;
use anyhow::{Context, Result};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

/// `lockwatch run` with the fake converter, a short debounce and `extra` flags
fn watch_run(project: &TestProject, extra: &[&str], script: &str) -> LwCommand {
    let converter = project.converter().display().to_string();
    let mut cmd = lockwatch!(project, "run", "--converter", &converter, "--debounce-ms", "100");
    cmd.args(extra).args(&["--", "sh", "-c", script]);
    cmd
}

fn status_state(project: &TestProject) -> Result<String> {
    let result = lockwatch!(project, "status", "--json").assert_success()?;
    let report: serde_json::Value =
        serde_json::from_str(&result.stdout).context("status --json is not JSON")?;
    Ok(report["state"].as_str().unwrap_or_default().to_string())
}

/// Poll until `status` reports `state`
fn wait_for_state(project: &TestProject, state: &str, within: Duration) -> Result<()> {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if status_state(project)? == state {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    anyhow::bail!("status never became {}", state)
}

fn finish(mut child: Child) -> Result<i32> {
    let status = child.wait()?;
    Ok(status.code().unwrap_or(-1))
}

#[test]
fn test_lock_change_reaches_derived_file() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    watch_run(&project, &[], "sleep 0.3; printf 'cowsay\\n' >> bun.lock; sleep 0.3")
        .assert_success()?;

    let derived = project.derived();
    assert!(derived.starts_with("# derived"), "got: {:?}", derived);
    assert!(derived.contains("left-pad"));
    assert!(derived.contains("cowsay"));
    assert_eq!(project.conversions(), 1);
    Ok(())
}

#[test]
fn test_write_just_before_exit_is_converted() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    watch_run(&project, &[], "printf 'cowsay\\n' >> bun.lock").assert_success()?;

    assert!(project.derived().contains("cowsay"));
    Ok(())
}

#[test]
fn test_rapid_writes_convert_once() -> Result<()> {
    let project = TestProject::new("")?;

    watch_run(
        &project,
        &[],
        "for i in 1 2 3 4 5 6 7 8 9 10; do echo dep$i >> bun.lock; done; sleep 0.5",
    )
    .assert_success()?;

    assert_eq!(project.conversions(), 1);
    assert!(project.derived().contains("dep10"));
    Ok(())
}

#[test]
fn test_unchanged_lock_is_not_reconverted() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    watch_run(&project, &[], "echo cowsay >> bun.lock; sleep 0.3").assert_success()?;
    assert_eq!(project.conversions(), 1);

    // Rewrite identical bytes
    watch_run(&project, &[], "cp bun.lock saved && cp saved bun.lock; sleep 0.3")
        .assert_success()?;
    assert_eq!(project.conversions(), 1);
    Ok(())
}

#[test]
fn test_exit_code_passes_through() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = watch_run(&project, &[], "exit 7").execute()?;

    assert_eq!(result.exit_code, 7);
    Ok(())
}

#[test]
fn test_missing_command_exits_127() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = lockwatch!(project, "run", "--", "lockwatch-no-such-program").execute()?;

    assert_eq!(result.exit_code, 127);
    assert!(result.contains_stderr("lockwatch-no-such-program"));
    Ok(())
}

#[test]
fn test_unavailable_abort_exits_69_without_running() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = watch_run(
        &project,
        &["-w", "missing/bun.lock", "--on-unavailable", "abort"],
        "touch ran",
    )
    .execute()?;

    assert_eq!(result.exit_code, 69);
    assert!(!project.root().join("ran").exists());
    Ok(())
}

#[test]
fn test_unavailable_degrade_still_runs_command() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = watch_run(
        &project,
        &["-w", "missing/bun.lock", "--on-unavailable", "degrade"],
        "touch ran; exit 4",
    )
    .execute()?;

    assert_eq!(result.exit_code, 4);
    assert!(project.root().join("ran").exists());
    Ok(())
}

#[test]
fn test_idle_timeout_stops_watching() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = watch_run(
        &project,
        &["--timeout", "1"],
        "sleep 2; echo late >> bun.lock; sleep 0.3",
    )
    .assert_success()?;

    assert!(result.duration >= Duration::from_secs(2));
    assert_eq!(project.conversions(), 0);
    assert!(project.derived().is_empty());
    Ok(())
}

#[test]
fn test_env_timeout_is_honored() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    watch_run(&project, &[], "sleep 2; echo late >> bun.lock; sleep 0.3")
        .env("WATCHER_TIMEOUT", "1")
        .assert_success()?;

    assert_eq!(project.conversions(), 0);
    Ok(())
}

#[test]
fn test_inotifywait_backend_leaves_no_process() -> Result<()> {
    if !program_available("inotifywait") {
        eprintln!("skipping: inotifywait not installed");
        return Ok(());
    }
    let project = TestProject::new("left-pad\n")?;
    let before = process_count("inotifywait");

    watch_run(
        &project,
        &["--backend", "inotifywait"],
        "sleep 0.3; echo cowsay >> bun.lock; sleep 0.3",
    )
    .assert_success()?;

    assert!(project.derived().contains("cowsay"));
    assert!(process_count("inotifywait") <= before);
    Ok(())
}

#[test]
fn test_second_run_sees_held_lease() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let first = watch_run(&project, &[], "sleep 3").spawn()?;
    wait_for_state(&project, "watching", Duration::from_secs(5))?;

    let second = watch_run(&project, &[], "exit 3").execute()?;
    assert_eq!(second.exit_code, 3);
    assert!(second.contains_stderr("already watched"), "stderr: {}", second.stderr);

    assert_eq!(finish(first)?, 0);
    assert_eq!(status_state(&project)?, "idle");
    Ok(())
}

#[test]
fn test_sigterm_is_forwarded_to_command() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let child = watch_run(&project, &[], "sleep 10").spawn()?;
    wait_for_state(&project, "watching", Duration::from_secs(5))?;

    let started = Instant::now();
    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()?;
    assert!(killed.success());

    assert_eq!(finish(child)?, 143);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(status_state(&project)?, "idle");
    Ok(())
}
