//! One-shot commands: convert, status and config

use crate::common::TestProject;
use crate::lockwatch;
use anyhow::Result;
use std::fs;

#[test]
fn test_convert_writes_derived_file() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;
    let converter = project.converter().display().to_string();

    let result = lockwatch!(project, "convert", "--converter", &converter).assert_success()?;

    assert!(result.contains_stdout("bun.nix"));
    assert!(project.derived().contains("left-pad"));
    assert_eq!(project.conversions(), 1);
    Ok(())
}

#[test]
fn test_convert_failure_exits_nonzero() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = lockwatch!(project, "convert", "--converter", "false").assert_failure()?;

    assert_eq!(result.exit_code, 1);
    assert!(project.derived().is_empty());
    Ok(())
}

#[test]
fn test_convert_missing_lock_fails() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;
    let converter = project.converter().display().to_string();

    let result =
        lockwatch!(project, "convert", "--converter", &converter, "-w", "other.lock").assert_failure()?;

    assert!(result.contains_stderr("other.lock"));
    assert_eq!(project.conversions(), 0);
    Ok(())
}

#[test]
fn test_status_reports_idle() -> Result<()> {
    let project = TestProject::new("left-pad\n")?;

    let result = lockwatch!(project, "status", "--json").assert_success()?;
    let report: serde_json::Value = serde_json::from_str(&result.stdout)?;

    assert_eq!(report["state"], "idle");
    assert!(report["pid"].is_null());

    let text = lockwatch!(project, "status").assert_success()?;
    assert!(text.contains_stdout("Not running"));
    Ok(())
}

#[test]
fn test_config_set_then_get() -> Result<()> {
    let project = TestProject::new("")?;

    lockwatch!(project, "config", "set", "watch.debounce_ms", "250").assert_success()?;

    let result = lockwatch!(project, "config", "get", "watch.debounce_ms").assert_success()?;
    assert_eq!(result.stdout.trim(), "250");

    let saved = fs::read_to_string(project.home().join("lockwatch").join("config.toml"))?;
    assert!(saved.contains("debounce_ms = 250"));
    Ok(())
}

#[test]
fn test_config_set_rejects_out_of_range() -> Result<()> {
    let project = TestProject::new("")?;

    lockwatch!(project, "config", "set", "watch.debounce_ms", "1").assert_failure()?;
    lockwatch!(project, "config", "set", "watch.no_such_key", "1").assert_failure()?;

    assert!(!project.home().join("lockwatch").join("config.toml").exists());
    Ok(())
}

#[test]
fn test_project_config_file_takes_effect() -> Result<()> {
    let project = TestProject::new("")?;
    fs::write(
        project.root().join("lockwatch.toml"),
        "[watch]\nidle_timeout_secs = 600\n",
    )?;

    let result = lockwatch!(project, "config", "get", "watch.idle_timeout_secs").assert_success()?;
    assert_eq!(result.stdout.trim(), "600");

    let path = lockwatch!(project, "config", "path").assert_success()?;
    assert!(path.contains_stdout("lockwatch.toml"));
    Ok(())
}

#[test]
fn test_env_overrides_config() -> Result<()> {
    let project = TestProject::new("")?;

    let result = lockwatch!(project, "config", "get", "watch.idle_timeout_secs")
        .env("WATCHER_TIMEOUT", "42")
        .assert_success()?;

    assert_eq!(result.stdout.trim(), "42");
    Ok(())
}

#[test]
fn test_config_example_is_valid() -> Result<()> {
    let project = TestProject::new("")?;

    let result = lockwatch!(project, "config", "example").assert_success()?;
    assert!(result.contains_stdout("[watch]"));
    assert!(result.contains_stdout("[converter]"));

    fs::write(project.root().join("lockwatch.toml"), &result.stdout)?;
    lockwatch!(project, "config", "list").assert_success()?;
    Ok(())
}
