//! Configuration management command
//!
//! Provides CLI interface to view and edit the lockwatch configuration.

use anyhow::{Context, Result};
use cli_lib::settings;
use lw_core::config::{config_file_path, example_config};
use lw_core::WatchConfig;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

fn target_path(workdir: &Path) -> Result<PathBuf> {
    config_file_path(workdir).context("Could not determine config file path")
}

/// List all configuration values in effect for `workdir`
pub async fn run_list(workdir: &Path) -> Result<()> {
    let config = WatchConfig::load(workdir).context("Failed to load configuration")?;
    let config_path = target_path(workdir)?;

    println!("{}", "Configuration".bold());
    let note = if config_path.exists() { "" } else { " (not created, defaults)" };
    println!(
        "{}: {}{}\n",
        "Location".dimmed(),
        config_path.display().dimmed(),
        note.dimmed()
    );

    println!("{}", "[watch]".yellow());
    for key in settings::CONFIG_KEYS.iter().filter(|k| k.starts_with("watch.")) {
        print_entry(&config, key)?;
    }
    println!("\n{}", "[converter]".yellow());
    for key in settings::CONFIG_KEYS.iter().filter(|k| k.starts_with("converter.")) {
        print_entry(&config, key)?;
    }

    println!("\n{}", "Valid Ranges:".bold());
    println!("  debounce_ms: 10-60000");
    println!("  max_burst_ms: 0 (unbounded) or debounce_ms-600000");
    println!("  idle_timeout_secs: 1-86400");
    println!("  grace_ms: 100-60000");
    println!("  timeout_secs: 1-3600");
    println!(
        "\n{}",
        "Environment (WATCHER_TIMEOUT, WATCHER_PATHS, ...) overrides these values.".dimmed()
    );

    Ok(())
}

fn print_entry(config: &WatchConfig, key: &str) -> Result<()> {
    let value = settings::get_key(config, key)?;
    let name = key.split_once('.').map(|(_, name)| name).unwrap_or(key);
    let hint = match key {
        "watch.idle_timeout_secs" => format!("({}s)", value),
        "watch.max_burst_ms" if value == "0" => "(unbounded)".to_string(),
        "converter.output" if value.is_empty() => "(lock path with .nix)".to_string(),
        _ => String::new(),
    };
    println!("  {} = {} {}", name.cyan(), value, hint.dimmed());
    Ok(())
}

/// Get a single configuration value
pub async fn run_get(workdir: &Path, key: &str) -> Result<()> {
    let config = WatchConfig::load(workdir).context("Failed to load configuration")?;
    println!("{}", settings::get_key(&config, key)?);
    Ok(())
}

/// Set a configuration value in the config file
///
/// Only the file is read and written; environment overrides are not
/// persisted.
pub async fn run_set(workdir: &Path, key: &str, value: &str) -> Result<()> {
    let config_path = target_path(workdir)?;
    let mut config = if config_path.exists() {
        WatchConfig::from_file(&config_path)?
    } else {
        WatchConfig::default()
    };

    settings::set_key(&mut config, key, value)?;
    config
        .save(&config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    println!("{}", "Note: running sessions keep their settings".yellow());

    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(workdir: &Path, create: bool) -> Result<()> {
    let config_path = target_path(workdir)?;

    if create && !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        std::fs::write(&config_path, example_config())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("{} Created config file at: {}", "✓".green(), config_path.display());
    } else if config_path.exists() {
        println!("{}", config_path.display());
    } else {
        println!("{}", config_path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }

    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", example_config());
    Ok(())
}
