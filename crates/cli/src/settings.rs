//! Command-line layer over the file and environment configuration

use anyhow::{Context, Result};
use lw_core::{Backend, UnavailablePolicy, WatchConfig};
use std::path::{Path, PathBuf};

/// Keys accepted by `lockwatch config get/set`
pub const CONFIG_KEYS: &[&str] = &[
    "watch.paths",
    "watch.debounce_ms",
    "watch.max_burst_ms",
    "watch.idle_timeout_secs",
    "watch.grace_ms",
    "watch.backend",
    "watch.on_unavailable",
    "converter.program",
    "converter.args",
    "converter.output",
    "converter.timeout_secs",
];

/// Flag values that take precedence over file and environment
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub idle_timeout_secs: Option<u64>,
    pub debounce_ms: Option<u64>,
    pub paths: Vec<PathBuf>,
    pub converter: Option<String>,
    pub backend: Option<Backend>,
    pub on_unavailable: Option<UnavailablePolicy>,
}

impl Overrides {
    /// Overlay onto `config` and re-validate
    pub fn apply(&self, config: &mut WatchConfig) -> Result<()> {
        if let Some(secs) = self.idle_timeout_secs {
            config.watch.idle_timeout_secs = secs;
        }
        if let Some(ms) = self.debounce_ms {
            config.watch.debounce_ms = ms;
        }
        if !self.paths.is_empty() {
            config.watch.paths = self.paths.clone();
        }
        if let Some(program) = &self.converter {
            config.converter.program = program.clone();
        }
        if let Some(backend) = self.backend {
            config.watch.backend = backend;
        }
        if let Some(policy) = self.on_unavailable {
            config.watch.on_unavailable = policy;
        }
        config.validate().context("Invalid command-line option")?;
        Ok(())
    }
}

/// Load the configuration for `workdir` with all layers applied
pub fn load(workdir: &Path, overrides: &Overrides) -> Result<WatchConfig> {
    let mut config = WatchConfig::load(workdir).context("Failed to load configuration")?;
    overrides.apply(&mut config)?;
    Ok(config)
}

/// Read one key as display text
pub fn get_key(config: &WatchConfig, key: &str) -> Result<String> {
    let value = match key {
        "watch.paths" => join_paths(&config.watch.paths),
        "watch.debounce_ms" => config.watch.debounce_ms.to_string(),
        "watch.max_burst_ms" => config.watch.max_burst_ms.to_string(),
        "watch.idle_timeout_secs" => config.watch.idle_timeout_secs.to_string(),
        "watch.grace_ms" => config.watch.grace_ms.to_string(),
        "watch.backend" => config.watch.backend.as_str().to_string(),
        "watch.on_unavailable" => config.watch.on_unavailable.as_str().to_string(),
        "converter.program" => config.converter.program.clone(),
        "converter.args" => config.converter.args.join(" "),
        "converter.output" => config.converter.output.clone(),
        "converter.timeout_secs" => config.converter.timeout_secs.to_string(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'lockwatch config list' to see available keys.",
            key
        ),
    };
    Ok(value)
}

/// Set one key from text and validate the result
///
/// `watch.paths` takes a `:`-separated list and `converter.args` a
/// whitespace-separated one.
pub fn set_key(config: &mut WatchConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "watch.paths" => {
            config.watch.paths = value
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        "watch.debounce_ms" => config.watch.debounce_ms = parse_u64(value)?,
        "watch.max_burst_ms" => config.watch.max_burst_ms = parse_u64(value)?,
        "watch.idle_timeout_secs" => config.watch.idle_timeout_secs = parse_u64(value)?,
        "watch.grace_ms" => config.watch.grace_ms = parse_u64(value)?,
        "watch.backend" => config.watch.backend = value.parse()?,
        "watch.on_unavailable" => config.watch.on_unavailable = value.parse()?,
        "converter.program" => config.converter.program = value.to_string(),
        "converter.args" => {
            config.converter.args = value.split_whitespace().map(str::to_string).collect();
        }
        "converter.output" => config.converter.output = value.to_string(),
        "converter.timeout_secs" => config.converter.timeout_secs = parse_u64(value)?,
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'lockwatch config list' to see available keys.",
            key
        ),
    }

    config.validate().context("Invalid configuration value")?;
    Ok(())
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .context("Invalid value: must be a non-negative integer")
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}
