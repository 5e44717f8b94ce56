//! Session configuration
//!
//! Settings are layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. Config file (`lockwatch.toml` in the working directory, else the user
//!    config file under `$XDG_CONFIG_HOME/lockwatch/config.toml`)
//! 3. Environment (`WATCHER_TIMEOUT`, `WATCHER_PATHS`, ...)
//! 4. Command-line flags (applied by the CLI)

use crate::error::Error;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Name of the project-local config file
pub const PROJECT_CONFIG_FILE: &str = "lockwatch.toml";

/// Lock file watched when nothing else is configured
pub const DEFAULT_LOCK_FILE: &str = "bun.lock";

/// Idle timeout in seconds (`WATCHER_TIMEOUT`)
pub const ENV_TIMEOUT: &str = "WATCHER_TIMEOUT";
/// Watched paths, `:`-separated (`WATCHER_PATHS`)
pub const ENV_PATHS: &str = "WATCHER_PATHS";
/// Quiescence window in milliseconds
pub const ENV_DEBOUNCE_MS: &str = "WATCHER_DEBOUNCE_MS";
/// Observer backend (`native` or `inotifywait`)
pub const ENV_BACKEND: &str = "WATCHER_BACKEND";
/// Policy when the observer cannot start (`degrade` or `abort`)
pub const ENV_ON_UNAVAILABLE: &str = "WATCHER_ON_UNAVAILABLE";
/// Converter program
pub const ENV_CONVERTER: &str = "WATCHER_CONVERTER";

/// Full configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WatchConfig {
    /// Watch session settings
    pub watch: WatchSettings,
    /// External converter settings
    pub converter: ConverterConfig,
}

/// Watch session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    /// Lock files to watch, relative to the working directory
    pub paths: Vec<PathBuf>,
    /// Quiescence window
    pub debounce_ms: u64,
    /// Upper bound on one burst; 0 disables the bound
    pub max_burst_ms: u64,
    /// Observer lifetime without filesystem activity
    pub idle_timeout_secs: u64,
    /// Time allowed for the observer to exit after stop, per escalation step
    pub grace_ms: u64,
    /// Observer implementation
    pub backend: Backend,
    /// What to do when the observer cannot be established
    pub on_unavailable: UnavailablePolicy,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from(DEFAULT_LOCK_FILE)],
            debounce_ms: 300,
            max_burst_ms: 5_000,
            idle_timeout_secs: 60,
            grace_ms: 2_000,
            backend: Backend::Native,
            on_unavailable: UnavailablePolicy::Degrade,
        }
    }
}

/// External converter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Program to run
    pub program: String,
    /// Arguments; `{lock}` and `{output}` are substituted
    pub args: Vec<String>,
    /// Derived file path; empty means the lock path with extension `nix`
    pub output: String,
    /// Maximum converter run time
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "bun2nix".to_string(),
            args: vec![
                "-l".to_string(),
                "{lock}".to_string(),
                "-o".to_string(),
                "{output}".to_string(),
            ],
            output: String::new(),
            timeout_secs: 120,
        }
    }
}

/// Observer implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process watcher from the `notify` crate
    Native,
    /// External `inotifywait -m` child process (Linux)
    Inotifywait,
}

impl Backend {
    /// Config/env spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Inotifywait => "inotifywait",
        }
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "notify" => Ok(Self::Native),
            "inotifywait" => Ok(Self::Inotifywait),
            other => Err(Error::Config(format!(
                "unknown backend '{}' (expected native or inotifywait)",
                other
            ))),
        }
    }
}

/// Policy when the observer cannot start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnavailablePolicy {
    /// Warn and run the wrapped command without watching
    Degrade,
    /// Refuse to run the wrapped command
    Abort,
}

impl UnavailablePolicy {
    /// Config/env spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Degrade => "degrade",
            Self::Abort => "abort",
        }
    }
}

impl FromStr for UnavailablePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(Self::Degrade),
            "abort" => Ok(Self::Abort),
            other => Err(Error::Config(format!(
                "unknown unavailable policy '{}' (expected degrade or abort)",
                other
            ))),
        }
    }
}

impl WatchSettings {
    /// Quiescence window
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Burst bound, if enabled
    pub fn max_burst(&self) -> Option<Duration> {
        (self.max_burst_ms > 0).then(|| Duration::from_millis(self.max_burst_ms))
    }

    /// Idle timeout
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Grace period per termination step
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    /// Watched paths made absolute against `workdir`
    pub fn resolve_paths(&self, workdir: &Path) -> Vec<PathBuf> {
        self.paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { workdir.join(p) })
            .collect()
    }
}

impl ConverterConfig {
    /// Converter time budget
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WatchConfig {
    /// Load configuration for `workdir`: defaults, then file, then process env
    pub fn load(workdir: &Path) -> Result<Self> {
        let mut config = match config_file_path(workdir) {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid {}: {}", path.display(), e)))
    }

    /// Write this config as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("cannot serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Overlay environment settings
    ///
    /// `lookup` abstracts the environment so tests need not mutate the
    /// process environment. Empty values are treated as unset.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get(ENV_TIMEOUT) {
            self.watch.idle_timeout_secs = parse_u64(ENV_TIMEOUT, &raw)?;
        }
        if let Some(raw) = get(ENV_DEBOUNCE_MS) {
            self.watch.debounce_ms = parse_u64(ENV_DEBOUNCE_MS, &raw)?;
        }
        if let Some(raw) = get(ENV_PATHS) {
            self.watch.paths = raw
                .split(':')
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(raw) = get(ENV_BACKEND) {
            self.watch.backend = raw.parse()?;
        }
        if let Some(raw) = get(ENV_ON_UNAVAILABLE) {
            self.watch.on_unavailable = raw.parse()?;
        }
        if let Some(raw) = get(ENV_CONVERTER) {
            self.converter.program = raw;
        }
        Ok(())
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        let w = &self.watch;
        if w.paths.is_empty() {
            return Err(Error::Config("watch.paths must name at least one file".into()));
        }
        check_range("watch.debounce_ms", w.debounce_ms, 10, 60_000)?;
        if w.max_burst_ms != 0 {
            check_range("watch.max_burst_ms", w.max_burst_ms, w.debounce_ms, 600_000)?;
        }
        check_range("watch.idle_timeout_secs", w.idle_timeout_secs, 1, 86_400)?;
        if w.debounce_ms >= w.idle_timeout_secs.saturating_mul(1_000) {
            return Err(Error::Config(format!(
                "watch.debounce_ms ({}) must be shorter than watch.idle_timeout_secs ({}s)",
                w.debounce_ms, w.idle_timeout_secs
            )));
        }
        check_range("watch.grace_ms", w.grace_ms, 100, 60_000)?;
        check_range("converter.timeout_secs", self.converter.timeout_secs, 1, 3_600)?;
        if self.converter.program.trim().is_empty() {
            return Err(Error::Config("converter.program must not be empty".into()));
        }
        Ok(())
    }
}

/// Config file in effect for `workdir`
///
/// The project file wins when it exists; otherwise the user file path is
/// returned whether or not it exists yet.
pub fn config_file_path(workdir: &Path) -> Option<PathBuf> {
    let project = workdir.join(PROJECT_CONFIG_FILE);
    if project.exists() {
        return Some(project);
    }
    user_config_path()
}

/// User-level config file location
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("lockwatch").join("config.toml"))
}

/// Example configuration with defaults and comments
pub fn example_config() -> String {
    let d = WatchConfig::default();
    format!(
        r#"# lockwatch configuration
# Place in ./lockwatch.toml or ~/.config/lockwatch/config.toml

[watch]
# Lock files to watch, relative to the working directory
paths = ["{lock}"]
# Quiet time after the last write before converting (10-60000)
debounce_ms = {debounce}
# Longest burst before a conversion is forced (0 = unbounded)
max_burst_ms = {burst}
# Stop watching after this long without activity (1-86400, env WATCHER_TIMEOUT)
idle_timeout_secs = {idle}
# Wait this long for the observer to exit before escalating (100-60000)
grace_ms = {grace}
# native | inotifywait
backend = "{backend}"
# degrade (run the command unwatched) | abort
on_unavailable = "{policy}"

[converter]
program = "{program}"
args = ["-l", "{{lock}}", "-o", "{{output}}"]
# Empty: lock path with extension "nix"
output = ""
timeout_secs = {timeout}
"#,
        lock = DEFAULT_LOCK_FILE,
        debounce = d.watch.debounce_ms,
        burst = d.watch.max_burst_ms,
        idle = d.watch.idle_timeout_secs,
        grace = d.watch.grace_ms,
        backend = d.watch.backend.as_str(),
        policy = d.watch.on_unavailable.as_str(),
        program = d.converter.program,
        timeout = d.converter.timeout_secs,
    )
}

fn parse_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} must be a non-negative integer, got '{}'", key, raw)))
}

fn check_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(Error::Config(format!(
            "{} = {} is out of range ({}-{})",
            key, value, min, max
        )));
    }
    Ok(())
}
