//! Test project fixtures
//!
//! A `TestProject` is a temporary working directory holding a `bun.lock`
//! and a shell-script converter that records each invocation and writes
//! `# derived` followed by the lock contents to its output path.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary project with an instrumented converter
pub struct TestProject {
    _temp_dir: TempDir,
    root: PathBuf,
    home: PathBuf,
    converter: PathBuf,
    calls_log: PathBuf,
}

impl TestProject {
    /// Create a project whose `bun.lock` holds `initial`
    pub fn new(initial: &str) -> Result<Self> {
        let temp_dir = TempDir::new().context("Failed to create temp dir")?;
        let root = temp_dir.path().join("project");
        let home = temp_dir.path().join("home");
        let tools = temp_dir.path().join("tools");
        for dir in [&root, &home, &tools] {
            fs::create_dir_all(dir)?;
        }

        let calls_log = temp_dir.path().join("converter-calls.log");
        let converter = tools.join("fake-bun2nix");
        // Invoked as: fake-bun2nix -l <lock> -o <output>
        let script = format!(
            "#!/bin/sh\necho \"$2\" >> '{}'\n{{ echo '# derived'; cat \"$2\"; }} > \"$4\"\n",
            calls_log.display()
        );
        fs::write(&converter, script)?;
        fs::set_permissions(&converter, fs::Permissions::from_mode(0o755))?;

        fs::write(root.join("bun.lock"), initial)?;

        Ok(Self {
            _temp_dir: temp_dir,
            root,
            home,
            converter,
            calls_log,
        })
    }

    /// Working directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scratch directory used as TMPDIR and XDG_CONFIG_HOME for the binary
    pub fn home(&self) -> &Path {
        &self.home
    }

    /// Path of the converter script
    pub fn converter(&self) -> &Path {
        &self.converter
    }

    pub fn lock(&self) -> PathBuf {
        self.root.join("bun.lock")
    }

    /// Contents of `bun.nix`, empty if it was never written
    pub fn derived(&self) -> String {
        fs::read_to_string(self.root.join("bun.nix")).unwrap_or_default()
    }

    /// Number of converter invocations so far
    pub fn conversions(&self) -> usize {
        fs::read_to_string(&self.calls_log)
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

/// Processes currently named `name`
pub fn process_count(name: &str) -> usize {
    fs::read_dir("/proc")
        .map(|entries| {
            entries
                .filter_map(|entry| fs::read_to_string(entry.ok()?.path().join("comm")).ok())
                .filter(|comm| comm.trim() == name)
                .count()
        })
        .unwrap_or(0)
}

/// Whether `program` can be started
pub fn program_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--help")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
