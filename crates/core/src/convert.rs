//! Converter seam: lock file in, derived declarative file out

use crate::config::ConverterConfig;
use crate::error::ConversionError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt kept in a `ConversionError::Failed`
const STDERR_EXCERPT: usize = 2048;

/// Converts a lock file into its derived file
///
/// Implementations are called at most once at a time per session and may
/// take arbitrarily long; the caller bounds nothing beyond what the
/// implementation itself enforces.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `lock`, returning the path of the derived file
    async fn convert(&self, lock: &Path) -> Result<PathBuf, ConversionError>;

    /// Short name for log lines
    fn name(&self) -> &str {
        "converter"
    }
}

/// Runs an external program such as `bun2nix`
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
    output: Option<PathBuf>,
    timeout: Duration,
}

impl CommandConverter {
    /// Create a converter running `program` with argument templates
    ///
    /// `{lock}` and `{output}` in `args` are replaced per invocation.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            output: None,
            timeout: Duration::from_secs(120),
        }
    }

    /// Build from configuration; a relative `output` resolves against `workdir`
    pub fn from_config(config: &ConverterConfig, workdir: &Path) -> Self {
        let output = (!config.output.trim().is_empty()).then(|| {
            let path = PathBuf::from(&config.output);
            if path.is_absolute() {
                path
            } else {
                workdir.join(path)
            }
        });

        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            output,
            timeout: config.timeout(),
        }
    }

    /// Override the time budget
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fix the derived file path
    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Derived file for `lock`: the configured output, else `lock` with extension `nix`
    pub fn output_for(&self, lock: &Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| lock.with_extension("nix"))
    }

    fn render_args(&self, lock: &Path, output: &Path) -> Vec<String> {
        let lock = lock.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{lock}", &lock).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, lock: &Path) -> Result<PathBuf, ConversionError> {
        let output = self.output_for(lock);
        let args = self.render_args(lock, &output);

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = lock.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        debug!("Running converter: {} {:?}", self.program, args);

        let child = command.spawn().map_err(|source| ConversionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => return Err(ConversionError::TimedOut(self.timeout)),
        };
        let out = result.map_err(|source| ConversionError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !out.stdout.is_empty() {
            debug!(
                "Converter stdout: {}",
                String::from_utf8_lossy(&out.stdout).trim_end()
            );
        }

        if out.status.success() {
            Ok(output)
        } else {
            Err(ConversionError::Failed {
                status: out.status.to_string(),
                stderr: stderr_excerpt(&out.stderr),
            })
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

/// Tail of converter stderr, trimmed
fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_EXCERPT {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// `sh -c 'script' {lock} {output}` converter
    fn shell(script: &str) -> CommandConverter {
        CommandConverter::new(
            "sh",
            vec![
                "-c".to_string(),
                script.to_string(),
                "{lock}".to_string(),
                "{output}".to_string(),
            ],
        )
    }

    #[test]
    fn test_output_defaults_to_nix_extension() {
        let converter = CommandConverter::new("bun2nix", vec![]);
        assert_eq!(
            converter.output_for(Path::new("/work/bun.lock")),
            PathBuf::from("/work/bun.nix")
        );

        let fixed = converter.with_output("/work/nix/deps.nix");
        assert_eq!(
            fixed.output_for(Path::new("/work/bun.lock")),
            PathBuf::from("/work/nix/deps.nix")
        );
    }

    #[test]
    fn test_from_config_resolves_relative_output() {
        let config = ConverterConfig {
            output: "nix/bun.nix".to_string(),
            ..ConverterConfig::default()
        };
        let converter = CommandConverter::from_config(&config, Path::new("/work"));
        assert_eq!(
            converter.output_for(Path::new("/work/bun.lock")),
            PathBuf::from("/work/nix/bun.nix")
        );
        assert_eq!(converter.name(), "bun2nix");
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let converter = CommandConverter::from_config(&ConverterConfig::default(), Path::new("/w"));
        let args = converter.render_args(Path::new("/w/bun.lock"), Path::new("/w/bun.nix"));
        assert_eq!(args, vec!["-l", "/w/bun.lock", "-o", "/w/bun.nix"]);
    }

    #[tokio::test]
    async fn test_successful_conversion_writes_output() {
        let temp_dir = TempDir::new().unwrap();
        let lock = temp_dir.path().join("bun.lock");
        fs::write(&lock, "cowsay@1.6.0").unwrap();

        let derived = shell("cp \"$0\" \"$1\"").convert(&lock).await.unwrap();

        assert_eq!(derived, temp_dir.path().join("bun.nix"));
        assert!(fs::read_to_string(&derived).unwrap().contains("cowsay"));
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let lock = temp_dir.path().join("bun.lock");
        fs::write(&lock, "{}").unwrap();

        let err = shell("echo 'malformed lock' >&2; exit 3")
            .convert(&lock)
            .await
            .unwrap_err();

        match err {
            ConversionError::Failed { stderr, .. } => assert_eq!(stderr, "malformed lock"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let temp_dir = TempDir::new().unwrap();
        let lock = temp_dir.path().join("bun.lock");

        let err = CommandConverter::new("lockwatch-no-such-converter", vec![])
            .convert(&lock)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_slow_converter_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let lock = temp_dir.path().join("bun.lock");
        fs::write(&lock, "{}").unwrap();

        let err = shell("sleep 5")
            .with_timeout(Duration::from_millis(100))
            .convert(&lock)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::TimedOut(_)));
    }

    #[test]
    fn test_stderr_excerpt_keeps_tail() {
        let long = "x".repeat(STDERR_EXCERPT + 10) + "tail";
        let excerpt = stderr_excerpt(long.as_bytes());
        assert!(excerpt.starts_with("..."));
        assert!(excerpt.ends_with("tail"));
        assert_eq!(excerpt.len(), STDERR_EXCERPT + 3);
    }
}
