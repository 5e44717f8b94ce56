//! The wrapped command
//!
//! Stdio is inherited so the command's output passes through untouched.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::{OsStr, OsString};
use std::io::{self, ErrorKind};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Exit code for failures inside lockwatch itself (`EX_SOFTWARE`)
pub const EXIT_INTERNAL: i32 = 70;
/// Exit code when the command cannot be found
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code when the command is not executable
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Failure to launch the wrapped command
#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("command not found: {program}")]
    NotFound { program: String },

    #[error("permission denied: {program}")]
    NotExecutable { program: String },

    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: io::Error,
    },
}

impl SpawnError {
    /// Shell-convention exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            SpawnError::NotFound { .. } => EXIT_NOT_FOUND,
            SpawnError::NotExecutable { .. } => EXIT_NOT_EXECUTABLE,
            SpawnError::Io { .. } => EXIT_INTERNAL,
        }
    }
}

/// How the wrapped command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandExit {
    /// Normal exit with a status code
    Code(i32),
    /// Terminated by a signal
    Signal(i32),
}

impl CommandExit {
    /// Code to exit lockwatch with: the command's own, or `128 + signal`
    pub fn code(&self) -> i32 {
        match self {
            CommandExit::Code(code) => *code,
            CommandExit::Signal(signal) => 128 + signal,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, CommandExit::Code(0))
    }
}

impl From<ExitStatus> for CommandExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => CommandExit::Code(code),
            (None, Some(signal)) => CommandExit::Signal(signal),
            (None, None) => CommandExit::Code(EXIT_INTERNAL),
        }
    }
}

impl std::fmt::Display for CommandExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandExit::Code(code) => write!(f, "exit code {}", code),
            CommandExit::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Command line plus working directory of the wrapped command
#[derive(Debug, Clone)]
pub struct WrappedCommand {
    program: OsString,
    args: Vec<OsString>,
    current_dir: Option<PathBuf>,
    envs: Vec<(OsString, OsString)>,
}

impl WrappedCommand {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
        }
    }

    /// Build from `argv`, whose first element is the program
    pub fn from_argv<I, S>(argv: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut argv = argv.into_iter();
        let program = argv.next()?;
        Some(Self::new(program).args(argv))
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Program name for diagnostics
    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Launch the command on its own task
    ///
    /// The child is killed if the returned handle is dropped before the
    /// command exits.
    pub fn spawn(&self) -> Result<RunningCommand, SpawnError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }

        let child = command.spawn().map_err(|source| {
            let program = self.program();
            match source.kind() {
                ErrorKind::NotFound => SpawnError::NotFound { program },
                ErrorKind::PermissionDenied => SpawnError::NotExecutable { program },
                _ => SpawnError::Io { program, source },
            }
        })?;

        let pid = child.id();
        info!("Started {} (pid {})", self.program(), pid.unwrap_or_default());
        Ok(RunningCommand {
            pid,
            task: tokio::spawn(wait_child(child)),
        })
    }
}

async fn wait_child(mut child: Child) -> io::Result<CommandExit> {
    let status = child.wait().await?;
    Ok(CommandExit::from(status))
}

/// A launched command whose exit is awaited on a separate task
pub struct RunningCommand {
    pid: Option<u32>,
    task: JoinHandle<io::Result<CommandExit>>,
}

impl RunningCommand {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Deliver `signal` to the command
    ///
    /// A command that already exited is not an error.
    pub fn signal(&self, signal: Signal) {
        let Some(pid) = self.pid else {
            return;
        };
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => debug!("Forwarded {} to pid {}", signal, pid),
            Err(e) => debug!("Could not forward {} to pid {}: {}", signal, pid, e),
        }
    }

    /// Wait for the command to exit
    ///
    /// Cancel safe; must not be polled again once it has returned.
    pub async fn wait(&mut self) -> io::Result<CommandExit> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(io::Error::new(ErrorKind::Other, e)),
        }
    }
}

impl Drop for RunningCommand {
    fn drop(&mut self) {
        // Dropping the child kills it
        self.task.abort();
    }
}
