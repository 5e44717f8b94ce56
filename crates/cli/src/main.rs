//! lockwatch CLI

use clap::{Args, Parser, Subcommand};
use cli_lib::settings::Overrides;
use lw_core::{Backend, UnavailablePolicy};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use supervisor::EXIT_INTERNAL;

mod cmd;
mod util;

/// lockwatch - Keep bun.nix in sync with bun.lock while a command runs
#[derive(Parser)]
#[command(name = "lockwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Working directory (default: current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    dir: Option<PathBuf>,

    /// Log more (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also append logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by commands that read lock files
#[derive(Args, Clone, Default)]
struct LockArgs {
    /// Lock file to watch or convert (repeatable; default: bun.lock)
    #[arg(short = 'w', long = "watch", value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Converter program (default: bun2nix)
    #[arg(long, value_name = "PROGRAM")]
    converter: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command, converting the lock file whenever it changes
    Run {
        #[command(flatten)]
        lock: LockArgs,

        /// Stop watching after this many seconds without file activity
        #[arg(short, long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Quiet time after the last write before converting
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,

        /// Observer: native or inotifywait
        #[arg(long)]
        backend: Option<Backend>,

        /// When watching is unavailable: degrade (run anyway) or abort
        #[arg(long, value_name = "POLICY")]
        on_unavailable: Option<UnavailablePolicy>,

        /// Skip the per-directory lease (allows concurrent watchers)
        #[arg(long)]
        no_lease: bool,

        /// Command to run, after `--`
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Convert the lock file once, without watching
    Convert {
        #[command(flatten)]
        lock: LockArgs,
    },
    /// Show whether a session is watching the working directory
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// View and edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Print one value
    Get {
        /// Key, e.g. watch.debounce_ms
        key: String,
    },
    /// Set one value in the config file
    Set {
        /// Key, e.g. watch.debounce_ms
        key: String,
        /// New value
        value: String,
    },
    /// Show the config file path
    Path {
        /// Create the file with defaults if missing
        #[arg(long)]
        create: bool,
    },
    /// Print an example configuration
    Example,
}

impl LockArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            paths: self.paths.clone(),
            converter: self.converter.clone(),
            ..Default::default()
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let guard = match cli_lib::logging::init(cli.verbose, cli.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {:#}", "lockwatch:".red().bold(), e);
            std::process::exit(EXIT_INTERNAL);
        }
    };

    // Setup failures of `run` are internal errors; other commands use 1
    let failure_code = match cli.command {
        Commands::Run { .. } => EXIT_INTERNAL,
        _ => 1,
    };

    let code = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => {
            let code = match runtime.block_on(dispatch(cli)) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("{} {:#}", "lockwatch:".red().bold(), e);
                    failure_code
                }
            };
            runtime.shutdown_background();
            code
        }
        Err(e) => {
            eprintln!("{} failed to start runtime: {}", "lockwatch:".red().bold(), e);
            EXIT_INTERNAL
        }
    };

    // Flush the file writer before exiting
    drop(guard);
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let workdir = util::resolve_workdir(cli.dir.as_deref())?;

    match cli.command {
        Commands::Run {
            lock,
            timeout,
            debounce_ms,
            backend,
            on_unavailable,
            no_lease,
            command,
        } => {
            let overrides = Overrides {
                idle_timeout_secs: timeout,
                debounce_ms,
                backend,
                on_unavailable,
                ..lock.overrides()
            };
            cmd::run::run(&workdir, &overrides, no_lease, &command).await
        }
        Commands::Convert { lock } => cmd::convert::run(&workdir, &lock.overrides()).await,
        Commands::Status { json } => cmd::status::run(&workdir, json).await,
        Commands::Config(config_cmd) => {
            match config_cmd {
                ConfigCommands::List => cmd::config::run_list(&workdir).await?,
                ConfigCommands::Get { key } => cmd::config::run_get(&workdir, &key).await?,
                ConfigCommands::Set { key, value } => {
                    cmd::config::run_set(&workdir, &key, &value).await?
                }
                ConfigCommands::Path { create } => cmd::config::run_path(&workdir, create).await?,
                ConfigCommands::Example => cmd::config::run_example().await?,
            }
            Ok(0)
        }
    }
}
