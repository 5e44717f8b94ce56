//! One-shot conversion of the configured lock files

use anyhow::Result;
use cli_lib::settings::{self, Overrides};
use lw_core::{CommandConverter, Converter};
use owo_colors::OwoColorize;
use std::path::Path;

pub async fn run(workdir: &Path, overrides: &Overrides) -> Result<i32> {
    let config = settings::load(workdir, overrides)?;
    let converter = CommandConverter::from_config(&config.converter, workdir);

    let mut failures = 0;
    for lock in config.watch.resolve_paths(workdir) {
        if !lock.is_file() {
            eprintln!("{} {}: lock file not found", "✗".red(), lock.display());
            failures += 1;
            continue;
        }
        match converter.convert(&lock).await {
            Ok(derived) => println!(
                "{} {} -> {}",
                "✓".green(),
                lock.display(),
                derived.display().to_string().cyan()
            ),
            Err(e) => {
                eprintln!("{} {}: {}", "✗".red(), lock.display(), e);
                failures += 1;
            }
        }
    }

    Ok(if failures == 0 { 0 } else { 1 })
}
