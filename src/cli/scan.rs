//! Scan command implementation

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;

use apk_indexer::config::Config;
use apk_indexer::report::ConsoleReporter;
use apk_indexer::scanner;

pub fn run(path: Option<PathBuf>, config: &Config) -> Result<()> {
    let path = path
        .or_else(|| config.packages.path.clone())
        .context("No packages directory given (pass PATH or set INPUT_PKGS_PATH)")?;

    let reporter = ConsoleReporter::new(config.ci.github_groups);
    let groups = scanner::scan(&path, &reporter)
        .with_context(|| format!("Failed to scan {}", path.display()))?;

    if groups.is_empty() {
        println!("  {}", "(no packages found)".dimmed());
        return Ok(());
    }

    let mut arches: Vec<_> = groups.iter().collect();
    arches.sort_by(|a, b| a.0.cmp(b.0));
    for (arch, artifacts) in arches {
        println!("  {}: {} package(s)", arch.bold(), artifacts.len());
    }

    Ok(())
}
