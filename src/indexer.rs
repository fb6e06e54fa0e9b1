//! The end-to-end run: install keys, scan, build, report

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::config::Settings;
use crate::error::Result;
use crate::exec::CommandRunner;
use crate::report::{in_group, Reporter};
use crate::repository::{Repository, RepositoryLayout};
use crate::scanner;
use crate::signing::KeyManager;

/// Build the repository described by `settings`.
///
/// The source tree is scanned completely before the repository root is
/// touched, so an unreadable package leaves no repository behind.
pub fn run(
    settings: &Settings,
    runner: Arc<dyn CommandRunner>,
    reporter: &dyn Reporter,
) -> Result<RepositoryLayout> {
    let mut keys = KeyManager::new(
        settings.keys.clone(),
        runner.clone(),
        &settings.tools.sign,
        settings.tools.invocation(),
    );
    let keys_dir = settings.keys_dir();
    in_group(reporter, "Setup Keys", || {
        reporter.info(&format!("Installing keys to {}", keys_dir.display()));
        keys.install(&keys_dir)
    })?;

    let groups = scanner::scan_excluding(
        &settings.pkgs_path,
        std::slice::from_ref(&settings.output_dir),
        reporter,
    )?;

    let layout = Repository::new(
        settings.repo_dir(),
        &keys,
        &settings.repo_url,
        runner,
        reporter,
    )
    .index_tool(&settings.tools.index)
    .invocation(settings.tools.invocation())
    .prune(settings.prune)
    .build(&groups)?;

    if let Some(output) = &settings.github_output {
        write_github_output(output, &layout.root)?;
    }

    Ok(layout)
}

/// Append `repo_path=<path>` to a GitHub Actions output file
pub fn write_github_output(output: &Path, repo_root: &Path) -> Result<()> {
    tracing::debug!("Writing repo_path to {}", output.display());
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(output)?;
    writeln!(file, "repo_path={}", repo_root.display())?;
    Ok(())
}
