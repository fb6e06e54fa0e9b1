//! Discovery of built packages in a source tree

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::archive;
use crate::error::Result;
use crate::package::SourceArtifact;
use crate::report::{in_group, Reporter};

/// Artifacts keyed by architecture, in discovery order
pub type ArchitectureGroups = IndexMap<String, Vec<SourceArtifact>>;

/// Find every `.apk` under `source_dir` and group them by architecture.
///
/// Any package that cannot be read fails the whole scan.
pub fn scan(source_dir: &Path, reporter: &dyn Reporter) -> Result<ArchitectureGroups> {
    scan_excluding(source_dir, &[], reporter)
}

/// Like [`scan`], but skips the given directories (and everything below
/// them). Used to keep a previous run's output out of the scan when it
/// lives inside the source tree.
pub fn scan_excluding(
    source_dir: &Path,
    exclude: &[PathBuf],
    reporter: &dyn Reporter,
) -> Result<ArchitectureGroups> {
    let title = format!("Scanning '{}' for APKs", source_dir.display());
    in_group(reporter, &title, || -> Result<ArchitectureGroups> {
        let exclude: Vec<PathBuf> = exclude.iter().map(|p| normalize(p)).collect();
        let mut groups = ArchitectureGroups::new();

        let walker = WalkDir::new(source_dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && exclude.contains(&normalize(entry.path())))
            });

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() || !is_apk(entry.path()) {
                continue;
            }

            let descriptor = archive::extract(entry.path())?;
            groups
                .entry(descriptor.architecture.clone())
                .or_default()
                .push(SourceArtifact {
                    path: entry.into_path(),
                    descriptor,
                });
        }

        let all: Vec<&SourceArtifact> = groups.values().flatten().collect();
        tracing::info!(
            "Found {} package(s) for {} architecture(s)",
            all.len(),
            groups.len()
        );
        reporter.summary(&all);

        Ok(groups)
    })
}

fn is_apk(path: &Path) -> bool {
    path.extension().map(|e| e == "apk").unwrap_or(false)
}

fn normalize(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
