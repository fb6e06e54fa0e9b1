//! Assembling the on-disk repository
//!
//! ## Repository Structure
//!
//! ```text
//! repo/
//! ├── index.md                 # lists every architecture
//! ├── {key}.rsa.pub            # public key for clients
//! └── {arch}/
//!     ├── index.md             # lists the index and every package
//!     ├── APKINDEX.tar.gz      # signed binary index
//!     └── {name}-{version}.apk
//! ```
//!
//! Architectures are processed one at a time, in lexicographic order. Any
//! failure aborts the build before the top-level listing is written, so the
//! listing never names an architecture that did not build completely.

use std::collections::{BTreeSet, HashSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{IndexerError, Result};
use crate::exec::{CommandRunner, Invocation, ToolCommand};
use crate::package::SourceArtifact;
use crate::report::{in_group, Reporter};
use crate::scanner::ArchitectureGroups;
use crate::signing::KeyManager;

/// Binary index file name inside each architecture directory
pub const INDEX_FILE: &str = "APKINDEX.tar.gz";

/// Listing page file name
pub const LISTING_FILE: &str = "index.md";

/// Result of a successful build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryLayout {
    pub root: PathBuf,
    pub architectures: Vec<ArchitectureLayout>,
    pub public_key: PathBuf,
}

/// One fully built architecture directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureLayout {
    pub arch: String,
    pub dir: PathBuf,
    /// Canonical package file names, in listing order
    pub packages: Vec<String>,
}

/// Builds a repository tree from scanned artifacts
pub struct Repository<'a> {
    root: PathBuf,
    keys: &'a KeyManager,
    repo_url: String,
    runner: Arc<dyn CommandRunner>,
    index_tool: String,
    invocation: Invocation,
    prune: bool,
    reporter: &'a dyn Reporter,
}

impl<'a> Repository<'a> {
    pub fn new(
        root: impl Into<PathBuf>,
        keys: &'a KeyManager,
        repo_url: &str,
        runner: Arc<dyn CommandRunner>,
        reporter: &'a dyn Reporter,
    ) -> Self {
        Self {
            root: root.into(),
            keys,
            repo_url: repo_url.trim_end_matches('/').to_string(),
            runner,
            index_tool: "apk".to_string(),
            invocation: Invocation {
                retries: 0,
                timeout: std::time::Duration::from_secs(300),
            },
            prune: false,
            reporter,
        }
    }

    /// Program used to generate indexes (default `apk`)
    pub fn index_tool(mut self, tool: impl Into<String>) -> Self {
        self.index_tool = tool.into();
        self
    }

    pub fn invocation(mut self, invocation: Invocation) -> Self {
        self.invocation = invocation;
        self
    }

    /// Delete packages from earlier runs that are not part of this build
    pub fn prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Ensure the repository root exists
    pub fn prepare(&self) -> Result<()> {
        in_group(self.reporter, "Setup Repo", || -> Result<()> {
            self.reporter
                .info(&format!("Preparing repo at '{}'", self.root.display()));
            fs::create_dir_all(&self.root)?;
            Ok(())
        })
    }

    /// Materialize every architecture group, then the top-level listing and key
    pub fn build(&self, groups: &ArchitectureGroups) -> Result<RepositoryLayout> {
        self.prepare()?;

        // A listing from an earlier run must not outlive a failed build.
        remove_if_exists(&self.root.join(LISTING_FILE))?;

        let mut arches: Vec<(&String, &Vec<SourceArtifact>)> = groups.iter().collect();
        arches.sort_by(|a, b| a.0.cmp(b.0));

        let mut built = Vec::new();
        for (arch, artifacts) in arches {
            let title = format!("Building {}", arch);
            let layout = in_group(self.reporter, &title, || self.build_arch(arch, artifacts))?;
            built.extend(layout);
        }

        let names: Vec<&str> = built.iter().map(|a| a.arch.as_str()).collect();
        let listing = render_root_listing(&self.repo_url, &self.keys.public_key_name(), &names);
        fs::write(self.root.join(LISTING_FILE), listing)?;
        let public_key = self.keys.install_public_key(&self.root)?;

        self.reporter.success(&format!(
            "Repository with {} architecture(s) written to {}",
            built.len(),
            self.root.display()
        ));

        Ok(RepositoryLayout {
            root: self.root.clone(),
            architectures: built,
            public_key,
        })
    }

    /// Build one architecture directory. Empty groups are skipped.
    fn build_arch(
        &self,
        arch: &str,
        artifacts: &[SourceArtifact],
    ) -> Result<Option<ArchitectureLayout>> {
        if artifacts.is_empty() {
            tracing::warn!("No packages for {}, skipping", arch);
            return Ok(None);
        }

        let mut sorted: Vec<&SourceArtifact> = artifacts.iter().collect();
        sorted.sort_by(|a, b| {
            a.descriptor
                .name
                .cmp(&b.descriptor.name)
                .then_with(|| a.descriptor.version.cmp(&b.descriptor.version))
        });

        let dir = self.root.join(arch);
        fs::create_dir_all(&dir)?;
        remove_if_exists(&dir.join(LISTING_FILE))?;

        let mut packages: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for artifact in sorted {
            let filename = artifact.descriptor.filename();
            let dest = dir.join(&filename);
            let first = seen.insert(filename.clone());
            if !first {
                let msg = format!(
                    "{} is provided by more than one artifact; {} wins",
                    filename,
                    artifact.path.display()
                );
                tracing::warn!("{}", msg);
                self.reporter.warning(&msg);
            }

            tracing::debug!("Copying {} to {}", artifact.path.display(), dest.display());
            fs::copy(&artifact.path, &dest).map_err(|source| IndexerError::CopyFailed {
                from: artifact.path.clone(),
                to: dest.clone(),
                source,
            })?;
            self.reporter.info(&format!("Added {}", filename));
            if first {
                packages.push(filename);
            }
        }

        if self.prune {
            self.prune_stale(&dir, &packages)?;
        }

        let index = self.generate_index(arch, &dir)?;
        self.keys.sign(&index)?;

        let listing = render_arch_listing(
            arch,
            &self.repo_url,
            &self.keys.public_key_name(),
            &packages,
        );
        fs::write(dir.join(LISTING_FILE), listing)?;
        self.reporter
            .success(&format!("{}: {} package(s) indexed", arch, packages.len()));

        Ok(Some(ArchitectureLayout {
            arch: arch.to_string(),
            dir,
            packages,
        }))
    }

    /// Remove `.apk` files that are not in `keep`
    fn prune_stale(&self, dir: &Path, keep: &[String]) -> Result<()> {
        for name in apk_files(dir)? {
            if !keep.contains(&name) {
                tracing::info!("Pruning stale package {}", name);
                self.reporter.info(&format!("Removed stale {}", name));
                fs::remove_file(dir.join(&name))?;
            }
        }
        Ok(())
    }

    /// Run the indexer over every package present in `dir`
    fn generate_index(&self, arch: &str, dir: &Path) -> Result<PathBuf> {
        let index = dir.join(INDEX_FILE);
        remove_if_exists(&index)?;

        let cmd = ToolCommand::new(&self.index_tool)
            .args(["index", "--allow-untrusted", "-o", INDEX_FILE])
            .args(apk_files(dir)?)
            .current_dir(dir);

        self.invocation
            .run(&*self.runner, &cmd, |output| IndexerError::IndexingFailed {
                arch: arch.to_string(),
                output,
            })?;

        if !index.is_file() {
            return Err(IndexerError::IndexingFailed {
                arch: arch.to_string(),
                output: format!("{} exited successfully but wrote no {}", self.index_tool, INDEX_FILE),
            });
        }
        Ok(index)
    }
}

/// Names of the `.apk` files directly inside `dir`, sorted
fn apk_files(dir: &Path) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".apk") && entry.file_type()?.is_file() {
            names.insert(name);
        }
    }
    Ok(names)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

/// Install instructions followed by the links, all inside one shell block
fn render_listing(heading: &str, repo_url: &str, public_key_name: &str, links: &[String]) -> String {
    let mut out = format!(
        "# {heading}\n\n\
         ```bash\n\
         # Install key\n\
         wget -O \"/etc/apk/keys/{key}\" \"{url}/{key}\"\n\
         \n\
         # Install repo\n\
         echo \"{url}\" >> /etc/apk/repositories\n\
         \n",
        heading = heading,
        key = public_key_name,
        url = repo_url,
    );
    for link in links {
        let _ = writeln!(out, "{}", link);
    }
    out.push_str("\n```\n");
    out
}

/// Listing page for one architecture: the index first, then each package
pub fn render_arch_listing(
    arch: &str,
    repo_url: &str,
    public_key_name: &str,
    packages: &[String],
) -> String {
    let links: Vec<String> = std::iter::once(INDEX_FILE)
        .chain(packages.iter().map(String::as_str))
        .map(|file| format!("* [{0}]({0})", file))
        .collect();
    render_listing(&format!("List {}", arch), repo_url, public_key_name, &links)
}

/// Top-level listing page linking each architecture's listing
pub fn render_root_listing(repo_url: &str, public_key_name: &str, arches: &[&str]) -> String {
    let links: Vec<String> = arches
        .iter()
        .map(|arch| format!("* [{0}]({0}/{1})", arch, LISTING_FILE))
        .collect();
    render_listing("APK Repository", repo_url, public_key_name, &links)
}
