//! Build command implementation

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use apk_indexer::config::Config;
use apk_indexer::exec::SystemRunner;
use apk_indexer::indexer;
use apk_indexer::report::ConsoleReporter;

/// Overrides for the config file; most can also come from the CI environment
#[derive(Args, Debug, Default)]
pub struct BuildArgs {
    /// Directory containing built .apk files
    #[arg(long, env = "INPUT_PKGS_PATH")]
    pub pkgs_path: Option<PathBuf>,

    /// Public URL the repository will be served from
    #[arg(long, env = "INPUT_ABUILD_REPO_URL")]
    pub repo_url: Option<String>,

    /// Signing key base name
    #[arg(long, env = "INPUT_ABUILD_KEY_NAME")]
    pub key_name: Option<String>,

    /// Private key (PEM); prefer the environment variable
    #[arg(long, env = "INPUT_ABUILD_KEY_PRIV", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Public key (PEM)
    #[arg(long, env = "INPUT_ABUILD_KEY_PUB", hide_env_values = true)]
    pub public_key: Option<String>,

    /// Output directory for keys/ and repo/
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Remove packages from earlier runs that are not being published now
    #[arg(long)]
    pub prune: bool,

    /// Index generator program
    #[arg(long)]
    pub index_tool: Option<String>,

    /// Index signing program
    #[arg(long)]
    pub sign_tool: Option<String>,

    /// Timeout for each external tool, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Retries for failed external tool invocations
    #[arg(long)]
    pub retries: Option<u32>,

    /// File to append `repo_path=...` to
    #[arg(long, env = "GITHUB_OUTPUT")]
    pub github_output: Option<PathBuf>,

    #[arg(long, env = "GITHUB_ACTIONS", hide = true)]
    pub github_actions: Option<String>,
}

impl BuildArgs {
    /// Layer these values over `config`
    pub fn apply(self, config: &mut Config) {
        if let Some(path) = self.pkgs_path {
            config.packages.path = Some(path);
        }
        if let Some(url) = self.repo_url {
            config.repository.url = Some(url);
        }
        if let Some(name) = self.key_name {
            config.signing.key_name = Some(name);
        }
        if let Some(key) = self.private_key {
            config.signing.private_key = Some(key);
        }
        if let Some(key) = self.public_key {
            config.signing.public_key = Some(key);
        }
        if let Some(dir) = self.output {
            config.repository.output_dir = dir;
        }
        if self.prune {
            config.repository.prune = true;
        }
        if let Some(tool) = self.index_tool {
            config.tools.index = tool;
        }
        if let Some(tool) = self.sign_tool {
            config.tools.sign = tool;
        }
        if let Some(secs) = self.timeout {
            config.tools.timeout_secs = secs;
        }
        if let Some(retries) = self.retries {
            config.tools.retries = retries;
        }
        if let Some(path) = self.github_output.filter(|p| !p.as_os_str().is_empty()) {
            config.ci.github_output = Some(path);
        }
        if self.github_actions.as_deref() == Some("true") {
            config.ci.github_groups = true;
        }
    }
}

pub fn run(args: BuildArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);
    let settings = config.resolve()?;

    let reporter = ConsoleReporter::new(settings.github_groups);
    let runner = Arc::new(SystemRunner::new(settings.tools.timeout()));

    let layout = indexer::run(&settings, runner, &reporter).with_context(|| {
        format!(
            "Failed to build repository from {}",
            settings.pkgs_path.display()
        )
    })?;

    let packages: usize = layout.architectures.iter().map(|a| a.packages.len()).sum();
    eprintln!(
        "{} {} package(s) across {} architecture(s)",
        "✓".green().bold(),
        packages,
        layout.architectures.len()
    );
    println!("{}", layout.root.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overrides_config() {
        let mut config = Config::default();
        config.tools.sign = "from-file".to_string();
        config.repository.url = Some("https://file.example".to_string());

        BuildArgs {
            repo_url: Some("https://flag.example".to_string()),
            output: Some(PathBuf::from("/tmp/out")),
            prune: true,
            retries: Some(3),
            github_actions: Some("true".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert_eq!(config.repository.url.as_deref(), Some("https://flag.example"));
        assert_eq!(config.repository.output_dir, PathBuf::from("/tmp/out"));
        assert!(config.repository.prune);
        assert_eq!(config.tools.retries, 3);
        assert_eq!(config.tools.sign, "from-file");
        assert!(config.ci.github_groups);
    }

    #[test]
    fn test_empty_github_output_is_ignored() {
        let mut config = Config::default();
        BuildArgs {
            github_output: Some(PathBuf::new()),
            github_actions: Some("false".to_string()),
            ..Default::default()
        }
        .apply(&mut config);

        assert!(config.ci.github_output.is_none());
        assert!(!config.ci.github_groups);
    }
}
