//! Configuration management for apk-indexer
//!
//! Values come from an optional TOML file, overridden by command-line flags
//! and CI environment variables in the CLI layer. The result is validated
//! once into [`Settings`], which is all the rest of the crate ever sees.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{IndexerError, Result};
use crate::exec::Invocation;
use crate::signing::KeyPair;

/// Name of the config file looked up in the working directory
pub const CONFIG_FILE: &str = "apk-indexer.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Output repository configuration
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Where built packages are picked up
    #[serde(default)]
    pub packages: PackagesConfig,

    /// Signing key material
    #[serde(default)]
    pub signing: SigningConfig,

    /// External tools
    #[serde(default)]
    pub tools: ToolsConfig,

    /// CI integration
    #[serde(default)]
    pub ci: CiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Public URL the repository will be served from
    #[serde(default)]
    pub url: Option<String>,

    /// Directory receiving `keys/` and `repo/`
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Remove packages left over from earlier runs
    #[serde(default)]
    pub prune: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".apk_test")
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            output_dir: default_output_dir(),
            prune: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Directory searched (recursively) for `.apk` files
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Key base name, e.g. `builder-65a1b2c3`
    #[serde(default)]
    pub key_name: Option<String>,

    /// PEM-encoded private key
    #[serde(default)]
    pub private_key: Option<String>,

    /// PEM-encoded public key
    #[serde(default)]
    pub public_key: Option<String>,
}

impl fmt::Debug for SigningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningConfig")
            .field("key_name", &self.key_name)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("public_key", &self.public_key)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Index generator (invoked as `{index} index ...`)
    #[serde(default = "default_index_tool")]
    pub index: String,

    /// Index signer
    #[serde(default = "default_sign_tool")]
    pub sign: String,

    /// Upper bound for a single tool invocation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts after a failed invocation
    #[serde(default)]
    pub retries: u32,
}

fn default_index_tool() -> String {
    "apk".to_string()
}

fn default_sign_tool() -> String {
    "abuild-sign".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            index: default_index_tool(),
            sign: default_sign_tool(),
            timeout_secs: default_timeout_secs(),
            retries: 0,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject settings no tool invocation could succeed with
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(IndexerError::InvalidConfig(
                "tools.timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn invocation(&self) -> Invocation {
        Invocation {
            retries: self.retries,
            timeout: self.timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CiConfig {
    /// File receiving `repo_path=...` (GitHub's `$GITHUB_OUTPUT`)
    #[serde(default)]
    pub github_output: Option<PathBuf>,

    /// Wrap phases in `::group::` markers
    #[serde(default)]
    pub github_groups: bool,
}

impl Config {
    /// Load configuration from file, or use defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try the working directory
            let local = PathBuf::from(CONFIG_FILE);
            if local.exists() {
                return Some(local);
            }

            // Try user config
            directories::ProjectDirs::from("org", "apk-indexer", "apk-indexer")
                .map(|d| d.config_dir().join(CONFIG_FILE))
                .filter(|p| p.exists())
        });

        match config_path {
            Some(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                tracing::debug!("Loaded config from {}", path.display());
                toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config: {}", path.display()))
            }
            None => Ok(Config::default()),
        }
    }

    /// Check that every required value is present and build [`Settings`]
    pub fn resolve(self) -> Result<Settings> {
        let repo_url = required(self.repository.url, "repository url (INPUT_ABUILD_REPO_URL)")?;
        let key_name = required(self.signing.key_name, "key name (INPUT_ABUILD_KEY_NAME)")?;
        let private_key =
            required(self.signing.private_key, "private key (INPUT_ABUILD_KEY_PRIV)")?;
        let public_key = required(self.signing.public_key, "public key (INPUT_ABUILD_KEY_PUB)")?;
        let pkgs_path = self
            .packages
            .path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(IndexerError::ConfigurationMissing(
                "packages path (INPUT_PKGS_PATH)",
            ))?;

        if key_name.contains('/') {
            return Err(IndexerError::InvalidConfig(format!(
                "key name must not contain '/': {}",
                key_name
            )));
        }
        self.tools.validate()?;
        if same_dir(&self.repository.output_dir, &pkgs_path) {
            return Err(IndexerError::InvalidConfig(format!(
                "output directory must differ from the packages path: {}",
                pkgs_path.display()
            )));
        }

        Ok(Settings {
            repo_url,
            pkgs_path,
            output_dir: self.repository.output_dir,
            keys: KeyPair::new(key_name, private_key.into_bytes(), public_key.into_bytes()),
            tools: self.tools,
            prune: self.repository.prune,
            github_output: self.ci.github_output,
            github_groups: self.ci.github_groups,
        })
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    let normalize = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    normalize(a) == normalize(b)
}

fn required(value: Option<String>, name: &'static str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(IndexerError::ConfigurationMissing(name))
}

/// Validated settings for one run
#[derive(Debug, Clone)]
pub struct Settings {
    pub repo_url: String,
    pub pkgs_path: PathBuf,
    pub output_dir: PathBuf,
    pub keys: KeyPair,
    pub tools: ToolsConfig,
    pub prune: bool,
    pub github_output: Option<PathBuf>,
    pub github_groups: bool,
}

impl Settings {
    /// Where the key pair is installed for signing
    pub fn keys_dir(&self) -> PathBuf {
        self.output_dir.join("keys")
    }

    /// Root of the published repository
    pub fn repo_dir(&self) -> PathBuf {
        self.output_dir.join("repo")
    }
}
