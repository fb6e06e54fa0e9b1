//! Repository signing keys
//!
//! The key pair is generated once, outside of a build run (see
//! [`generate_with_abuild`]), and handed to every run through configuration.
//! A run installs it next to the repository and signs each architecture's
//! index with `abuild-sign`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::error::{IndexerError, Result};
use crate::exec::{CommandRunner, Invocation, ToolCommand};

/// An RSA key pair in the format abuild expects
#[derive(Clone)]
pub struct KeyPair {
    /// Base name, e.g. `builder-65a1b2c3`
    pub name: String,
    pub private_key: Zeroizing<Vec<u8>>,
    pub public_key: Vec<u8>,
}

impl KeyPair {
    pub fn new(name: impl Into<String>, private_key: Vec<u8>, public_key: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            private_key: Zeroizing::new(private_key),
            public_key,
        }
    }

    pub fn private_key_name(&self) -> String {
        format!("{}.rsa", self.name)
    }

    pub fn public_key_name(&self) -> String {
        format!("{}.rsa.pub", self.name)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("name", &self.name)
            .field("private_key", &"<redacted>")
            .field("public_key_len", &self.public_key.len())
            .finish()
    }
}

/// Installs the key pair and signs files with it
pub struct KeyManager {
    keys: KeyPair,
    runner: Arc<dyn CommandRunner>,
    sign_tool: String,
    invocation: Invocation,
    installed_in: Option<PathBuf>,
}

impl KeyManager {
    pub fn new(
        keys: KeyPair,
        runner: Arc<dyn CommandRunner>,
        sign_tool: impl Into<String>,
        invocation: Invocation,
    ) -> Self {
        Self {
            keys,
            runner,
            sign_tool: sign_tool.into(),
            invocation,
            installed_in: None,
        }
    }

    pub fn public_key_name(&self) -> String {
        self.keys.public_key_name()
    }

    /// Path of the installed private key, if [`install`](Self::install) ran
    pub fn private_key_path(&self) -> Option<PathBuf> {
        self.installed_in
            .as_ref()
            .map(|dir| dir.join(self.keys.private_key_name()))
    }

    /// Write both keys into `dest`, creating it if needed.
    ///
    /// Running this again overwrites the files with the same bytes.
    pub fn install(&mut self, dest: &Path) -> Result<()> {
        tracing::info!("Installing keys to {}", dest.display());
        fs::create_dir_all(dest)?;
        self.install_private_key(dest)?;
        self.install_public_key(dest)?;
        self.installed_in = Some(dest.to_path_buf());
        Ok(())
    }

    fn install_private_key(&self, dest: &Path) -> Result<PathBuf> {
        let path = dest.join(self.keys.private_key_name());
        tracing::debug!("Installing private key to {}", path.display());

        #[cfg(unix)]
        {
            use std::io::Write;
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(&self.keys.private_key)?;
            // mode() only applies when the file is created
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, &*self.keys.private_key)?;
        }

        Ok(path)
    }

    /// Write the public key into `dest` under its canonical name
    pub fn install_public_key(&self, dest: &Path) -> Result<PathBuf> {
        let path = dest.join(self.keys.public_key_name());
        tracing::debug!("Installing public key to {}", path.display());
        fs::write(&path, &self.keys.public_key)?;
        Ok(path)
    }

    /// Sign `target` in place with the installed private key
    pub fn sign(&self, target: &Path) -> Result<()> {
        let key_path = self.private_key_path().ok_or_else(|| IndexerError::SigningFailed {
            path: target.to_path_buf(),
            output: "signing keys have not been installed".to_string(),
        })?;

        let cmd = ToolCommand::new(&self.sign_tool)
            .arg("-k")
            .arg(&key_path)
            .arg(target);

        tracing::info!("Signing {}", target.display());
        self.invocation
            .run(&*self.runner, &cmd, |output| IndexerError::SigningFailed {
                path: target.to_path_buf(),
                output,
            })?;
        Ok(())
    }
}

/// Create a fresh key pair with `abuild-keygen`.
///
/// abuild-keygen writes into `$HOME/.abuild`; `home` is used in place of
/// the real home directory and the generated files are removed afterwards.
pub fn generate_with_abuild(
    runner: &dyn CommandRunner,
    invocation: Invocation,
    packager: &str,
    home: &Path,
) -> Result<KeyPair> {
    let cmd = ToolCommand::new("abuild-keygen")
        .arg("-n")
        .env("HOME", home)
        .env("PACKAGER", packager);
    invocation.run(runner, &cmd, |output| IndexerError::KeyGenerationFailed { output })?;

    let abuild_dir = home.join(".abuild");
    let mut private_keys = Vec::new();
    for entry in fs::read_dir(&abuild_dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "rsa").unwrap_or(false) {
            private_keys.push(path);
        }
    }
    private_keys.sort();

    let private_path =
        private_keys
            .into_iter()
            .next()
            .ok_or_else(|| IndexerError::KeyGenerationFailed {
                output: format!("no private key was written to {}", abuild_dir.display()),
            })?;
    let name = private_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let public_path = abuild_dir.join(format!("{}.rsa.pub", name));

    let private_key = fs::read(&private_path)?;
    let public_key = fs::read(&public_path)?;

    fs::remove_file(&private_path)?;
    fs::remove_file(&public_path)?;
    let _ = fs::remove_dir(&abuild_dir);

    Ok(KeyPair::new(name, private_key, public_key))
}
