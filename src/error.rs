//! Error types for apk-indexer

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for repository assembly
#[derive(Error, Debug)]
pub enum IndexerError {
    #[error("Cannot read {path} as a gzip tar archive: {reason}")]
    ArchiveUnreadable { path: PathBuf, reason: String },

    #[error("No .PKGINFO record in {0}")]
    MetadataMissing(PathBuf),

    #[error("Malformed .PKGINFO in {path}: {reason}")]
    MetadataMalformed { path: PathBuf, reason: String },

    #[error("Failed to copy {from} to {to}: {source}")]
    CopyFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Indexing {arch} failed:\n{output}")]
    IndexingFailed { arch: String, output: String },

    #[error("Signing {path} failed:\n{output}")]
    SigningFailed { path: PathBuf, output: String },

    #[error("{tool} did not finish within {secs}s{}", partial_output(.output))]
    ToolTimeout {
        tool: String,
        secs: u64,
        /// Whatever the tool printed before it was killed
        output: String,
    },

    #[error("Key generation failed:\n{output}")]
    KeyGenerationFailed { output: String },

    #[error("Missing required configuration: {0}")]
    ConfigurationMissing(&'static str),

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for apk-indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;

fn partial_output(output: &str) -> String {
    if output.is_empty() {
        String::new()
    } else {
        format!(":\n{}", output)
    }
}
