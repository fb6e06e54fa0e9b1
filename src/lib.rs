//! apk-indexer - build a signed APK repository from a directory of packages
//!
//! The pipeline, leaves first:
//! - [`archive`] reads the `.PKGINFO` record out of each package
//! - [`scanner`] finds packages and groups them by architecture
//! - [`signing`] installs the key pair and signs indexes
//! - [`repository`] lays out the tree, runs the indexer and writes listings
//! - [`indexer`] wires them together for one run

pub mod archive;
pub mod config;
pub mod error;
pub mod exec;
pub mod indexer;
pub mod package;
pub mod report;
pub mod repository;
pub mod scanner;
pub mod signing;

#[cfg(test)]
mod test_support;

pub use error::{IndexerError, Result};
