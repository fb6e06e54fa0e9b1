//! Reading metadata out of `.apk` package files
//!
//! An APK v2 package is a concatenation of gzip members (optional
//! signature, control, data), which together form one tar stream. The
//! control segment carries a `.PKGINFO` record describing the package.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{IndexerError, Result};
use crate::package::PackageDescriptor;

/// Name of the metadata entry inside the control segment
pub const PKGINFO_ENTRY: &str = ".PKGINFO";

/// Extract the package descriptor from the `.apk` at `path`.
///
/// Reading stops as soon as the `.PKGINFO` entry has been parsed, so the
/// data segment of large packages is never decompressed.
pub fn extract(path: &Path) -> Result<PackageDescriptor> {
    let unreadable = |reason: String| IndexerError::ArchiveUnreadable {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|e| unreadable(e.to_string()))?;
    let mut archive = tar::Archive::new(MultiGzDecoder::new(BufReader::new(file)));
    archive.set_ignore_zeros(true);

    let entries = archive.entries().map_err(|e| unreadable(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| unreadable(e.to_string()))?;
        let is_pkginfo = entry
            .path()
            .map(|p| {
                let p: &Path = &p;
                p.strip_prefix("./").unwrap_or(p) == Path::new(PKGINFO_ENTRY)
            })
            .unwrap_or(false);
        if !is_pkginfo {
            continue;
        }

        let mut raw = Vec::new();
        entry
            .read_to_end(&mut raw)
            .map_err(|e| unreadable(e.to_string()))?;
        let text = String::from_utf8(raw).map_err(|_| IndexerError::MetadataMalformed {
            path: path.to_path_buf(),
            reason: "record is not valid UTF-8".to_string(),
        })?;

        let descriptor = PackageDescriptor::parse_pkginfo(&text).map_err(|reason| {
            IndexerError::MetadataMalformed {
                path: path.to_path_buf(),
                reason,
            }
        })?;
        tracing::debug!(
            "Read {} {} ({}) from {}",
            descriptor.name,
            descriptor.version,
            descriptor.architecture,
            path.display()
        );
        return Ok(descriptor);
    }

    Err(IndexerError::MetadataMissing(path.to_path_buf()))
}
