//! Package types parsed from built `.apk` artifacts

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// Keys of the `.PKGINFO` record that every package must carry
const REQUIRED_KEYS: [&str; 9] = [
    "pkgname",
    "pkgver",
    "arch",
    "size",
    "pkgdesc",
    "url",
    "maintainer",
    "license",
    "datahash",
];

/// Metadata of a single package, as recorded in its `.PKGINFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Package name (`pkgname`)
    pub name: String,

    /// Version string including the release suffix (`pkgver`)
    pub version: String,

    /// Target architecture (`arch`)
    pub architecture: String,

    /// Installed size in bytes (`size`)
    pub size: u64,

    /// Short description (`pkgdesc`)
    pub description: String,

    /// Upstream homepage (`url`)
    pub url: String,

    /// Package maintainer (`maintainer`)
    pub maintainer: String,

    /// License expression (`license`)
    pub license: String,

    /// Hash of the data section (`datahash`)
    pub content_hash: String,
}

impl PackageDescriptor {
    /// Parse the text of a `.PKGINFO` record.
    ///
    /// The record is a flat list of `key = value` lines. Blank lines and
    /// `#` comments are skipped. Keys such as `depend` may repeat; for the
    /// keys we care about the first occurrence is used. Unknown keys are
    /// ignored. The error string names the offending key.
    pub fn parse_pkginfo(text: &str) -> Result<Self, String> {
        let mut fields: HashMap<&str, &str> = HashMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| format!("line {}: expected `key = value`", lineno + 1))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("line {}: empty key", lineno + 1));
            }
            fields.entry(key).or_insert_with(|| value.trim());
        }

        if let Some(missing) = REQUIRED_KEYS.iter().find(|k| !fields.contains_key(*k)) {
            return Err(format!("missing required key `{}`", missing));
        }

        let field = |key: &str| fields[key].to_string();

        let size = fields["size"]
            .parse::<u64>()
            .map_err(|_| format!("`size` is not a non-negative integer: {:?}", fields["size"]))?;

        let descriptor = Self {
            name: field("pkgname"),
            version: field("pkgver"),
            architecture: field("arch"),
            size,
            description: field("pkgdesc"),
            url: field("url"),
            maintainer: field("maintainer"),
            license: field("license"),
            content_hash: field("datahash"),
        };

        for (key, value) in [
            ("pkgname", &descriptor.name),
            ("pkgver", &descriptor.version),
            ("arch", &descriptor.architecture),
        ] {
            if value.is_empty() {
                return Err(format!("`{}` is empty", key));
            }
            if !is_plain_name(value) {
                return Err(format!("`{}` is not a plain file name: {:?}", key, value));
            }
        }

        Ok(descriptor)
    }

    /// Render the descriptor back into `.PKGINFO` form
    pub fn to_pkginfo(&self) -> String {
        let mut out = String::from("# Generated by apk-indexer\n");
        for (key, value) in [
            ("pkgname", self.name.as_str()),
            ("pkgver", self.version.as_str()),
            ("pkgdesc", self.description.as_str()),
            ("url", self.url.as_str()),
            ("arch", self.architecture.as_str()),
            ("license", self.license.as_str()),
            ("maintainer", self.maintainer.as_str()),
            ("datahash", self.content_hash.as_str()),
        ] {
            let _ = writeln!(out, "{} = {}", key, value);
        }
        let _ = writeln!(out, "size = {}", self.size);
        out
    }

    /// Canonical file name inside the repository
    pub fn filename(&self) -> String {
        format!("{}-{}.apk", self.name, self.version)
    }
}

/// True if `value` is exactly one normal path component (no `/`, `.` or `..`)
fn is_plain_name(value: &str) -> bool {
    let mut components = Path::new(value).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !value.contains(['/', '\\'])
}

/// A package file found on disk together with its metadata
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    /// Where the artifact was discovered
    pub path: PathBuf,

    /// Parsed metadata
    pub descriptor: PackageDescriptor,
}

impl SourceArtifact {
    /// File name of the artifact as discovered (not the canonical name)
    pub fn source_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
