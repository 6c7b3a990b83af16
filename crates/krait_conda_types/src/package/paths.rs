use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use krait_digest::Sha256Hash;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// The `info/paths.json` file of a package archive: the authoritative
/// description of every file the package installs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsJson {
    /// The version of the file format.
    pub paths_version: u64,

    /// All entries included in the package.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl PathsJson {
    /// Reads the `info/paths.json` file from an extracted package directory.
    pub fn from_package_directory(package_dir: &Path) -> Result<Self, std::io::Error> {
        let path = package_dir.join("info/paths.json");
        let contents = fs_err::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Reconstructs a `PathsJson` from the deprecated `info/files` and
    /// `info/has_prefix` files found in very old package archives.
    pub fn from_deprecated_package_directory(package_dir: &Path) -> Result<Self, std::io::Error> {
        let files = fs_err::read_to_string(package_dir.join("info/files"))?;

        // `has_prefix` lines are either `<placeholder> <mode> <path>` or just
        // `<path>`.
        let mut prefix_entries = std::collections::HashMap::new();
        match fs_err::read_to_string(package_dir.join("info/has_prefix")) {
            Ok(has_prefix) => {
                for line in has_prefix.lines().filter(|line| !line.trim().is_empty()) {
                    let mut parts = line.splitn(3, ' ');
                    match (parts.next(), parts.next(), parts.next()) {
                        (Some(placeholder), Some(mode), Some(path)) => {
                            let file_mode = match mode {
                                "binary" => FileMode::Binary,
                                _ => FileMode::Text,
                            };
                            prefix_entries.insert(
                                PathBuf::from(path.trim_matches('"')),
                                (placeholder.trim_matches('"').to_owned(), file_mode),
                            );
                        }
                        (Some(path), None, None) => {
                            prefix_entries.insert(
                                PathBuf::from(path.trim_matches('"')),
                                (default_prefix_placeholder(), FileMode::Text),
                            );
                        }
                        _ => {}
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut paths = Vec::new();
        for line in files.lines().filter(|line| !line.trim().is_empty()) {
            let relative_path = PathBuf::from(line.trim());
            let full_path = package_dir.join(&relative_path);
            let path_type = match full_path.symlink_metadata() {
                Ok(metadata) if metadata.is_symlink() => PathType::SoftLink,
                Ok(metadata) if metadata.is_dir() => PathType::Directory,
                _ => PathType::HardLink,
            };
            let (prefix_placeholder, file_mode) = match prefix_entries.remove(&relative_path) {
                Some((placeholder, mode)) => (Some(placeholder), Some(mode)),
                None => (None, None),
            };
            paths.push(PathsEntry {
                relative_path,
                path_type,
                prefix_placeholder,
                file_mode,
                no_link: false,
                sha256: None,
                size_in_bytes: None,
            });
        }

        Ok(Self {
            paths_version: 1,
            paths,
        })
    }

    /// Reads the `info/paths.json` file, falling back to reconstruction from
    /// the deprecated files if it is missing.
    pub fn from_package_directory_with_deprecated_fallback(
        package_dir: &Path,
    ) -> Result<Self, std::io::Error> {
        match Self::from_package_directory(package_dir) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Self::from_deprecated_package_directory(package_dir)
            }
            result => result,
        }
    }
}

/// The default placeholder conda-build used before `paths.json` recorded the
/// placeholder per file.
fn default_prefix_placeholder() -> String {
    "/opt/anaconda1anaconda2anaconda3".to_owned()
}

/// A single entry in the `info/paths.json` file.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsEntry {
    /// The relative path from the root of the package.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file should be installed into the environment.
    #[serde(default = "default_path_type")]
    pub path_type: PathType,

    /// The placeholder prefix used in the file. When set, occurrences of it
    /// are replaced with the installation prefix while linking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,

    /// How the prefix is embedded in the file: plain text or a null padded
    /// binary c-string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// Whether this file should be linked or copied.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The SHA256 hash of the file contents.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

fn default_path_type() -> PathType {
    PathType::HardLink
}

/// How a file is embedded in the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileMode {
    /// The file contains the placeholder as readable text.
    Text,

    /// The file contains the placeholder as a null terminated c-string.
    Binary,
}

/// The type of a path entry in a package archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file can be hard linked from the cache into the environment.
    #[serde(rename = "hardlink")]
    HardLink,

    /// The file is a soft link to somewhere else in the package.
    #[serde(rename = "softlink")]
    SoftLink,

    /// An empty directory.
    Directory,
}
