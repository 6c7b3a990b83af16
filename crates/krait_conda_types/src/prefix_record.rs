//! Defines the [`PrefixRecord`]: the conda-meta record of one installed
//! package.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use krait_digest::Sha256Hash;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use serde_with::serde_as;

use crate::package::FileMode;
use crate::{PackageRecord, RepoDataRecord};

/// Information about every file installed with a package.
///
/// This is similar to [`crate::package::PathsJson`], but where that type
/// describes how to install a package, this one records what was actually
/// installed into the prefix.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixPaths {
    /// The version of the file format.
    pub paths_version: u64,

    /// All paths installed for the package.
    #[serde(default)]
    pub paths: Vec<PathsEntry>,
}

impl Default for PrefixPaths {
    fn default() -> Self {
        Self {
            paths_version: 1,
            paths: Vec::default(),
        }
    }
}

impl From<Vec<PathsEntry>> for PrefixPaths {
    fn from(paths: Vec<PathsEntry>) -> Self {
        Self {
            paths,
            ..Default::default()
        }
    }
}

/// Information about a single installed file.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsEntry {
    /// The path relative to the root of the prefix.
    #[serde(rename = "_path")]
    pub relative_path: PathBuf,

    /// How the file was installed into the environment.
    pub path_type: PathType,

    /// Whether this file should not be linked.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub no_link: bool,

    /// The SHA256 hash of the file as it was in the package archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Hash>,

    /// The SHA256 hash of the file as it exists in the prefix. Differs from
    /// `sha256` when the prefix placeholder was substituted.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_in_prefix: Option<Sha256Hash>,

    /// The size of the file in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,

    /// The file mode used for prefix replacement.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<FileMode>,

    /// The placeholder that was substituted with the prefix, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_placeholder: Option<String>,
}

/// The type of an installed path. This is a superset of
/// [`crate::package::PathType`] with the entries that only exist after
/// installation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathType {
    /// The file was installed as a hard link into the package cache.
    #[serde(rename = "hardlink")]
    HardLink,

    /// The file was installed as a soft link.
    #[serde(rename = "softlink")]
    SoftLink,

    /// An empty directory created at installation time.
    Directory,

    /// A compiled bytecode file generated when linking a `noarch: python`
    /// package.
    PycFile,

    /// A generated python entry point script.
    UnixPythonEntryPoint,
}

impl From<crate::package::PathType> for PathType {
    fn from(ty: crate::package::PathType) -> Self {
        match ty {
            crate::package::PathType::HardLink => PathType::HardLink,
            crate::package::PathType::SoftLink => PathType::SoftLink,
            crate::package::PathType::Directory => PathType::Directory,
        }
    }
}

/// A record of a single package installed in a prefix, stored as
/// `<prefix>/conda-meta/<name>-<version>-<build>.json`.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct PrefixRecord {
    /// The repodata record this package was installed from.
    #[serde(flatten)]
    pub repodata_record: RepoDataRecord,

    /// The path where the package archive was stored on disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_tarball_full_path: Option<PathBuf>,

    /// The path of the extracted package contents in the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_package_dir: Option<PathBuf>,

    /// A sorted list of all files included in this package.
    #[serde(default)]
    pub files: Vec<PathBuf>,

    /// The authoritative path metadata of the installed files.
    #[serde(default)]
    pub paths_data: PrefixPaths,

    /// A reference to the cache location the package was linked from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,

    /// The spec that was requested when this package was installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_spec: Option<String>,
}

impl PrefixRecord {
    /// Creates a `PrefixRecord` from a [`RepoDataRecord`] and the recorded
    /// installation data.
    pub fn from_repodata_record(
        repodata_record: RepoDataRecord,
        package_tarball_full_path: Option<PathBuf>,
        extracted_package_dir: Option<PathBuf>,
        paths: Vec<PathsEntry>,
        requested_spec: Option<String>,
        link: Option<Link>,
    ) -> Self {
        let mut files: Vec<PathBuf> = paths
            .iter()
            .map(|entry| entry.relative_path.clone())
            .collect();
        files.sort();
        Self {
            repodata_record,
            package_tarball_full_path,
            extracted_package_dir,
            files,
            paths_data: paths.into(),
            link,
            requested_spec,
        }
    }

    /// Parses a prefix record from a reader.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, std::io::Error> {
        let mut str = String::new();
        reader.read_to_string(&mut str)?;
        Self::from_str(&str)
    }

    /// Parses a prefix record from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        Self::from_reader(fs_err::File::open(path.as_ref())?)
    }

    /// Returns the canonical file name for this record:
    /// `<name>-<version>-<build>.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}.json",
            self.repodata_record.package_record.name.as_normalized(),
            self.repodata_record.package_record.version,
            self.repodata_record.package_record.build
        )
    }

    /// Writes the record to the given path as pretty printed json.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> Result<(), std::io::Error> {
        let file = fs_err::File::create(path.as_ref())?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    /// Collects all prefix records from the `conda-meta` directory of the
    /// given prefix.
    pub fn collect_from_prefix(prefix: &Path) -> Result<Vec<PrefixRecord>, std::io::Error> {
        let conda_meta_path = prefix.join("conda-meta");
        if !conda_meta_path.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for entry in fs_err::read_dir(&conda_meta_path)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && entry.file_name().to_string_lossy().ends_with(".json")
            {
                records.push(Self::from_path(entry.path())?);
            }
        }
        Ok(records)
    }
}

impl FromStr for PrefixRecord {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map_err(Into::into)
    }
}

impl AsRef<RepoDataRecord> for PrefixRecord {
    fn as_ref(&self) -> &RepoDataRecord {
        &self.repodata_record
    }
}

impl AsRef<PackageRecord> for PrefixRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.repodata_record.package_record
    }
}

/// A reference to the cache location a package was linked from.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct Link {
    /// The path of the extracted package in the cache.
    pub source: PathBuf,

    /// The link type that was used to install the files.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<LinkType>,
}

/// The mechanism used to place files into the prefix.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize_repr, Deserialize_repr, Hash)]
#[repr(u8)]
pub enum LinkType {
    /// The file shares its inode with the cache copy.
    HardLink = 1,
    /// The file is a symbolic link to the cache copy.
    SoftLink = 2,
    /// The file is a full copy.
    Copy = 3,
    /// An (empty) directory.
    Directory = 4,
}
