//! Defines [`RepoData`], the parsed form of a `repodata.json` file: the
//! index of all package archives available in one subdirectory of a channel.

use std::fmt::{Display, Formatter};
use std::path::Path;

use chrono::{DateTime, Utc};
use fxhash::FxHashMap;
use krait_digest::{Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};
use url::Url;

use crate::utils::serde::sort_map_alphabetically;
use crate::{BuildNumber, Channel, NoArchType, PackageName, RepoDataRecord, VersionWithSource};

/// The parsed contents of a `repodata.json` file.
#[derive(Debug, Default, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct RepoData {
    /// Information about the channel and subdirectory this index describes.
    pub info: Option<ChannelInfo>,

    /// The `.tar.bz2` package archives, keyed by filename.
    #[serde(default, serialize_with = "sort_map_alphabetically")]
    pub packages: FxHashMap<String, PackageRecord>,

    /// The `.conda` package archives, keyed by filename. They live under a
    /// different key for backwards compatibility with older conda versions.
    #[serde(
        default,
        rename = "packages.conda",
        serialize_with = "sort_map_alphabetically"
    )]
    pub conda_packages: FxHashMap<String, PackageRecord>,

    /// The version of the repodata format.
    #[serde(rename = "repodata_version")]
    pub version: Option<u64>,
}

/// The `info` key of a `repodata.json` file.
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone)]
pub struct ChannelInfo {
    /// The channel's subdirectory.
    pub subdir: String,

    /// The base url for all package urls, absolute or relative.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// A single record in the repodata: one binary distribution of a package.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Deserialize, Serialize, Eq, PartialEq, Clone, Hash)]
pub struct PackageRecord {
    /// Optionally the architecture the package supports.
    pub arch: Option<String>,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    pub build_number: BuildNumber,

    /// Additional constraints on packages: packages in `constrains` are not
    /// required to be installed, but when they are installed they must
    /// satisfy these specs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// Specification of packages this package depends on.
    #[serde(default)]
    pub depends: Vec<String>,

    /// A deprecated mechanism to specify feature sets for the solver.
    pub features: Option<String>,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family of the package.
    pub license_family: Option<String>,

    /// Optionally the MD5 hash of the package archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The name of the package.
    pub name: PackageName,

    /// If this package is platform independent, in what way.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// Optionally the platform the package supports. Note that this is a
    /// free-form string, not a [`crate::Platform`].
    pub platform: Option<String>,

    /// Optionally a path within the environment of the site-packages
    /// directory. Only present for python interpreter packages.
    pub python_site_packages_path: Option<String>,

    /// Optionally the SHA256 hash of the package archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,

    /// Opaque signature data as distributed by some channels.
    pub signatures: Option<serde_json::Value>,

    /// Optionally the size of the package archive in bytes.
    pub size: Option<u64>,

    /// The subdirectory (platform) where the package can be found.
    #[serde(default)]
    pub subdir: String,

    /// The date this entry was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Track features down-weight a package during solving: the more track
    /// features a candidate has, the less it is preferred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// The version of the package.
    pub version: VersionWithSource,
}

impl Display for PackageRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.build.is_empty() {
            write!(f, "{} {}", self.name.as_normalized(), self.version)
        } else {
            write!(
                f,
                "{}={}={}",
                self.name.as_normalized(),
                self.version,
                self.build
            )
        }
    }
}

impl AsRef<PackageRecord> for PackageRecord {
    fn as_ref(&self) -> &PackageRecord {
        self
    }
}

impl PackageRecord {
    /// A helper that constructs a `PackageRecord` with the bare minimum of
    /// values, everything else empty.
    pub fn new(
        name: PackageName,
        version: impl Into<VersionWithSource>,
        build: String,
    ) -> Self {
        Self {
            arch: None,
            build,
            build_number: 0,
            constrains: vec![],
            depends: vec![],
            features: None,
            license: None,
            license_family: None,
            md5: None,
            name,
            noarch: NoArchType::default(),
            platform: None,
            python_site_packages_path: None,
            sha256: None,
            signatures: None,
            size: None,
            subdir: crate::Platform::current().to_string(),
            timestamp: None,
            track_features: vec![],
            version: version.into(),
        }
    }

    /// Sorts the records topologically, dependencies before dependents.
    ///
    /// This function is deterministic: it returns the same result regardless
    /// of the input order of `records` and of the `depends` vectors inside
    /// the records. Only works for records with unique names.
    pub fn sort_topologically<T: AsRef<PackageRecord> + Clone>(records: Vec<T>) -> Vec<T> {
        crate::topological_sort::sort_topologically(records)
    }
}

impl RepoData {
    /// Parses [`RepoData`] from a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let contents = fs_err::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Returns the `base_url` specified in the repodata info, if any.
    pub fn base_url(&self) -> Option<&str> {
        self.info.as_ref().and_then(|i| i.base_url.as_deref())
    }

    /// Builds a list of [`RepoDataRecord`]s from the raw index, attaching
    /// the channel and download url of each record. The records come out
    /// sorted by filename so downstream consumers see a deterministic
    /// order regardless of the map iteration order.
    pub fn into_repo_data_records(self, channel: &Channel) -> Vec<RepoDataRecord> {
        let mut records = Vec::with_capacity(self.packages.len() + self.conda_packages.len());
        let channel_name = channel.canonical_name();
        let base_url = self.base_url().map(ToOwned::to_owned);

        for (filename, package_record) in self.packages.into_iter().chain(self.conda_packages) {
            records.push(RepoDataRecord {
                url: compute_package_url(
                    &channel.platform_url(&package_record.subdir),
                    base_url.as_deref(),
                    &filename,
                ),
                channel: channel_name.clone(),
                package_record,
                file_name: filename,
            });
        }
        records.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        records
    }
}

/// Computes the download url for a package archive from the subdir url, an
/// optional override base url from the repodata, and the archive filename.
pub fn compute_package_url(
    repo_data_base_url: &Url,
    base_url: Option<&str>,
    filename: &str,
) -> Url {
    let mut absolute_url = match base_url {
        None => repo_data_base_url.clone(),
        Some(base_url) => match Url::parse(base_url) {
            Ok(base_url) => base_url,
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let mut url = repo_data_base_url.clone();
                if base_url.starts_with('/') {
                    url.set_path(base_url);
                } else {
                    let path = url.path().trim_end_matches('/').to_owned();
                    url.set_path(&format!("{path}/{base_url}"));
                }
                url
            }
            Err(_) => repo_data_base_url.clone(),
        },
    };

    let path = absolute_url.path();
    if !path.ends_with('/') {
        absolute_url.set_path(&format!("{path}/"));
    }
    absolute_url
        .join(filename)
        .expect("failed to join base_url and filename")
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use url::Url;

    use super::{compute_package_url, RepoData};

    #[test]
    fn test_parse_repodata() {
        let repodata: RepoData = serde_json::from_str(
            r#"{
                "info": {"subdir": "linux-64"},
                "packages": {
                    "foo-1.0-0.tar.bz2": {
                        "name": "foo",
                        "version": "1.0",
                        "build": "0",
                        "build_number": 0,
                        "depends": ["bar >=2"],
                        "md5": "4ed4b435f2b57d36f9a2bd07a1637bfe",
                        "size": 1234,
                        "subdir": "linux-64",
                        "timestamp": 1633003580727
                    }
                },
                "packages.conda": {
                    "foo-1.1-0.conda": {
                        "name": "foo",
                        "version": "1.1",
                        "build": "0",
                        "build_number": 0,
                        "depends": [],
                        "subdir": "linux-64"
                    }
                },
                "repodata_version": 1
            }"#,
        )
        .unwrap();

        assert_eq!(repodata.packages.len(), 1);
        assert_eq!(repodata.conda_packages.len(), 1);
        let record = &repodata.packages["foo-1.0-0.tar.bz2"];
        assert_eq!(record.name.as_normalized(), "foo");
        assert_eq!(record.depends, vec!["bar >=2".to_owned()]);
        assert!(record.md5.is_some());
    }

    #[test]
    fn test_compute_package_url() {
        let subdir_url = Url::from_str("https://conda.anaconda.org/conda-forge/linux-64").unwrap();
        assert_eq!(
            compute_package_url(&subdir_url, None, "foo-1.0-0.conda").as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64/foo-1.0-0.conda"
        );
        assert_eq!(
            compute_package_url(&subdir_url, Some("https://mirror.example/ch/linux-64"), "foo-1.0-0.conda")
                .as_str(),
            "https://mirror.example/ch/linux-64/foo-1.0-0.conda"
        );
    }
}
