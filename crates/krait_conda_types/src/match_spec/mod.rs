//! Match specs: the query language for conda packages.

pub mod matcher;
pub mod parse;

use std::fmt::{Display, Formatter};

use krait_digest::{Md5Hash, Sha256Hash};
use serde::Serialize;
use serde_with::{serde_as, skip_serializing_none};
use url::Url;

use crate::{BuildNumber, PackageName, PackageRecord, RepoDataRecord, VersionSpec};
use matcher::StringMatcher;

pub use parse::ParseMatchSpecError;

/// A `MatchSpec` is a query over the fields of a [`PackageRecord`]. The
/// canonical string form is
///
/// ```text
/// (channel(/subdir)::)name(version_spec)(=build)[key1=value1,key2=value2]
/// ```
///
/// where every part except the name is optional. Any field that is not
/// specified matches everything.
#[skip_serializing_none]
#[serde_as]
#[derive(Debug, Default, Clone, Serialize, Eq, PartialEq, Hash)]
pub struct MatchSpec {
    /// The name of the package.
    pub name: Option<PackageName>,
    /// The version spec of the package (e.g. `1.2.3`, `>=1.2.3`, `1.2.*`).
    pub version: Option<VersionSpec>,
    /// The build string of the package (e.g. `py37_0`, `py37h6de7cb9_0`, `py*`).
    pub build: Option<StringMatcher>,
    /// The build number of the package.
    pub build_number: Option<BuildNumber>,
    /// Match the specific filename of the package.
    pub file_name: Option<String>,
    /// The channel of the package.
    pub channel: Option<String>,
    /// The subdir of the channel.
    pub subdir: Option<String>,
    /// The namespace of the package (currently unused).
    pub namespace: Option<String>,
    /// A direct url to the package archive. When set the spec is "explicit"
    /// and bypasses index lookups.
    pub url: Option<Url>,
    /// The md5 hash of the package archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,
    /// The sha256 hash of the package archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,
}

impl MatchSpec {
    /// Match this spec against a [`PackageRecord`]. Channel and subdir
    /// constraints are not checked here because a bare record does not know
    /// its channel; see [`MatchSpec::matches_record`].
    pub fn matches(&self, record: &PackageRecord) -> bool {
        if let Some(name) = self.name.as_ref() {
            if name != &record.name {
                return false;
            }
        }

        if let Some(spec) = self.version.as_ref() {
            if !spec.matches(&record.version) {
                return false;
            }
        }

        if let Some(build_string) = self.build.as_ref() {
            if !build_string.matches(&record.build) {
                return false;
            }
        }

        if let Some(build_number) = self.build_number {
            if build_number != record.build_number {
                return false;
            }
        }

        if let Some(md5_spec) = self.md5.as_ref() {
            if Some(md5_spec) != record.md5.as_ref() {
                return false;
            }
        }

        if let Some(sha256_spec) = self.sha256.as_ref() {
            if Some(sha256_spec) != record.sha256.as_ref() {
                return false;
            }
        }

        true
    }

    /// Match this spec against a [`RepoDataRecord`], including the channel,
    /// subdir, filename and url constraints.
    pub fn matches_record(&self, record: &RepoDataRecord) -> bool {
        if !self.matches(&record.package_record) {
            return false;
        }

        if let Some(channel) = self.channel.as_ref() {
            if channel != "*" && !record.channel.as_str().contains(channel.as_str()) {
                return false;
            }
        }

        if let Some(subdir) = self.subdir.as_ref() {
            if subdir != &record.package_record.subdir {
                return false;
            }
        }

        if let Some(file_name) = self.file_name.as_ref() {
            if file_name != &record.file_name {
                return false;
            }
        }

        if let Some(url) = self.url.as_ref() {
            if url != &record.url {
                return false;
            }
        }

        true
    }

    /// Returns true if this spec only matches a single, exactly identified
    /// package archive (it carries a direct url).
    pub fn is_explicit(&self) -> bool {
        self.url.is_some()
    }
}

impl Display for MatchSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(channel) = &self.channel {
            write!(f, "{channel}")?;
            if let Some(subdir) = &self.subdir {
                write!(f, "/{subdir}")?;
            }
            write!(f, "::")?;
        }

        match &self.name {
            Some(name) => write!(f, "{}", name.as_normalized())?,
            None => write!(f, "*")?,
        }

        if let Some(version) = &self.version {
            write!(f, " {version}")?;
        }

        if let Some(build) = &self.build {
            write!(f, " {build}")?;
        }

        let mut keys = Vec::new();
        if let Some(build_number) = self.build_number {
            keys.push(format!("build_number={build_number}"));
        }
        if let Some(file_name) = &self.file_name {
            keys.push(format!("fn=\"{file_name}\""));
        }
        if let Some(url) = &self.url {
            keys.push(format!("url=\"{url}\""));
        }
        if let Some(md5) = &self.md5 {
            keys.push(format!("md5={md5:x}"));
        }
        if let Some(sha256) = &self.sha256 {
            keys.push(format!("sha256={sha256:x}"));
        }
        if !keys.is_empty() {
            write!(f, "[{}]", keys.join(", "))?;
        }

        Ok(())
    }
}
