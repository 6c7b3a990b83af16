//! Explicit environment specs: text files listing the exact package archive
//! urls of an environment, as produced by `conda list --explicit`.
//!
//! The file carries an `@EXPLICIT` marker, an optional `# platform:` comment
//! and one url per line. A url may have a trailing `#<md5>` or
//! `#sha256:<hex>` fragment with the expected archive checksum. Installing
//! from such a file bypasses the solver entirely.

use std::path::Path;
use std::str::FromStr;

use krait_digest::{Md5Hash, Sha256Hash};
use thiserror::Error;
use url::Url;

use crate::Platform;

/// A parsed explicit environment spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitEnvironmentSpec {
    /// The platform the environment was created for, from the
    /// `# platform:` comment.
    pub platform: Option<Platform>,

    /// The package archives making up the environment.
    pub packages: Vec<ExplicitEnvironmentEntry>,
}

/// A single entry in an explicit environment spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitEnvironmentEntry {
    /// The url of the package archive, without the checksum fragment.
    pub url: Url,

    /// The expected checksum of the archive, from the url fragment.
    pub hash: Option<PackageArchiveHash>,
}

/// The checksum of a package archive as encoded in an explicit spec url
/// fragment: `#<md5 hex>` or `#sha256:<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageArchiveHash {
    /// An MD5 checksum.
    Md5(Md5Hash),

    /// A SHA256 checksum.
    Sha256(Sha256Hash),
}

/// An error that occurred while parsing an explicit environment spec.
#[derive(Debug, Error)]
pub enum ParseExplicitEnvironmentSpecError {
    /// The file is missing the `@EXPLICIT` marker.
    #[error("the file is missing the @EXPLICIT marker")]
    MissingExplicitTag,

    /// A line could not be parsed as a url.
    #[error("invalid url '{0}': {1}")]
    InvalidUrl(String, url::ParseError),

    /// A url fragment could not be parsed as a checksum.
    #[error("invalid checksum fragment '{0}'")]
    InvalidHash(String),

    /// The platform comment could not be parsed.
    #[error(transparent)]
    InvalidPlatform(#[from] crate::ParsePlatformError),

    /// An I/O error occurred while reading the file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl ExplicitEnvironmentSpec {
    /// Parses an explicit environment spec from a string.
    pub fn from_str(contents: &str) -> Result<Self, ParseExplicitEnvironmentSpecError> {
        let mut is_explicit = false;
        let mut platform = None;
        let mut packages = Vec::new();

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(platform_str) = line.strip_prefix("# platform:") {
                platform = Some(Platform::from_str(platform_str.trim())?);
                continue;
            }
            if line.starts_with('#') {
                continue;
            }
            if line.eq_ignore_ascii_case("@explicit") {
                is_explicit = true;
                continue;
            }
            if !is_explicit {
                return Err(ParseExplicitEnvironmentSpecError::MissingExplicitTag);
            }
            packages.push(line.parse()?);
        }

        if !is_explicit {
            return Err(ParseExplicitEnvironmentSpecError::MissingExplicitTag);
        }

        Ok(ExplicitEnvironmentSpec { platform, packages })
    }

    /// Parses an explicit environment spec from a file.
    pub fn from_path(path: &Path) -> Result<Self, ParseExplicitEnvironmentSpecError> {
        Self::from_str(&fs_err::read_to_string(path)?)
    }
}

impl FromStr for ExplicitEnvironmentEntry {
    type Err = ParseExplicitEnvironmentSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut url = Url::parse(s)
            .map_err(|e| ParseExplicitEnvironmentSpecError::InvalidUrl(s.to_owned(), e))?;

        let hash = match url.fragment() {
            None | Some("") => None,
            Some(fragment) => {
                let hash = if let Some(hex) = fragment.strip_prefix("sha256:") {
                    krait_digest::parse_digest_from_hex::<krait_digest::Sha256>(hex)
                        .map(PackageArchiveHash::Sha256)
                } else {
                    krait_digest::parse_digest_from_hex::<krait_digest::Md5>(fragment)
                        .map(PackageArchiveHash::Md5)
                };
                Some(hash.ok_or_else(|| {
                    ParseExplicitEnvironmentSpecError::InvalidHash(fragment.to_owned())
                })?)
            }
        };

        url.set_fragment(None);
        Ok(ExplicitEnvironmentEntry { url, hash })
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use crate::Platform;

    use super::{
        ExplicitEnvironmentSpec, PackageArchiveHash, ParseExplicitEnvironmentSpecError,
    };

    #[test]
    fn test_parse() {
        let spec = ExplicitEnvironmentSpec::from_str(
            "# This file may be used to create an environment using:\n\
             # platform: linux-64\n\
             @EXPLICIT\n\
             https://conda.anaconda.org/conda-forge/linux-64/tk-8.6.12-h27826a3_0.tar.bz2#5b8c42eb62e9fc961af70bdd6a26e168\n\
             https://conda.anaconda.org/conda-forge/linux-64/xz-5.2.6-h166bdaf_0.tar.bz2#sha256:03a6d28ded42af8a347345f82f3eebdd6807a08526d47899a42d62d319609162\n",
        )
        .unwrap();

        assert_eq!(spec.platform, Some(Platform::Linux64));
        assert_eq!(spec.packages.len(), 2);
        assert_matches!(
            spec.packages[0].hash,
            Some(PackageArchiveHash::Md5(_))
        );
        assert_matches!(
            spec.packages[1].hash,
            Some(PackageArchiveHash::Sha256(_))
        );
        assert!(spec.packages[0].url.fragment().is_none());
    }

    #[test]
    fn test_missing_marker() {
        assert_matches!(
            ExplicitEnvironmentSpec::from_str(
                "https://conda.anaconda.org/conda-forge/linux-64/tk-8.6.12-h27826a3_0.tar.bz2"
            ),
            Err(ParseExplicitEnvironmentSpecError::MissingExplicitTag)
        );
    }
}
