use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none, OneOrMany};

use crate::{NoArchType, PackageName, VersionWithSource};

/// The `info/index.json` file of a package archive: the record of the
/// package itself, without the channel context.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJson {
    /// The lowercase name of the package.
    pub name: PackageName,

    /// The version of the package.
    pub version: VersionWithSource,

    /// The build string of the package.
    pub build: String,

    /// The build number of the package.
    #[serde(default)]
    pub build_number: u64,

    /// The package dependencies.
    #[serde(default)]
    pub depends: Vec<String>,

    /// The package constraints on other packages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constrains: Vec<String>,

    /// The architecture the package is built for.
    pub arch: Option<String>,

    /// The platform the package is built for.
    pub platform: Option<String>,

    /// The subdirectory this package belongs in.
    pub subdir: Option<String>,

    /// If the package is platform independent, in what way.
    #[serde(default, skip_serializing_if = "NoArchType::is_none")]
    pub noarch: NoArchType,

    /// The license of the package.
    pub license: Option<String>,

    /// The license family of the package.
    pub license_family: Option<String>,

    /// The timestamp when this package was created.
    #[serde_as(as = "Option<crate::utils::serde::Timestamp>")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Track features are used to down-weight packages during solving.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub track_features: Vec<String>,

    /// Optionally a path within the environment of the site-packages
    /// directory. Only present for python interpreter packages.
    pub python_site_packages_path: Option<String>,
}

impl IndexJson {
    /// Reads the `info/index.json` file from an extracted package directory.
    pub fn from_package_directory(package_dir: &Path) -> Result<Self, std::io::Error> {
        let path = package_dir.join("info/index.json");
        let contents = fs_err::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod test {
    use super::IndexJson;

    #[test]
    fn test_parse() {
        let index: IndexJson = serde_json::from_str(
            r#"{
                "name": "libsqlite",
                "version": "3.40.0",
                "build": "hcfcfb64_0",
                "build_number": 0,
                "depends": ["ucrt >=10.0.20348.0"],
                "license": "Unlicense",
                "subdir": "win-64",
                "timestamp": 1668697005718
            }"#,
        )
        .unwrap();
        assert_eq!(index.name.as_normalized(), "libsqlite");
        assert_eq!(index.build, "hcfcfb64_0");
        assert_eq!(index.depends.len(), 1);
    }
}
