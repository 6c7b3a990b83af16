//! The environment lockfile format: a YAML document pinning every package of
//! an environment to an exact archive url and checksum.

use std::path::Path;

use krait_digest::{Md5Hash, Sha256Hash};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, skip_serializing_none};
use thiserror::Error;
use url::Url;

use crate::Platform;

/// A parsed environment lockfile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CondaLock {
    /// The locked packages of the environment.
    #[serde(default)]
    pub package: Vec<LockedDependency>,
}

/// One locked package of an environment.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockedDependency {
    /// The name of the package.
    pub name: String,

    /// The exact version of the package.
    pub version: String,

    /// The url the package archive is downloaded from.
    pub url: Url,

    /// The checksums of the package archive.
    #[serde(default)]
    pub hash: LockedHash,

    /// The category of the dependency (e.g. `main`, `dev`).
    pub category: Option<String>,

    /// The package manager that handles this package.
    pub manager: PackageManager,

    /// The platform this package is locked for.
    pub platform: Platform,
}

/// The checksums recorded for a locked package.
#[serde_as]
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockedHash {
    /// The MD5 checksum of the archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Md5>>")]
    pub md5: Option<Md5Hash>,

    /// The SHA256 checksum of the archive.
    #[serde_as(as = "Option<krait_digest::serde::SerializableHash<krait_digest::Sha256>>")]
    pub sha256: Option<Sha256Hash>,
}

/// The package manager a locked dependency belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageManager {
    /// A conda package.
    Conda,

    /// A pip installed package.
    Pip,
}

/// An error that occurred while reading or writing a lockfile.
#[derive(Debug, Error)]
pub enum CondaLockError {
    /// An I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The lockfile could not be parsed or serialized.
    #[error("failed to parse lockfile: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

impl CondaLock {
    /// Parses a lockfile from a file on disk.
    pub fn from_path(path: &Path) -> Result<Self, CondaLockError> {
        let contents = fs_err::read_to_string(path)?;
        Ok(serde_yaml::from_str(&contents)?)
    }

    /// Writes the lockfile to the given path.
    pub fn to_path(&self, path: &Path) -> Result<(), CondaLockError> {
        let contents = serde_yaml::to_string(self)?;
        fs_err::write(path, contents)?;
        Ok(())
    }

    /// Returns the conda packages locked for the given platform.
    pub fn packages_for_platform(
        &self,
        platform: Platform,
    ) -> impl Iterator<Item = &LockedDependency> {
        self.package.iter().filter(move |package| {
            package.platform == platform && package.manager == PackageManager::Conda
        })
    }
}

#[cfg(test)]
mod test {
    use crate::Platform;

    use super::{CondaLock, PackageManager};

    #[test]
    fn test_parse() {
        let lock: CondaLock = serde_yaml::from_str(
            r#"
package:
- name: python
  version: 3.11.0
  url: https://conda.anaconda.org/conda-forge/linux-64/python-3.11.0-h10a6764_1_cpython.conda
  hash:
    md5: 4ed4b435f2b57d36f9a2bd07a1637bfe
    sha256: 01ba4719c80b6fe911b091a7c05124b64eeece964e09c058ef8f9805daca546b
  category: main
  manager: conda
  platform: linux-64
- name: requests
  version: 2.28.2
  url: https://pypi.org/packages/requests-2.28.2.tar.gz
  manager: pip
  platform: linux-64
"#,
        )
        .unwrap();

        assert_eq!(lock.package.len(), 2);
        assert_eq!(lock.package[0].manager, PackageManager::Conda);
        assert!(lock.package[0].hash.md5.is_some());
        assert_eq!(
            lock.packages_for_platform(Platform::Linux64).count(),
            1
        );
    }

    #[test]
    fn test_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("conda-lock.yml");

        let lock: CondaLock = serde_yaml::from_str(
            r#"
package:
- name: xz
  version: 5.2.6
  url: https://conda.anaconda.org/conda-forge/linux-64/xz-5.2.6-h166bdaf_0.tar.bz2
  hash:
    md5: 4ed4b435f2b57d36f9a2bd07a1637bfe
  category: main
  manager: conda
  platform: linux-64
"#,
        )
        .unwrap();

        lock.to_path(&path).unwrap();
        let reparsed = CondaLock::from_path(&path).unwrap();
        assert_eq!(lock, reparsed);
    }
}
