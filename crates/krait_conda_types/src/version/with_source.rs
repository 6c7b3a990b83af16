use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    ops::Deref,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ParseVersionError, Version};

/// Holds a [`Version`] together with the string it was parsed from.
///
/// Conda version strings are not canonical (`1.1.0` and `1.1` parse to equal
/// versions, `1.01` to the same version as `1.1`), but repodata records and
/// conda-meta files must round-trip byte-for-byte. This type behaves exactly
/// like [`Version`] for comparison and hashing but remembers and reproduces
/// the verbatim source on display and serialization.
#[derive(Debug, Clone)]
pub struct VersionWithSource {
    version: Version,
    source: Option<Box<str>>,
}

impl VersionWithSource {
    /// Constructs a new instance from a [`Version`] and the source string it
    /// was parsed from.
    pub fn new(version: Version, source: impl Into<String>) -> Self {
        Self {
            version,
            source: Some(source.into().into_boxed_str()),
        }
    }

    /// Returns the [`Version`].
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Returns the string this version was created from, or the canonical
    /// form if it was constructed from a bare [`Version`].
    pub fn as_str(&self) -> String {
        match &self.source {
            Some(source) => source.to_string(),
            None => self.version.to_string(),
        }
    }

    /// Converts this instance back into a bare [`Version`].
    pub fn into_version(self) -> Version {
        self.version
    }
}

impl PartialEq for VersionWithSource {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
    }
}

impl Eq for VersionWithSource {}

impl PartialOrd for VersionWithSource {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionWithSource {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version.cmp(&other.version)
    }
}

impl Hash for VersionWithSource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
    }
}

impl Deref for VersionWithSource {
    type Target = Version;

    fn deref(&self) -> &Self::Target {
        &self.version
    }
}

impl AsRef<Version> for VersionWithSource {
    fn as_ref(&self) -> &Version {
        &self.version
    }
}

impl From<Version> for VersionWithSource {
    fn from(version: Version) -> Self {
        Self {
            version,
            source: None,
        }
    }
}

impl From<VersionWithSource> for Version {
    fn from(version: VersionWithSource) -> Self {
        version.version
    }
}

impl FromStr for VersionWithSource {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            version: Version::from_str(s)?,
            source: Some(s.to_owned().into_boxed_str()),
        })
    }
}

impl Display for VersionWithSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{source}"),
            None => write!(f, "{}", self.version),
        }
    }
}

impl Serialize for VersionWithSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VersionWithSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = std::borrow::Cow::<str>::deserialize(deserializer)?;
        Self::from_str(&source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::VersionWithSource;

    #[test]
    fn test_preserves_source() {
        let version = VersionWithSource::from_str("1.01.0").unwrap();
        assert_eq!(version.to_string(), "1.01.0");
        assert_eq!(
            serde_json::to_string(&version).unwrap(),
            "\"1.01.0\""
        );

        let other = VersionWithSource::from_str("1.1").unwrap();
        assert_eq!(version, other);
    }
}
