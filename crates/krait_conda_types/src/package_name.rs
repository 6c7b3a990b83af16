use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// The name of a package.
///
/// Package names are matched case-insensitively in the conda ecosystem; the
/// normalized (lowercase) form is used for comparison and hashing while the
/// source form is kept for display and serialization.
#[derive(Debug, Clone)]
pub struct PackageName {
    normalized: Option<String>,
    source: String,
}

/// An error that occurred when validating a package name.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParsePackageNameError {
    /// The package name was empty.
    #[error("package name was empty")]
    Empty,

    /// The package name contained an illegal character.
    #[error("'{0}' is not allowed in a package name")]
    InvalidCharacter(char),
}

impl PackageName {
    /// Constructs a new `PackageName` without checking the validity of the
    /// name. Use this only for names that are known to be valid.
    pub fn new_unchecked<S: Into<String>>(source: S) -> Self {
        let source = source.into();
        let normalized = if source.chars().any(|c| c.is_ascii_uppercase()) {
            Some(source.to_ascii_lowercase())
        } else {
            None
        };
        Self { normalized, source }
    }

    /// Returns the source representation of the package name.
    pub fn as_source(&self) -> &str {
        &self.source
    }

    /// Returns the normalized (lowercase) form of the package name.
    pub fn as_normalized(&self) -> &str {
        self.normalized.as_deref().unwrap_or(&self.source)
    }
}

impl FromStr for PackageName {
    type Err = ParsePackageNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParsePackageNameError::Empty);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(ParsePackageNameError::InvalidCharacter(c));
        }
        Ok(Self::new_unchecked(s))
    }
}

impl TryFrom<&str> for PackageName {
    type Error = ParsePackageNameError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.as_normalized() == other.as_normalized()
    }
}

impl Eq for PackageName {}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_normalized().cmp(other.as_normalized())
    }
}

impl Hash for PackageName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_normalized().hash(state);
    }
}

impl Display for PackageName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_source())
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = std::borrow::Cow::<str>::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::{PackageName, ParsePackageNameError};

    #[test]
    fn test_normalization() {
        let name = PackageName::from_str("PyTest").unwrap();
        assert_eq!(name.as_source(), "PyTest");
        assert_eq!(name.as_normalized(), "pytest");
        assert_eq!(name, PackageName::from_str("pytest").unwrap());
    }

    #[test]
    fn test_invalid() {
        assert_eq!(
            PackageName::from_str(""),
            Err(ParsePackageNameError::Empty)
        );
        assert_eq!(
            PackageName::from_str("a b"),
            Err(ParsePackageNameError::InvalidCharacter(' '))
        );
    }
}
