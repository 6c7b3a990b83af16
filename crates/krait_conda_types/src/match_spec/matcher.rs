use std::{
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A matcher for string fields of a package record, used for build strings.
///
/// Three syntaxes are understood:
/// * a string without wildcards matches exactly,
/// * a string with `*` wildcards is interpreted as a glob,
/// * a string wrapped in `^...$` is interpreted as a regular expression.
#[derive(Debug, Clone)]
pub enum StringMatcher {
    /// The string must match exactly.
    Exact(String),

    /// The string must match the glob pattern.
    Glob {
        /// The original glob pattern.
        source: String,
        /// The compiled pattern.
        regex: regex::Regex,
    },

    /// The string must match the regular expression.
    Regex {
        /// The original `^...$` pattern.
        source: String,
        /// The compiled pattern.
        regex: regex::Regex,
    },
}

/// An error that occurred when parsing a [`StringMatcher`].
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum StringMatcherParseError {
    /// The pattern could not be compiled.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

impl StringMatcher {
    /// Returns true if the given string matches.
    pub fn matches(&self, other: &str) -> bool {
        match self {
            StringMatcher::Exact(string) => string == other,
            StringMatcher::Glob { regex, .. } | StringMatcher::Regex { regex, .. } => {
                regex.is_match(other)
            }
        }
    }

    /// Returns the original source string of the matcher.
    pub fn as_source(&self) -> &str {
        match self {
            StringMatcher::Exact(source) => source,
            StringMatcher::Glob { source, .. } | StringMatcher::Regex { source, .. } => source,
        }
    }
}

impl FromStr for StringMatcher {
    type Err = StringMatcherParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('^') && s.ends_with('$') {
            let regex = regex::Regex::new(s)
                .map_err(|e| StringMatcherParseError::InvalidPattern(e.to_string()))?;
            Ok(StringMatcher::Regex {
                source: s.to_owned(),
                regex,
            })
        } else if s.contains('*') {
            let pattern = format!("^{}$", regex::escape(s).replace("\\*", ".*"));
            let regex = regex::Regex::new(&pattern)
                .map_err(|e| StringMatcherParseError::InvalidPattern(e.to_string()))?;
            Ok(StringMatcher::Glob {
                source: s.to_owned(),
                regex,
            })
        } else {
            Ok(StringMatcher::Exact(s.to_owned()))
        }
    }
}

impl PartialEq for StringMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.as_source() == other.as_source()
    }
}

impl Eq for StringMatcher {}

impl Hash for StringMatcher {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_source().hash(state);
    }
}

impl Display for StringMatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_source())
    }
}

impl Serialize for StringMatcher {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_source().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StringMatcher {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let str = std::borrow::Cow::<str>::deserialize(deserializer)?;
        str.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::StringMatcher;

    #[test]
    fn test_exact() {
        let matcher = StringMatcher::from_str("py38h12345_0").unwrap();
        assert!(matcher.matches("py38h12345_0"));
        assert!(!matcher.matches("py38h12345_1"));
    }

    #[test]
    fn test_glob() {
        let matcher = StringMatcher::from_str("py38*").unwrap();
        assert!(matcher.matches("py38h12345_0"));
        assert!(!matcher.matches("py39h12345_0"));

        let matcher = StringMatcher::from_str("*_cpython").unwrap();
        assert!(matcher.matches("3.8.5_cpython"));
        assert!(!matcher.matches("3.8.5_pypy"));
    }

    #[test]
    fn test_regex() {
        let matcher = StringMatcher::from_str("^py3[89]$").unwrap();
        assert!(matcher.matches("py38"));
        assert!(matcher.matches("py39"));
        assert!(!matcher.matches("py37"));
    }
}
