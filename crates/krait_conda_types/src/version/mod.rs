//! Conda version numbers and their total order.
//!
//! Version strings contain alphanumeric characters separated into segments by
//! dots, dashes and underscores. An optional epoch (`1!2.0`) precedes the
//! version, an optional local version (`1.2+3.4`) follows it. Each segment is
//! split into runs of numerals and identifiers; a segment that starts with an
//! identifier gets an implicit leading zero so that `1.1.a1 == 1.1.0a1`.
//!
//! The resulting component lists are compared lexicographically:
//!
//! * numerals compare numerically,
//! * identifiers compare lexicographically (case-insensitive, they are
//!   lowercased during parsing),
//! * identifiers sort before numerals, with two exceptions: `dev` sorts
//!   before everything and `post` sorts after everything,
//! * missing components are treated as the numeral `0`, which makes
//!   `1.1 == 1.1.0`.

mod parse;
mod with_source;

use std::{
    cmp::Ordering,
    fmt,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
};

use itertools::{EitherOrBoth, Itertools};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

pub use parse::{ParseVersionError, ParseVersionErrorKind};
pub use with_source::VersionWithSource;

/// A single parsed component of a version segment.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum Component {
    /// The special `dev` identifier, ordered before everything else.
    Dev,

    /// A lowercase alphabetic identifier, ordered before numerals.
    Iden(Box<str>),

    /// A numeric component.
    Numeral(u64),

    /// The special `post` identifier, ordered after everything else.
    Post,
}

impl Component {
    const ZERO: Component = Component::Numeral(0);

    fn as_number(&self) -> Option<u64> {
        match self {
            Component::Numeral(n) => Some(*n),
            _ => None,
        }
    }

    fn is_zero(&self) -> bool {
        matches!(self, Component::Numeral(0))
    }
}

impl Display for Component {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Component::Numeral(n) => write!(f, "{n}"),
            Component::Iden(s) => write!(f, "{s}"),
            Component::Dev => write!(f, "dev"),
            Component::Post => write!(f, "post"),
        }
    }
}

/// A version segment: the components between two separators.
///
/// The components always start with a numeral; if the written form starts
/// with an identifier a zero is inserted during parsing and `implicit_zero`
/// is set so the zero is skipped when formatting.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct Segment {
    /// The separator preceding this segment, `None` for the first segment of
    /// a version part.
    pub(crate) sep: Option<char>,

    /// The parsed components of this segment.
    pub(crate) components: SmallVec<[Component; 2]>,

    /// True if the leading zero was inserted during parsing.
    pub(crate) implicit_zero: bool,
}

/// A parsed conda version. See the [module documentation](self) for the
/// ordering rules.
///
/// `Version` equality follows the ordering relation (`1.1 == 1.1.0`); use
/// [`VersionWithSource`] when the verbatim input string must survive
/// round-trips through serialization.
#[derive(Clone, Debug)]
pub struct Version {
    pub(crate) epoch: Option<u64>,
    pub(crate) segments: Vec<Segment>,
    pub(crate) local: Vec<Segment>,
}

impl Version {
    /// Constructs a version with just a major component, e.g. `2`.
    pub fn major(major: u64) -> Version {
        Version {
            epoch: None,
            segments: vec![Segment {
                sep: None,
                components: smallvec::smallvec![Component::Numeral(major)],
                implicit_zero: false,
            }],
            local: Vec::new(),
        }
    }

    /// Returns true if this version has an explicit epoch.
    pub fn has_epoch(&self) -> bool {
        self.epoch.is_some()
    }

    /// Returns the epoch of the version, `0` if unspecified.
    pub fn epoch(&self) -> u64 {
        self.epoch.unwrap_or(0)
    }

    /// Returns true if this version has a local part (the part behind the
    /// optional `+`).
    pub fn has_local(&self) -> bool {
        !self.local.is_empty()
    }

    /// Tries to extract the major and minor numbers from the version.
    /// Returns `None` if the first two segments are not plain numerals.
    pub fn as_major_minor(&self) -> Option<(u64, u64)> {
        let major = single_numeral(self.segments.first()?)?;
        let minor = single_numeral(self.segments.get(1)?)?;
        Some((major, minor))
    }

    /// Returns true if any component of this version is the special `dev`
    /// identifier.
    pub fn is_dev(&self) -> bool {
        self.segments
            .iter()
            .flat_map(|segment| segment.components.iter())
            .any(|component| matches!(component, Component::Dev))
    }

    /// Returns true if this version starts with `other`, segment-wise. This
    /// is the relation used by the `=1.2` / `1.2.*` match operator.
    pub fn starts_with(&self, other: &Self) -> bool {
        self.epoch() == other.epoch()
            && segments_start_with(&self.segments, &other.segments)
            && segments_start_with(&self.local, &other.local)
    }

    /// Returns true if this version is compatible with `other` in the sense
    /// of the `~=` operator: greater than or equal to `other` and starting
    /// with everything but `other`'s last segment.
    pub fn compatible_with(&self, other: &Self) -> bool {
        if self < other || self.epoch() != other.epoch() {
            return false;
        }
        let prefix_len = other.segments.len().saturating_sub(1);
        segments_start_with(&self.segments, &other.segments[..prefix_len])
            && segments_start_with(&self.local, &other.local)
    }

    /// The canonical string form of this version.
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    fn cmp_parts(&self, other: &Self) -> Ordering {
        self.epoch()
            .cmp(&other.epoch())
            .then_with(|| cmp_segments(&self.segments, &other.segments))
            .then_with(|| cmp_segments(&self.local, &other.local))
    }
}

/// Returns the single explicit numeral of a segment, if that is all it
/// contains.
fn single_numeral(segment: &Segment) -> Option<u64> {
    if segment.components.len() == 1 && !segment.implicit_zero {
        segment.components[0].as_number()
    } else {
        None
    }
}

fn cmp_segments(left: &[Segment], right: &[Segment]) -> Ordering {
    for pair in left.iter().zip_longest(right.iter()) {
        let (l, r) = match pair {
            EitherOrBoth::Both(l, r) => (Some(l), Some(r)),
            EitherOrBoth::Left(l) => (Some(l), None),
            EitherOrBoth::Right(r) => (None, Some(r)),
        };
        let l_components = l.map_or(&[] as &[Component], |s| s.components.as_slice());
        let r_components = r.map_or(&[] as &[Component], |s| s.components.as_slice());
        for component_pair in l_components.iter().zip_longest(r_components.iter()) {
            let ordering = match component_pair {
                EitherOrBoth::Both(a, b) => a.cmp(b),
                EitherOrBoth::Left(a) => a.cmp(&Component::ZERO),
                EitherOrBoth::Right(b) => Component::ZERO.cmp(b),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
    }
    Ordering::Equal
}

/// Returns true if every segment of `prefix` is matched component-wise by
/// the corresponding segment of `full`. Missing components on either side
/// are treated as zero; extra components in `full` are allowed.
fn segments_start_with(full: &[Segment], prefix: &[Segment]) -> bool {
    for pair in full.iter().zip_longest(prefix.iter()) {
        let (f, p) = match pair {
            EitherOrBoth::Both(f, p) => (f, p),
            // Prefix exhausted, the rest of `full` is unconstrained.
            EitherOrBoth::Left(_) => return true,
            EitherOrBoth::Right(p) => {
                // The prefix is longer than the version; the remaining
                // prefix segments must all be equivalent to zero.
                if p.components.iter().all(Component::is_zero) {
                    continue;
                }
                return false;
            }
        };
        for component_pair in f.components.iter().zip_longest(p.components.iter()) {
            match component_pair {
                EitherOrBoth::Both(a, b) => {
                    if a != b {
                        return false;
                    }
                }
                // Extra components in the full version are fine.
                EitherOrBoth::Left(_) => break,
                EitherOrBoth::Right(b) => {
                    if !b.is_zero() {
                        return false;
                    }
                }
            }
        }
    }
    true
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_parts(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_parts(other)
    }
}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // The hash must be invariant under trailing-zero padding because
        // `1.1 == 1.1.0`. Trailing zero components and trailing all-zero
        // segments are therefore not hashed.
        self.epoch().hash(state);
        hash_segments(&self.segments, state);
        hash_segments(&self.local, state);
    }
}

fn hash_segments<H: Hasher>(segments: &[Segment], state: &mut H) {
    let normalized: Vec<&[Component]> = segments
        .iter()
        .map(|segment| {
            let trailing_zeros = segment
                .components
                .iter()
                .rev()
                .take_while(|c| c.is_zero())
                .count();
            &segment.components[..segment.components.len() - trailing_zeros]
        })
        .collect();
    let len = normalized
        .iter()
        .rposition(|components| !components.is_empty())
        .map_or(0, |idx| idx + 1);
    for components in &normalized[..len] {
        components.hash(state);
    }
    len.hash(state);
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{epoch}!")?;
        }
        write_segments(f, &self.segments)?;
        if !self.local.is_empty() {
            write!(f, "+")?;
            write_segments(f, &self.local)?;
        }
        Ok(())
    }
}

fn write_segments(f: &mut Formatter<'_>, segments: &[Segment]) -> fmt::Result {
    for segment in segments {
        if let Some(sep) = segment.sep {
            write!(f, "{sep}")?;
        }
        let skip = usize::from(segment.implicit_zero);
        for component in segment.components.iter().skip(skip) {
            write!(f, "{component}")?;
        }
    }
    Ok(())
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = std::borrow::Cow::<str>::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::cmp::Ordering;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::str::FromStr;

    use super::Version;

    // The canonical conda ordering table, adapted from the conda
    // documentation. Every entry must compare strictly less than the next.
    const ORDERED: &[&str] = &[
        "0.4",
        "0.4.1.rc",
        "0.4.1",
        "0.5a1",
        "0.5b3",
        "0.5C1",
        "0.5",
        "0.9.6",
        "0.960923",
        "1.0",
        "1.1dev1",
        "1.1_",
        "1.1a1",
        "1.1.0dev1",
        "1.1.a1",
        "1.1.0rc1",
        "1.1.0",
        "1.1.0post1",
        "1.1post1",
        "1996.07.12",
        "1!0.4.1",
        "1!3.1.1.6",
        "2!0.4.1",
    ];

    #[test]
    fn test_total_order() {
        for (i, a) in ORDERED.iter().enumerate() {
            for (j, b) in ORDERED.iter().enumerate() {
                let va = Version::from_str(a).unwrap();
                let vb = Version::from_str(b).unwrap();
                assert_eq!(
                    va.cmp(&vb),
                    i.cmp(&j),
                    "comparing {a} and {b} did not match the expected order"
                );
            }
        }
    }

    #[test]
    fn test_equality() {
        let equal = [
            ("1.1", "1.1.0"),
            ("1.1", "1.1.0.0"),
            ("0.4.1.rc", "0.4.1.RC"),
            ("1.1.dev1", "1.1.0dev1"),
            ("1.1.post1", "1.1.0post1"),
            ("0!1.2", "1.2"),
        ];
        for (a, b) in equal {
            let va = Version::from_str(a).unwrap();
            let vb = Version::from_str(b).unwrap();
            assert_eq!(va, vb, "{a} == {b}");
            assert_eq!(va.cmp(&vb), Ordering::Equal);
            assert_eq!(hash(&va), hash(&vb), "hashes of {a} and {b} differ");
        }
    }

    #[test]
    fn test_round_trip() {
        let versions = [
            "1.2.3",
            "1!1.2a.3-rc1",
            "0.4.1.rc",
            "1.1dev1",
            "1.0.1_",
            "1.2+3.4",
            "2!1.0+local.5",
            "1_2_3",
            "1.2g.beta15.rc",
        ];
        for version in versions {
            let parsed = Version::from_str(version).unwrap();
            assert_eq!(parsed.to_string(), version.to_lowercase());
            let reparsed = Version::from_str(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }

    #[test]
    fn test_as_major_minor() {
        assert_eq!(
            Version::from_str("3.11.4").unwrap().as_major_minor(),
            Some((3, 11))
        );
        assert_eq!(
            Version::from_str("3").unwrap().as_major_minor(),
            None
        );
        assert_eq!(
            Version::from_str("3.1a").unwrap().as_major_minor(),
            None
        );
    }

    #[test]
    fn test_starts_with() {
        let cases = [
            ("1.8.1", "1.8", true),
            ("1.8", "1.8", true),
            ("1.80", "1.8", false),
            ("1.8.1", "1.8.1", true),
            ("1.8rc1", "1.8", true),
            ("2.0", "1", false),
            ("1.0", "1.0.0", true),
        ];
        for (version, prefix, expected) in cases {
            let version = Version::from_str(version).unwrap();
            let prefix = Version::from_str(prefix).unwrap();
            assert_eq!(
                version.starts_with(&prefix),
                expected,
                "{version} starts_with {prefix}"
            );
        }
    }

    #[test]
    fn test_compatible_with() {
        let cases = [
            ("1.8.2", "1.8.1", true),
            ("1.9.0", "1.8.1", true),
            ("2.0", "1.8.1", false),
            ("1.8.0", "1.8.1", false),
        ];
        for (version, constraint, expected) in cases {
            let version = Version::from_str(version).unwrap();
            let constraint = Version::from_str(constraint).unwrap();
            assert_eq!(
                version.compatible_with(&constraint),
                expected,
                "{version} ~= {constraint}"
            );
        }
    }

    #[test]
    fn test_dev() {
        assert!(Version::from_str("1.0dev").unwrap().is_dev());
        assert!(!Version::from_str("1.0").unwrap().is_dev());
    }

    fn hash(version: &Version) -> u64 {
        let mut hasher = DefaultHasher::new();
        version.hash(&mut hasher);
        hasher.finish()
    }
}
