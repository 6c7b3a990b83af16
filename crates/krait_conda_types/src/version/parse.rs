use std::{num::ParseIntError, str::FromStr};

use smallvec::SmallVec;
use thiserror::Error;

use super::{Component, Segment, Version};

/// An error that occurred while parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("malformed version string '{version}': {kind}")]
pub struct ParseVersionError {
    /// The original string that was the input of the parser.
    pub version: String,

    /// The kind of parse error that occurred.
    pub kind: ParseVersionErrorKind,
}

/// The kind of error that occurred when parsing a version string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionErrorKind {
    /// The string was empty.
    #[error("empty string")]
    Empty,

    /// The string contained characters that are not valid in a version.
    #[error("invalid character(s)")]
    InvalidCharacters,

    /// The epoch was not an integer value.
    #[error("epoch must be an integer: {0}")]
    EpochMustBeInteger(ParseIntError),

    /// A numeral did not fit in 64 bits.
    #[error("invalid numeral: {0}")]
    InvalidNumeral(ParseIntError),

    /// The string contained multiple `!` separators.
    #[error("duplicated epoch separator '!'")]
    DuplicateEpochSeparator,

    /// The string contained multiple `+` separators.
    #[error("duplicated local version separator '+'")]
    DuplicateLocalVersionSeparator,

    /// A segment between two separators was empty.
    #[error("expected a version component e.g. `2` or `rc`")]
    EmptyVersionComponent,

    /// Both underscores and dashes were used as segment separators.
    #[error("cannot use both underscores and dashes as version segment separators")]
    CannotMixAndMatchDashesAndUnderscores,
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version(s).map_err(|kind| ParseVersionError {
            version: s.to_owned(),
            kind,
        })
    }
}

fn parse_version(input: &str) -> Result<Version, ParseVersionErrorKind> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseVersionErrorKind::Empty);
    }

    // Split off the epoch, a number followed by `!` at the start.
    let (epoch, rest) = match input.split_once('!') {
        Some((epoch_str, rest)) => {
            if rest.contains('!') {
                return Err(ParseVersionErrorKind::DuplicateEpochSeparator);
            }
            let epoch = epoch_str
                .parse::<u64>()
                .map_err(ParseVersionErrorKind::EpochMustBeInteger)?;
            (Some(epoch), rest)
        }
        None => (None, input),
    };

    // Split off the local version part behind the optional `+`.
    let (common_part, local_part) = match rest.split_once('+') {
        Some((common, local)) => {
            if local.contains('+') {
                return Err(ParseVersionErrorKind::DuplicateLocalVersionSeparator);
            }
            (common, Some(local))
        }
        None => (rest, None),
    };

    // Dashes and underscores may both appear as separators, but not mixed
    // within one version string.
    let mut dash_or_underscore = None;

    let segments = parse_segments(common_part, &mut dash_or_underscore)?;
    let local = match local_part {
        Some(local) => parse_segments(local, &mut dash_or_underscore)?,
        None => Vec::new(),
    };

    Ok(Version {
        epoch,
        segments,
        local,
    })
}

fn parse_segments(
    part: &str,
    dash_or_underscore: &mut Option<char>,
) -> Result<Vec<Segment>, ParseVersionErrorKind> {
    if part.is_empty() {
        return Err(ParseVersionErrorKind::EmptyVersionComponent);
    }

    let mut segments = Vec::new();
    let mut sep = None;
    let mut rest = part;

    loop {
        let (components, implicit_zero, remaining) = parse_segment(rest)?;
        segments.push(Segment {
            sep,
            components,
            implicit_zero,
        });

        if remaining.is_empty() {
            break;
        }

        let separator = remaining.chars().next().unwrap();
        match separator {
            '.' => {}
            '-' | '_' => match dash_or_underscore {
                None => *dash_or_underscore = Some(separator),
                Some(previous) if *previous != separator => {
                    return Err(ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores)
                }
                Some(_) => {}
            },
            _ => return Err(ParseVersionErrorKind::InvalidCharacters),
        }

        sep = Some(separator);
        rest = &remaining[1..];
        if rest.is_empty() {
            // A trailing `_` would have been consumed as a component, so any
            // separator left dangling at the end is an error.
            return Err(ParseVersionErrorKind::EmptyVersionComponent);
        }
    }

    Ok(segments)
}

type ComponentVec = SmallVec<[Component; 2]>;

/// Parses a single segment: a run of components up to the next separator or
/// the end of the input. A `_` at the very end of the input is a component
/// (the openssl-style trailing underscore), not a separator.
fn parse_segment(
    input: &str,
) -> Result<(ComponentVec, bool, &str), ParseVersionErrorKind> {
    let mut components = ComponentVec::new();
    let mut rest = input;

    while let Some((component, remaining)) = parse_component(rest)? {
        components.push(component);
        rest = remaining;
    }

    if components.is_empty() {
        return Err(ParseVersionErrorKind::EmptyVersionComponent);
    }

    // Each segment must start with a numeral so numbers and identifiers stay
    // in phase; insert a zero when the written form starts with a letter.
    let implicit_zero = components[0].as_number().is_none();
    if implicit_zero {
        components.insert(0, Component::ZERO);
    }

    Ok((components, implicit_zero, rest))
}

fn parse_component(
    input: &str,
) -> Result<Option<(Component, &str)>, ParseVersionErrorKind> {
    let mut chars = input.chars();
    let Some(first) = chars.next() else {
        return Ok(None);
    };

    if first.is_ascii_digit() {
        let digits: &str = &input[..input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len())];
        let numeral = digits
            .parse::<u64>()
            .map_err(ParseVersionErrorKind::InvalidNumeral)?;
        return Ok(Some((Component::Numeral(numeral), &input[digits.len()..])));
    }

    // The special identifiers are matched case-insensitively before generic
    // identifiers.
    if input
        .get(..4)
        .is_some_and(|s| s.eq_ignore_ascii_case("post"))
    {
        return Ok(Some((Component::Post, &input[4..])));
    }
    if input.get(..3).is_some_and(|s| s.eq_ignore_ascii_case("dev")) {
        return Ok(Some((Component::Dev, &input[3..])));
    }

    if first.is_alphabetic() {
        let alpha_len = input
            .find(|c: char| !c.is_alphabetic())
            .unwrap_or(input.len());
        let iden = input[..alpha_len].to_lowercase().into_boxed_str();
        return Ok(Some((Component::Iden(iden), &input[alpha_len..])));
    }

    // A lone `_` at the end of the string is a component.
    if first == '_' && chars.next().is_none() {
        return Ok(Some((
            Component::Iden(String::from("_").into_boxed_str()),
            &input[1..],
        )));
    }

    Ok(None)
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;

    use super::{ParseVersionErrorKind, Version};

    #[test]
    fn test_parse_errors() {
        let cases = [
            ("", ParseVersionErrorKind::Empty),
            ("$", ParseVersionErrorKind::EmptyVersionComponent),
            (".", ParseVersionErrorKind::EmptyVersionComponent),
            ("1!2!3", ParseVersionErrorKind::DuplicateEpochSeparator),
            ("1+2+3", ParseVersionErrorKind::DuplicateLocalVersionSeparator),
            ("1+", ParseVersionErrorKind::EmptyVersionComponent),
            ("1.", ParseVersionErrorKind::EmptyVersionComponent),
            (
                "1-2_3",
                ParseVersionErrorKind::CannotMixAndMatchDashesAndUnderscores,
            ),
            ("1@2", ParseVersionErrorKind::InvalidCharacters),
        ];
        for (input, expected) in cases {
            let err = Version::from_str(input).unwrap_err();
            assert_eq!(err.kind, expected, "input {input:?}");
        }

        assert_matches!(
            Version::from_str("a!1.2").unwrap_err().kind,
            ParseVersionErrorKind::EpochMustBeInteger(_)
        );
        assert_matches!(
            Version::from_str("99999999999999999999999").unwrap_err().kind,
            ParseVersionErrorKind::InvalidNumeral(_)
        );
    }

    #[test]
    fn test_parse_structure() {
        // A trailing underscore attaches to the preceding segment.
        let version = Version::from_str("1.0.1_").unwrap();
        assert_eq!(version.to_string(), "1.0.1_");

        // An underscore between separators becomes its own segment with an
        // implicit leading zero.
        let version = Version::from_str("1__").unwrap();
        assert_eq!(version.to_string(), "1__");

        // Epoch and local parts are recognized.
        let version = Version::from_str("2!1.2+3.4").unwrap();
        assert!(version.has_epoch());
        assert!(version.has_local());
        assert_eq!(version.epoch(), 2);

        // `post` and `dev` are matched case-insensitively.
        let version = Version::from_str("1.0POST1").unwrap();
        assert_eq!(version.to_string(), "1.0post1");
    }
}
