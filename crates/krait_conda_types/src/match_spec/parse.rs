use std::borrow::Cow;
use std::num::ParseIntError;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::{tag, take_till1, take_until, take_while1};
use nom::character::complete::{char, multispace0, one_of};
use nom::combinator::{opt, recognize};
use nom::error::{context, ParseError};
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, pair, separated_pair, terminated};
use nom::{Finish, IResult};
use smallvec::SmallVec;
use thiserror::Error;
use url::Url;

use super::{MatchSpec, StringMatcher};
use crate::match_spec::matcher::StringMatcherParseError;
use crate::package::ArchiveIdentifier;
use crate::version_spec::{is_start_of_version_constraint, ParseVersionSpecError};
use crate::{ParsePackageNameError, VersionOperator, VersionSpec};

/// An error that occurred while parsing a match spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseMatchSpecError {
    /// The spec looked like a package archive but the path or url was
    /// invalid.
    #[error("invalid package path or url")]
    InvalidPackagePathOrUrl,

    /// The bracket section was malformed.
    #[error("invalid bracket")]
    InvalidBracket,

    /// More than two `:` separated the channel from the name.
    #[error("invalid number of colons")]
    InvalidNumberOfColons,

    /// An unknown key appeared in the bracket section.
    #[error("invalid bracket key: {0}")]
    InvalidBracketKey(String),

    /// The spec did not contain a package name.
    #[error("missing package name")]
    MissingPackageName,

    /// The package name was invalid.
    #[error("invalid package name: {0}")]
    InvalidPackageName(#[from] ParsePackageNameError),

    /// Multiple bracket sections appeared in the spec.
    #[error("multiple bracket sections not allowed")]
    MultipleBracketSectionsNotAllowed,

    /// The version and build part of the spec was malformed.
    #[error("invalid version and build")]
    InvalidVersionAndBuild,

    /// The version spec was invalid.
    #[error("invalid version spec: {0}")]
    InvalidVersionSpec(#[from] ParseVersionSpecError),

    /// The build string matcher was invalid.
    #[error("invalid build matcher: {0}")]
    InvalidBuildMatcher(#[from] StringMatcherParseError),

    /// The build number was invalid.
    #[error("invalid build number: {0}")]
    InvalidBuildNumber(#[from] ParseIntError),

    /// A hash digest (`md5=`/`sha256=` or url fragment) failed to parse.
    #[error("invalid hash digest")]
    InvalidHashDigest,
}

impl FromStr for MatchSpec {
    type Err = ParseMatchSpecError;

    fn from_str(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
        parse(input)
    }
}

/// Strips a comment from a match spec. A comment is preceded by a '#'
/// followed by the comment itself.
fn strip_comment(input: &str) -> (&str, Option<&str>) {
    input
        .split_once('#')
        .map(|(spec, comment)| (spec, Some(comment)))
        .unwrap_or((input, None))
}

/// Returns true if the specified string represents a package archive path or
/// url.
fn is_package_file(input: &str) -> bool {
    input.ends_with(".conda") || input.ends_with(".tar.bz2")
}

/// An optimized data structure to store the key value pairs of a bracket
/// string `[key1=value1, key2=value2]`. Two pairs are stored on the stack.
type BracketVec<'a> = SmallVec<[(&'a str, &'a str); 2]>;

/// A parse combinator that strips whitespace before and after another parser.
fn whitespace_enclosed<'a, F: 'a, O, E: ParseError<&'a str>>(
    inner: F,
) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where
    F: FnMut(&'a str) -> IResult<&'a str, O, E>,
{
    delimited(multispace0, inner, multispace0)
}

/// Parses the contents of a bracket list `[version="1.2.3", build_number=1]`.
fn parse_bracket_list(input: &str) -> Result<BracketVec<'_>, ParseMatchSpecError> {
    fn parse_key(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(context(
            "key",
            take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
        ))(input)
    }

    fn parse_value(input: &str) -> IResult<&str, &str> {
        whitespace_enclosed(context(
            "value",
            alt((
                delimited(char('"'), take_until("\""), char('"')),
                delimited(char('\''), take_until("'"), char('\'')),
                take_while1(|c: char| !matches!(c, ',' | ']' | '\'' | '"') && !c.is_whitespace()),
            )),
        ))(input)
    }

    fn parse_key_value(input: &str) -> IResult<&str, (&str, &str)> {
        separated_pair(parse_key, char('='), parse_value)(input)
    }

    fn parse_key_value_list(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        separated_list0(whitespace_enclosed(char(',')), parse_key_value)(input)
    }

    fn parse_brackets(input: &str) -> IResult<&str, Vec<(&str, &str)>> {
        terminated(
            delimited(char('['), parse_key_value_list, char(']')),
            multispace0,
        )(input)
    }

    match parse_brackets(input).finish() {
        Ok(("", values)) => Ok(values.into()),
        Ok(_) | Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::InvalidBracket),
    }
}

/// Strips the bracket part from a match spec, returning the remainder and
/// the parsed key value pairs.
fn strip_brackets(input: &str) -> Result<(Cow<'_, str>, BracketVec<'_>), ParseMatchSpecError> {
    if let Some(matches) = lazy_regex::regex!(r#".*(?:(\[.*\]))"#).captures(input) {
        let bracket_str = matches.get(1).unwrap().as_str();
        let bracket_contents = parse_bracket_list(bracket_str)?;

        let input = if let Some(input) = input.strip_suffix(bracket_str) {
            Cow::Borrowed(input)
        } else {
            Cow::Owned(input.replace(bracket_str, ""))
        };

        Ok((input, bracket_contents))
    } else {
        Ok((input.into(), SmallVec::new()))
    }
}

/// Applies the parsed bracket key value pairs to a [`MatchSpec`].
fn parse_bracket_vec_into_components(
    bracket: BracketVec<'_>,
    mut match_spec: MatchSpec,
) -> Result<MatchSpec, ParseMatchSpecError> {
    for (key, value) in bracket {
        match key {
            "version" => match_spec.version = Some(VersionSpec::from_str(value)?),
            "build" => match_spec.build = Some(StringMatcher::from_str(value)?),
            "build_number" => match_spec.build_number = Some(value.parse()?),
            "fn" => match_spec.file_name = Some(value.to_owned()),
            "channel" => match_spec.channel = Some(value.to_owned()),
            "subdir" => match_spec.subdir = Some(value.to_owned()),
            "url" => {
                match_spec.url = Some(
                    Url::parse(value).map_err(|_| ParseMatchSpecError::InvalidPackagePathOrUrl)?,
                );
            }
            "md5" => {
                match_spec.md5 = Some(
                    krait_digest::parse_digest_from_hex::<krait_digest::Md5>(value)
                        .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                );
            }
            "sha256" => {
                match_spec.sha256 = Some(
                    krait_digest::parse_digest_from_hex::<krait_digest::Sha256>(value)
                        .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
                );
            }
            _ => return Err(ParseMatchSpecError::InvalidBracketKey(key.to_owned())),
        }
    }
    Ok(match_spec)
}

/// Strips the package name from the front of the input.
fn strip_package_name(input: &str) -> Result<(&str, &str), ParseMatchSpecError> {
    match take_while1::<_, _, nom::error::Error<&str>>(|c: char| {
        !c.is_whitespace() && !is_start_of_version_constraint(c)
    })(input)
    .finish()
    {
        Ok((rest, name)) => Ok((name.trim(), rest.trim())),
        Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::MissingPackageName),
    }
}

/// Splits the remaining input into a version constraint group and an
/// optional build string.
fn split_version_and_build(input: &str) -> Result<(&str, Option<&str>), ParseMatchSpecError> {
    fn parse_operator(input: &str) -> IResult<&str, &str> {
        alt((
            tag(">="),
            tag("<="),
            tag("~="),
            tag("=="),
            tag("!="),
            tag("="),
            tag("<"),
            tag(">"),
        ))(input)
    }

    fn parse_constraint(input: &str) -> IResult<&str, &str> {
        recognize(pair(
            whitespace_enclosed(opt(parse_operator)),
            take_till1(|c: char| {
                is_start_of_version_constraint(c)
                    || c.is_whitespace()
                    || matches!(c, ',' | '|' | ')' | '(')
            }),
        ))(input)
    }

    fn parse_version_constraint_or_group(input: &str) -> IResult<&str, &str> {
        alt((
            delimited(tag("("), parse_version_group, tag(")")),
            parse_constraint,
        ))(input)
    }

    fn parse_version_group(input: &str) -> IResult<&str, &str> {
        recognize(separated_list1(
            whitespace_enclosed(one_of(",|")),
            parse_version_constraint_or_group,
        ))(input)
    }

    fn parse_version_and_build_separator(input: &str) -> IResult<&str, &str> {
        terminated(parse_version_group, opt(one_of(" =")))(input)
    }

    match parse_version_and_build_separator(input).finish() {
        Ok((rest, version)) => {
            let build_string = rest.trim();
            Ok((
                version.trim(),
                if build_string.is_empty() {
                    None
                } else {
                    Some(build_string)
                },
            ))
        }
        Err(nom::error::Error { .. }) => Err(ParseMatchSpecError::InvalidVersionAndBuild),
    }
}

/// Parses an explicit url (or path) spec like
/// `https://host/ch/linux-64/foo-1.0-0.tar.bz2#sha256:abcd...`.
fn parse_url_spec(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
    let mut url = match Url::parse(input) {
        Ok(url) => url,
        Err(_) => Url::from_file_path(std::path::Path::new(input))
            .map_err(|()| ParseMatchSpecError::InvalidPackagePathOrUrl)?,
    };

    let mut match_spec = MatchSpec::default();

    // The fragment carries the expected hash: either a bare md5 hex string
    // or `sha256:<hex>`.
    if let Some(fragment) = url.fragment() {
        if let Some(hex) = fragment.strip_prefix("sha256:") {
            match_spec.sha256 = Some(
                krait_digest::parse_digest_from_hex::<krait_digest::Sha256>(hex)
                    .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
            );
        } else if !fragment.is_empty() {
            match_spec.md5 = Some(
                krait_digest::parse_digest_from_hex::<krait_digest::Md5>(fragment)
                    .ok_or(ParseMatchSpecError::InvalidHashDigest)?,
            );
        }
        url.set_fragment(None);
    }

    let identifier = ArchiveIdentifier::try_from_url(&url)
        .ok_or(ParseMatchSpecError::InvalidPackagePathOrUrl)?;

    match_spec.name = Some(identifier.name.parse()?);
    match_spec.version = Some(VersionSpec::Operator(
        VersionOperator::Equals,
        identifier
            .version
            .parse::<crate::version::Version>()
            .map_err(|e| ParseMatchSpecError::InvalidVersionSpec(e.into()))?,
    ));
    match_spec.build = Some(StringMatcher::Exact(identifier.build_string.clone()));
    match_spec.file_name = Some(identifier.to_file_name());
    match_spec.url = Some(url);

    Ok(match_spec)
}

/// Parses a conda match spec.
fn parse(input: &str) -> Result<MatchSpec, ParseMatchSpecError> {
    // Step 1. Strip the comment.
    let (input, _comment) = strip_comment(input);
    let input = input.trim();

    // Step 2. Handle direct references to package archives.
    if is_package_file(input) {
        return parse_url_spec(input);
    }

    // Step 3. Strip off the bracket portion.
    let (input, brackets) = strip_brackets(input)?;
    let mut match_spec = parse_bracket_vec_into_components(brackets, MatchSpec::default())?;

    // Step 4. Strip off the `channel::` and optional namespace.
    let mut input_split = input.split(':').fuse();
    let (input, namespace, channel_str) = match (
        input_split.next(),
        input_split.next(),
        input_split.next(),
        input_split.next(),
    ) {
        (Some(input), None, _, _) => (input, None, None),
        (Some(namespace), Some(input), None, _) => (input, Some(namespace), None),
        (Some(channel_str), Some(namespace), Some(input), None) => {
            (input, Some(namespace), Some(channel_str))
        }
        _ => return Err(ParseMatchSpecError::InvalidNumberOfColons),
    };

    match_spec.namespace = namespace
        .filter(|namespace| !namespace.is_empty())
        .map(ToOwned::to_owned)
        .or(match_spec.namespace);

    if let Some(channel_str) = channel_str {
        if let Some((channel, subdir)) = channel_str.rsplit_once('/') {
            match_spec.channel = Some(channel.to_owned());
            match_spec.subdir = Some(subdir.to_owned());
        } else {
            match_spec.channel = Some(channel_str.to_owned());
        }
    }

    // Step 5. Strip off the package name. A literal `*` matches any name
    // and is used for exact specs like `*[sha256=...]`.
    let (name, input) = strip_package_name(input.trim())?;
    match_spec.name = if name == "*" {
        None
    } else {
        Some(name.parse()?)
    };

    // Step 6. The remainder is the version and optional build string.
    let input = input.trim();
    if !input.is_empty() {
        if input.contains('[') {
            return Err(ParseMatchSpecError::MultipleBracketSectionsNotAllowed);
        }

        let (version_str, build_str) = split_version_and_build(input)?;

        let version_str = if version_str.find(char::is_whitespace).is_some() {
            Cow::Owned(version_str.replace(char::is_whitespace, ""))
        } else {
            Cow::Borrowed(version_str)
        };

        match_spec.version = Some(VersionSpec::from_str(version_str.as_ref())?);

        if let Some(build) = build_str {
            let build = build.strip_prefix('=').unwrap_or(build);
            match_spec.build = Some(StringMatcher::from_str(build)?);
        }
    }

    Ok(match_spec)
}
