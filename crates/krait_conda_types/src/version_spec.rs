//! Version constraints as they appear in match specs, e.g. `>=1.2,<2` or
//! `1.8.*`.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::version::{ParseVersionError, Version};

/// A relational operator in a version constraint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VersionOperator {
    /// `==`: exact equality (up to trailing-zero padding)
    Equals,
    /// `!=`
    NotEquals,
    /// `>`
    Greater,
    /// `>=`
    GreaterEquals,
    /// `<`
    Less,
    /// `<=`
    LessEquals,
    /// `=1.2` / `1.2.*`: the version must start with the given prefix
    StartsWith,
    /// `!=1.2.*`
    NotStartsWith,
    /// `~=1.2.3`: `>=1.2.3` and `=1.2`
    Compatible,
}

/// Whether the members of a version spec group are and-ed or or-ed together.
/// The comma binds tighter than the pipe: `>1.8,<2|==1.7` reads as
/// `(>1.8 and <2) or ==1.7`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LogicalOperator {
    /// `,`
    And,
    /// `|`
    Or,
}

/// A parsed boolean combination of relational version constraints.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum VersionSpec {
    /// Matches every version (`*`).
    Any,
    /// A single relational atom.
    Operator(VersionOperator, Version),
    /// A group of specs combined with one logical operator.
    Group(LogicalOperator, Vec<VersionSpec>),
}

/// An error that occurred while parsing a version spec.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseVersionSpecError {
    /// A version within the spec failed to parse.
    #[error("invalid version: {0}")]
    InvalidVersion(#[from] ParseVersionError),

    /// The spec contained unbalanced parentheses.
    #[error("unbalanced parenthesis")]
    UnbalancedParenthesis,

    /// A constraint was empty, e.g. `>=1.0,,<2`.
    #[error("empty version constraint")]
    EmptyConstraint,

    /// An operator without a version, e.g. `>=`.
    #[error("expected a version after the operator")]
    ExpectedVersion,

    /// A glob `*` in a position where it is not understood.
    #[error("invalid glob pattern")]
    InvalidGlob,
}

/// Returns true if the character starts a version constraint when it follows
/// a package name, e.g. in `python>=3.8`.
pub fn is_start_of_version_constraint(c: char) -> bool {
    matches!(c, '>' | '<' | '=' | '!' | '~')
}

impl VersionSpec {
    /// Returns true if the given version matches this spec.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Any => true,
            VersionSpec::Operator(op, limit) => match op {
                VersionOperator::Equals => version == limit,
                VersionOperator::NotEquals => version != limit,
                VersionOperator::Greater => version > limit,
                VersionOperator::GreaterEquals => version >= limit,
                VersionOperator::Less => version < limit,
                VersionOperator::LessEquals => version <= limit,
                VersionOperator::StartsWith => version.starts_with(limit),
                VersionOperator::NotStartsWith => !version.starts_with(limit),
                VersionOperator::Compatible => version.compatible_with(limit),
            },
            VersionSpec::Group(LogicalOperator::And, specs) => {
                specs.iter().all(|spec| spec.matches(version))
            }
            VersionSpec::Group(LogicalOperator::Or, specs) => {
                specs.iter().any(|spec| spec.matches(version))
            }
        }
    }
}

impl FromStr for VersionSpec {
    type Err = ParseVersionSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(s)?;
        let mut parser = Parser { tokens, pos: 0 };
        let spec = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            return Err(ParseVersionSpecError::UnbalancedParenthesis);
        }
        Ok(spec)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Constraint(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseVersionSpecError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in input.chars() {
        match c {
            '(' | ')' | ',' | '|' => {
                if !current.is_empty() {
                    tokens.push(Token::Constraint(std::mem::take(&mut current)));
                }
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    ',' => Token::And,
                    _ => Token::Or,
                });
            }
            c if c.is_whitespace() => {}
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(Token::Constraint(current));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_or(&mut self) -> Result<VersionSpec, ParseVersionSpecError> {
        let mut specs = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            specs.push(self.parse_and()?);
        }
        if specs.len() == 1 {
            Ok(specs.pop().unwrap())
        } else {
            Ok(VersionSpec::Group(LogicalOperator::Or, specs))
        }
    }

    fn parse_and(&mut self) -> Result<VersionSpec, ParseVersionSpecError> {
        let mut specs = vec![self.parse_atom()?];
        while self.eat(&Token::And) {
            specs.push(self.parse_atom()?);
        }
        if specs.len() == 1 {
            Ok(specs.pop().unwrap())
        } else {
            Ok(VersionSpec::Group(LogicalOperator::And, specs))
        }
    }

    fn parse_atom(&mut self) -> Result<VersionSpec, ParseVersionSpecError> {
        if self.eat(&Token::Open) {
            let spec = self.parse_or()?;
            if !self.eat(&Token::Close) {
                return Err(ParseVersionSpecError::UnbalancedParenthesis);
            }
            return Ok(spec);
        }
        match self.tokens.get(self.pos) {
            Some(Token::Constraint(constraint)) => {
                self.pos += 1;
                parse_constraint(constraint)
            }
            _ => Err(ParseVersionSpecError::EmptyConstraint),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.tokens.get(self.pos) == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }
}

fn parse_constraint(input: &str) -> Result<VersionSpec, ParseVersionSpecError> {
    if input == "*" {
        return Ok(VersionSpec::Any);
    }

    let (operator, rest) = if let Some(rest) = input.strip_prefix("==") {
        (Some(VersionOperator::Equals), rest)
    } else if let Some(rest) = input.strip_prefix("!=") {
        (Some(VersionOperator::NotEquals), rest)
    } else if let Some(rest) = input.strip_prefix(">=") {
        (Some(VersionOperator::GreaterEquals), rest)
    } else if let Some(rest) = input.strip_prefix("<=") {
        (Some(VersionOperator::LessEquals), rest)
    } else if let Some(rest) = input.strip_prefix("~=") {
        (Some(VersionOperator::Compatible), rest)
    } else if let Some(rest) = input.strip_prefix('>') {
        (Some(VersionOperator::Greater), rest)
    } else if let Some(rest) = input.strip_prefix('<') {
        (Some(VersionOperator::Less), rest)
    } else if let Some(rest) = input.strip_prefix('=') {
        (Some(VersionOperator::StartsWith), rest)
    } else {
        (None, input)
    };

    if rest.is_empty() {
        return Err(ParseVersionSpecError::ExpectedVersion);
    }

    // Handle trailing globs: `1.2.*` and `1.2*` both constrain the version
    // to start with `1.2`.
    let (version_str, glob) = if let Some(stripped) = rest.strip_suffix(".*") {
        (stripped, true)
    } else if let Some(stripped) = rest.strip_suffix('*') {
        (stripped, true)
    } else {
        (rest, false)
    };

    if version_str.is_empty() {
        return Err(ParseVersionSpecError::InvalidGlob);
    }
    if version_str.contains('*') {
        return Err(ParseVersionSpecError::InvalidGlob);
    }

    let version = Version::from_str(version_str)?;
    let operator = match (operator, glob) {
        (None, false) => VersionOperator::Equals,
        (None | Some(VersionOperator::Equals | VersionOperator::StartsWith), true) => {
            VersionOperator::StartsWith
        }
        (Some(VersionOperator::NotEquals), true) => VersionOperator::NotStartsWith,
        (Some(op), true) => {
            // Globs after relational operators (`>=1.2.*`) carry no extra
            // meaning, the operator wins.
            op
        }
        (Some(VersionOperator::StartsWith), false) => VersionOperator::StartsWith,
        (Some(op), false) => op,
    };

    Ok(VersionSpec::Operator(operator, version))
}

impl Display for VersionOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionOperator::Equals => write!(f, "=="),
            VersionOperator::NotEquals => write!(f, "!="),
            VersionOperator::Greater => write!(f, ">"),
            VersionOperator::GreaterEquals => write!(f, ">="),
            VersionOperator::Less => write!(f, "<"),
            VersionOperator::LessEquals => write!(f, "<="),
            VersionOperator::StartsWith => write!(f, "="),
            VersionOperator::NotStartsWith => write!(f, "!="),
            VersionOperator::Compatible => write!(f, "~="),
        }
    }
}

impl Display for VersionSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn write_spec(
            spec: &VersionSpec,
            f: &mut Formatter<'_>,
            parent: Option<LogicalOperator>,
        ) -> std::fmt::Result {
            match spec {
                VersionSpec::Any => write!(f, "*"),
                VersionSpec::Operator(VersionOperator::StartsWith, version) => {
                    write!(f, "{version}.*")
                }
                VersionSpec::Operator(VersionOperator::NotStartsWith, version) => {
                    write!(f, "!={version}.*")
                }
                VersionSpec::Operator(op, version) => write!(f, "{op}{version}"),
                VersionSpec::Group(op, specs) => {
                    // The comma binds tighter than the pipe, so an or-group
                    // inside an and-group needs parentheses.
                    let needs_parens =
                        *op == LogicalOperator::Or && parent == Some(LogicalOperator::And);
                    if needs_parens {
                        write!(f, "(")?;
                    }
                    let separator = match op {
                        LogicalOperator::And => ",",
                        LogicalOperator::Or => "|",
                    };
                    for (i, spec) in specs.iter().enumerate() {
                        if i > 0 {
                            write!(f, "{separator}")?;
                        }
                        write_spec(spec, f, Some(*op))?;
                    }
                    if needs_parens {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
            }
        }
        write_spec(self, f, None)
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VersionSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = std::borrow::Cow::<str>::deserialize(deserializer)?;
        source.parse().map_err(serde::de::Error::custom)
    }
}
