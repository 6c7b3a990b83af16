//! Channels: named or url-addressed repositories of conda packages, sliced
//! into per-platform subdirectories.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{ParsePlatformError, Platform};

/// The configuration that is needed to resolve a channel name to a base url.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// The url prefix prepended to bare channel names, e.g.
    /// `https://conda.anaconda.org`.
    pub channel_alias: Url,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_alias: Url::parse("https://conda.anaconda.org")
                .expect("the default channel alias is a valid url"),
        }
    }
}

/// A channel, resolved from a user supplied token: a name (`conda-forge`), a
/// url (`https://host/channel`), or a local path. A channel spec may list
/// the platforms to index explicitly (`conda-forge[linux-64,noarch]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// The platforms explicitly requested for this channel, or `None` to use
    /// the default set.
    pub platforms: Option<Vec<Platform>>,

    /// The base url of the channel, always with a trailing slash.
    pub base_url: Url,

    /// The name of the channel as the user specified it, if it was a name.
    pub name: Option<String>,
}

/// An error that occurred while parsing a channel token.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseChannelError {
    /// A platform in the bracket list was not recognized.
    #[error("invalid platform: {0}")]
    InvalidPlatform(#[from] ParsePlatformError),

    /// The url of the channel could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A local channel path could not be resolved.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The channel token was empty.
    #[error("empty channel")]
    Empty,
}

impl Channel {
    /// Parses a channel token, resolving names against the channel alias in
    /// the given configuration.
    pub fn from_str(
        str: impl AsRef<str>,
        config: &ChannelConfig,
    ) -> Result<Self, ParseChannelError> {
        let str = str.as_ref().trim();
        if str.is_empty() {
            return Err(ParseChannelError::Empty);
        }

        let (channel, platforms) = parse_platforms(str)?;

        if channel.contains("://") {
            let url = Url::parse(channel)
                .map_err(|e| ParseChannelError::InvalidUrl(e.to_string()))?;
            Ok(Channel {
                platforms,
                name: None,
                base_url: ensure_trailing_slash(url),
            })
        } else if is_path(channel) {
            let path = PathBuf::from(channel);
            let absolute = if path.is_absolute() {
                path
            } else {
                std::env::current_dir()
                    .map_err(|e| ParseChannelError::InvalidPath(e.to_string()))?
                    .join(path)
            };
            let url = Url::from_directory_path(&absolute)
                .map_err(|()| ParseChannelError::InvalidPath(channel.to_owned()))?;
            Ok(Channel {
                platforms,
                name: None,
                base_url: url,
            })
        } else {
            let url = config
                .channel_alias
                .join(&format!("{}/", channel.trim_matches('/')))
                .map_err(|e| ParseChannelError::InvalidUrl(e.to_string()))?;
            Ok(Channel {
                platforms,
                name: Some(channel.trim_matches('/').to_owned()),
                base_url: url,
            })
        }
    }

    /// Constructs a channel directly from a base url.
    pub fn from_url(url: Url) -> Self {
        Self {
            platforms: None,
            base_url: ensure_trailing_slash(url),
            name: None,
        }
    }

    /// Returns the canonical name of the channel: its base url without a
    /// trailing slash.
    pub fn canonical_name(&self) -> String {
        self.base_url.as_str().trim_end_matches('/').to_owned()
    }

    /// Returns the url of a platform subdirectory of this channel, with a
    /// trailing slash.
    pub fn platform_url(&self, subdir: &str) -> Url {
        self.base_url
            .join(&format!("{subdir}/"))
            .expect("a subdir name always joins onto a base url")
    }

    /// Returns the platforms to index for this channel: the explicitly
    /// listed ones, or the given defaults. `noarch` is always included.
    pub fn platforms_or(&self, default_platforms: &[Platform]) -> Vec<Platform> {
        let mut platforms = self
            .platforms
            .clone()
            .unwrap_or_else(|| default_platforms.to_vec());
        if !platforms.contains(&Platform::NoArch) {
            platforms.push(Platform::NoArch);
        }
        platforms
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "{}", self.canonical_name()),
        }
    }
}

/// Splits the optional `[platform, ...]` suffix from a channel token.
fn parse_platforms(
    channel: &str,
) -> Result<(&str, Option<Vec<Platform>>), ParseChannelError> {
    if let Some(channel) = channel.strip_suffix(']') {
        if let Some((channel, platforms_str)) = channel.rsplit_once('[') {
            let platforms = platforms_str
                .split(',')
                .map(str::trim)
                .filter(|platform| !platform.is_empty())
                .map(Platform::from_str)
                .collect::<Result<Vec<_>, _>>()?;
            return Ok((channel, Some(platforms)));
        }
    }
    Ok((channel, None))
}

/// Returns true if the token looks like a filesystem path rather than a
/// channel name.
fn is_path(path: &str) -> bool {
    path.starts_with('/')
        || path.starts_with("./")
        || path.starts_with("../")
        || path.starts_with("~/")
        // A windows drive letter, e.g. `C:\`.
        || (path.len() >= 3
            && path.as_bytes()[1] == b':'
            && (path.as_bytes()[2] == b'/' || path.as_bytes()[2] == b'\\'))
}

fn ensure_trailing_slash(url: Url) -> Url {
    if url.path().ends_with('/') {
        url
    } else {
        let mut url = url;
        let path = format!("{}/", url.path());
        url.set_path(&path);
        url
    }
}

#[cfg(test)]
mod test {
    use url::Url;

    use crate::Platform;

    use super::{Channel, ChannelConfig};

    #[test]
    fn test_parse_name() {
        let config = ChannelConfig::default();
        let channel = Channel::from_str("conda-forge", &config).unwrap();
        assert_eq!(channel.name.as_deref(), Some("conda-forge"));
        assert_eq!(
            channel.base_url.as_str(),
            "https://conda.anaconda.org/conda-forge/"
        );
        assert_eq!(
            channel.canonical_name(),
            "https://conda.anaconda.org/conda-forge"
        );
        assert_eq!(
            channel.platform_url("linux-64").as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64/"
        );
    }

    #[test]
    fn test_parse_url() {
        let config = ChannelConfig::default();
        let channel = Channel::from_str("https://repo.prefix.dev/my-channel", &config).unwrap();
        assert_eq!(channel.name, None);
        assert_eq!(
            channel.base_url.as_str(),
            "https://repo.prefix.dev/my-channel/"
        );
    }

    #[test]
    fn test_parse_platforms() {
        let config = ChannelConfig::default();
        let channel = Channel::from_str("conda-forge[linux-64,noarch]", &config).unwrap();
        assert_eq!(
            channel.platforms,
            Some(vec![Platform::Linux64, Platform::NoArch])
        );

        let channel = Channel::from_str("conda-forge[linux-64]", &config).unwrap();
        assert_eq!(
            channel.platforms_or(&[Platform::Linux64]),
            vec![Platform::Linux64, Platform::NoArch]
        );
    }

    #[test]
    fn test_default_platforms_include_noarch() {
        let config = ChannelConfig::default();
        let channel = Channel::from_str("conda-forge", &config).unwrap();
        let platforms = channel.platforms_or(&[Platform::Linux64]);
        assert!(platforms.contains(&Platform::NoArch));
        assert!(platforms.contains(&Platform::Linux64));
    }

    #[test]
    fn test_from_url() {
        let channel = Channel::from_url(Url::parse("https://host/channel").unwrap());
        assert_eq!(channel.base_url.as_str(), "https://host/channel/");
    }
}
