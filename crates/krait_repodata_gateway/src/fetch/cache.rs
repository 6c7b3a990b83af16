//! The `repodata.state.json` sidecar file: everything needed to decide
//! whether the cached `repodata.json` payload is still usable and to issue
//! conditional requests.

use std::path::Path;
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::Url;

/// Representation of the `repodata.state.json` file alongside a cached
/// `repodata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDataState {
    /// The url the payload was downloaded from. This is the url of the
    /// `repodata.json` or `repodata.json.zst`, not the subdir url.
    pub url: Url,

    /// The `ETag` header of the last response, replayed as `If-None-Match`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    /// The `Last-Modified` header of the last response, replayed as
    /// `If-Modified-Since`.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "mod")]
    pub last_modified: Option<String>,

    /// The modification time of the payload on disk, nanoseconds since the
    /// unix epoch. Used to detect out-of-band modification of the payload.
    #[serde(
        rename = "mtime_ns",
        deserialize_with = "time_from_nanos",
        serialize_with = "time_to_nanos"
    )]
    pub cache_last_modified: SystemTime,

    /// The size of the payload on disk in bytes.
    #[serde(rename = "size")]
    pub cache_size: u64,

    /// Whether a `.zst` variant of the payload is available upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_zst: Option<Expiring<bool>>,
}

impl RepoDataState {
    /// Reads and parses a state file from disk.
    pub fn from_path(path: &Path) -> Result<RepoDataState, std::io::Error> {
        let content = fs_err::read_to_string(path)?;
        Ok(Self::from_str(&content)?)
    }

    /// Saves the state to the specified file, via a temporary sibling.
    pub fn to_path(&self, path: &Path) -> Result<(), std::io::Error> {
        let parent = path
            .parent()
            .expect("a state file path always has a parent");
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, self)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl FromStr for RepoDataState {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

/// A value and the time it was last checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiring<T> {
    /// The cached value.
    pub value: T,

    /// When the value was determined.
    pub last_checked: chrono::DateTime<chrono::Utc>,
}

impl<T> Expiring<T> {
    /// Returns the value if it was checked within the given window.
    pub fn value(&self, expiration: chrono::Duration) -> Option<&T> {
        if chrono::Utc::now().signed_duration_since(self.last_checked) >= expiration {
            None
        } else {
            Some(&self.value)
        }
    }
}

fn time_from_nanos<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    SystemTime::UNIX_EPOCH
        .checked_add(std::time::Duration::from_nanos(Deserialize::deserialize(
            deserializer,
        )?))
        .ok_or_else(|| D::Error::custom("the time cannot be represented internally"))
}

fn time_to_nanos<S: Serializer>(time: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
    use serde::ser::Error;
    (time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(|_err| S::Error::custom("time predates the unix epoch"))?
        .as_nanos() as u64)
        .serialize(s)
}
