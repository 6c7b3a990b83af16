use serde::{Deserialize, Serialize};
use url::Url;

use crate::PackageRecord;

/// A [`PackageRecord`] with the context of the channel it came from: the
/// download url, the archive filename and the canonical channel name.
/// Records are deduplicated by `(channel, subdir, file_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoDataRecord {
    /// The data stored in the repodata.json.
    #[serde(flatten)]
    pub package_record: PackageRecord,

    /// The filename of the package archive.
    #[serde(rename = "fn")]
    pub file_name: String,

    /// The canonical url from where the package can be downloaded.
    pub url: Url,

    /// The canonical name of the channel this record came from.
    pub channel: String,
}

impl RepoDataRecord {
    /// The identity of a record used for deduplication across channel
    /// listings.
    pub fn identity(&self) -> (&str, &str, &str) {
        (
            self.channel.as_str(),
            self.package_record.subdir.as_str(),
            self.file_name.as_str(),
        )
    }
}

impl AsRef<PackageRecord> for RepoDataRecord {
    fn as_ref(&self) -> &PackageRecord {
        &self.package_record
    }
}
