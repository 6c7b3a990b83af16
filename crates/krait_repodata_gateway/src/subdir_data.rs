use std::path::{Path, PathBuf};

use krait_conda_types::{Channel, Platform, RepoData, RepoDataRecord};

use crate::fetch::{
    fetch_repo_data, CacheAction, FetchOptions, FetchRepoDataError, REPODATA_FILE,
};

/// An error that can occur while loading the records of a subdir.
#[derive(Debug, thiserror::Error)]
pub enum SubdirDataError {
    /// Fetching the repodata failed.
    #[error(transparent)]
    FetchError(#[from] FetchRepoDataError),

    /// The repodata was malformed even after quarantining the cached file
    /// and refetching once.
    #[error("malformed repodata for {channel} {subdir}: {source}")]
    MalformedRepoData {
        /// The channel the repodata belongs to.
        channel: String,
        /// The subdir the repodata belongs to.
        subdir: String,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// An io error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Owns the repodata of one `(channel, subdir)` pair: its cache directory
/// and the fetch logic to keep it up to date.
pub struct SubdirData {
    channel: Channel,
    subdir: String,
    cache_dir: PathBuf,
}

impl SubdirData {
    /// Creates a new instance for the given channel and platform. Cache
    /// files live in a directory under `cache_root` derived from the subdir
    /// url.
    pub fn new(channel: Channel, platform: Platform, cache_root: &Path) -> Self {
        let subdir = platform.to_string();
        let cache_dir = cache_root.join(cache_dir_name(&channel, &subdir));
        Self {
            channel,
            subdir,
            cache_dir,
        }
    }

    /// The channel this subdir belongs to.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The subdir (platform) name.
    pub fn subdir(&self) -> &str {
        &self.subdir
    }

    /// The directory holding the cached `repodata.json` and its state file.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Fetches (or reuses) the repodata of this subdir and parses it into
    /// [`RepoDataRecord`]s.
    ///
    /// A cached payload that fails to parse is quarantined by renaming it
    /// with a `.bad` suffix and the repodata is fetched once more; a second
    /// parse failure is fatal for this subdir.
    pub async fn load_records(
        &self,
        client: &reqwest::Client,
        options: &FetchOptions,
    ) -> Result<Vec<RepoDataRecord>, SubdirDataError> {
        let subdir_url = self.channel.platform_url(&self.subdir);

        let cached = fetch_repo_data(subdir_url.clone(), client, &self.cache_dir, options).await?;

        match parse_records(&cached.repo_data_json_path, &self.channel).await {
            Ok(records) => Ok(records),
            Err(parse_error) => {
                tracing::warn!(
                    "malformed repodata at '{}': {parse_error}. Quarantining and refetching...",
                    cached.repo_data_json_path.display()
                );
                self.quarantine(&cached.repo_data_json_path)?;

                let refetched = fetch_repo_data(
                    subdir_url,
                    client,
                    &self.cache_dir,
                    &FetchOptions {
                        cache_action: CacheAction::NoCache,
                        ..options.clone()
                    },
                )
                .await?;

                parse_records(&refetched.repo_data_json_path, &self.channel)
                    .await
                    .map_err(|source| SubdirDataError::MalformedRepoData {
                        channel: self.channel.canonical_name(),
                        subdir: self.subdir.clone(),
                        source,
                    })
            }
        }
    }

    fn quarantine(&self, path: &Path) -> Result<(), std::io::Error> {
        let quarantined = self.cache_dir.join(format!("{REPODATA_FILE}.bad"));
        std::fs::rename(path, quarantined)
    }
}

/// Parses a repodata payload into records on a blocking thread; the files
/// can be hundreds of megabytes.
async fn parse_records(
    path: &Path,
    channel: &Channel,
) -> Result<Vec<RepoDataRecord>, serde_json::Error> {
    let path = path.to_owned();
    let channel = channel.clone();
    tokio::task::spawn_blocking(move || {
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) => return Err(serde_json::Error::io(e)),
        };
        let repo_data: RepoData = serde_json::from_str(&contents)?;
        Ok(repo_data.into_repo_data_records(&channel))
    })
    .await
    .expect("the parsing task never panics")
}

/// Derives a stable directory name for the cache of a subdir from its url.
fn cache_dir_name(channel: &Channel, subdir: &str) -> String {
    let url = channel.platform_url(subdir);
    let digest = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(url.as_str());
    let hex = format!("{digest:x}");
    format!("{}-{subdir}", &hex[..16])
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;
    use krait_conda_types::{Channel, ChannelConfig, Platform};
    use url::Url;

    use crate::fetch::FetchOptions;

    use super::{SubdirData, SubdirDataError};

    fn local_channel(repodata: &str) -> (tempfile::TempDir, Channel) {
        let dir = tempfile::tempdir().unwrap();
        let subdir = dir.path().join("linux-64");
        std::fs::create_dir_all(&subdir).unwrap();
        std::fs::write(subdir.join("repodata.json"), repodata).unwrap();
        let channel = Channel::from_url(Url::from_directory_path(dir.path()).unwrap());
        (dir, channel)
    }

    const REPODATA: &str = r#"{
        "info": {"subdir": "linux-64"},
        "packages": {
            "foo-1.0-0.tar.bz2": {
                "name": "foo",
                "version": "1.0",
                "build": "0",
                "build_number": 0,
                "depends": [],
                "subdir": "linux-64"
            }
        },
        "packages.conda": {}
    }"#;

    #[tokio::test]
    async fn test_load_records() {
        let (_channel_dir, channel) = local_channel(REPODATA);
        let cache_root = tempfile::tempdir().unwrap();

        let subdir_data = SubdirData::new(channel.clone(), Platform::Linux64, cache_root.path());
        let records = subdir_data
            .load_records(&reqwest::Client::new(), &FetchOptions::default())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.package_record.name.as_normalized(), "foo");
        assert_eq!(record.file_name, "foo-1.0-0.tar.bz2");
        assert_eq!(
            record.url.as_str(),
            format!("{}linux-64/foo-1.0-0.tar.bz2", channel.base_url)
        );
    }

    #[tokio::test]
    async fn test_malformed_repodata_is_quarantined() {
        let (_channel_dir, channel) = local_channel("{ not json !");
        let cache_root = tempfile::tempdir().unwrap();

        let subdir_data = SubdirData::new(channel, Platform::Linux64, cache_root.path());
        let err = subdir_data
            .load_records(&reqwest::Client::new(), &FetchOptions::default())
            .await
            .unwrap_err();

        // The upstream file itself is broken, so the refetch fails too.
        assert_matches!(err, SubdirDataError::MalformedRepoData { .. });
        // The first bad payload was quarantined.
        assert!(subdir_data.cache_dir().join("repodata.json.bad").is_file());
    }

    #[test]
    fn test_distinct_cache_dirs() {
        let config = ChannelConfig::default();
        let a = Channel::from_str("conda-forge", &config).unwrap();
        let b = Channel::from_str("bioconda", &config).unwrap();
        let root = std::path::Path::new("/cache");
        assert_ne!(
            SubdirData::new(a.clone(), Platform::Linux64, root).cache_dir(),
            SubdirData::new(b, Platform::Linux64, root).cache_dir()
        );
        assert_ne!(
            SubdirData::new(a.clone(), Platform::Linux64, root).cache_dir(),
            SubdirData::new(a, Platform::NoArch, root).cache_dir()
        );
    }
}
