//! The download and extract pipeline that materializes the packages of a
//! transaction in the package cache.
//!
//! For every package that is not already validly extracted, either the
//! cached archive is extracted, or the archive is downloaded first. The two
//! stages are gated by the separate download and extract limits of the
//! [`InstallDriver`](crate::install::InstallDriver); a single package always
//! runs download → validate → extract in sequence while different packages
//! proceed independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::{StreamExt, TryStreamExt};
use krait_cache::{append_url, CacheKey, MultiPackageCache};
use krait_cache::validation::{FETCH_IN_PROGRESS_SENTINEL, REPODATA_RECORD_FILE};
use krait_conda_types::RepoDataRecord;
use krait_package_streaming::ExtractError;

use crate::install::InstallDriver;

/// An error produced by the fetch pipeline. Any error aborts the
/// transaction before a single link operation runs.
#[derive(Debug, thiserror::Error)]
pub enum FetchPipelineError {
    /// No cache directory is writable.
    #[error("no writable package cache directory available")]
    NoWritableCache,

    /// Downloading an archive failed. A checksum mismatch is fatal per
    /// package and not retried within a run.
    #[error("failed to download {url}")]
    DownloadFailed {
        /// The url that failed to download.
        url: url::Url,
        /// The underlying error.
        #[source]
        source: ExtractError,
    },

    /// Extracting an archive failed.
    #[error("failed to extract {package}")]
    ExtractFailed {
        /// The package that failed to extract.
        package: String,
        /// The underlying error.
        #[source]
        source: ExtractError,
    },

    /// An io error occurred while managing cache files.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,
}

/// Ensures every record is validly extracted in the cache and returns the
/// extracted directory per package (keyed by the cache key string).
///
/// Downloads start in order of descending archive size so the large
/// transfers begin early; completions happen in any order.
pub async fn populate_caches(
    records: &[RepoDataRecord],
    cache: &MultiPackageCache,
    client: &reqwest::Client,
    driver: &InstallDriver,
) -> Result<HashMap<String, PathBuf>, FetchPipelineError> {
    // Deduplicate by cache key; a transaction may refer to the same archive
    // more than once (reinstalls).
    let mut unique: HashMap<String, &RepoDataRecord> = HashMap::new();
    for record in records {
        unique
            .entry(CacheKey::from(record).to_string())
            .or_insert(record);
    }

    // Start order: descending size.
    let mut pending: Vec<(&str, &RepoDataRecord)> = unique
        .iter()
        .map(|(key, record)| (key.as_str(), *record))
        .collect();
    pending.sort_by_key(|(_, record)| std::cmp::Reverse(record.package_record.size.unwrap_or(0)));

    let concurrency = pending.len().max(1);
    futures::stream::iter(pending.into_iter().map(|(key, record)| {
        let key = key.to_owned();
        async move {
            let path = populate_one(record, cache, client, driver).await?;
            Ok::<_, FetchPipelineError>((key, path))
        }
    }))
    .buffer_unordered(concurrency)
    .try_collect()
    .await
}

/// Makes sure a single record is validly extracted, downloading the archive
/// first if necessary.
async fn populate_one(
    record: &RepoDataRecord,
    cache: &MultiPackageCache,
    client: &reqwest::Client,
    driver: &InstallDriver,
) -> Result<PathBuf, FetchPipelineError> {
    if driver.is_cancelled() {
        return Err(FetchPipelineError::Cancelled);
    }

    // Fast path: a valid extracted tree exists somewhere.
    if let Some(dir) = cache.get_extracted_dir_path(record, false) {
        return Ok(dir);
    }

    // Reuse a cached archive when its checksum validates; no network I/O
    // happens in that case.
    let (tarball_path, downloaded) = match cache.get_tarball_path(record) {
        Some(path) => (path, false),
        None => {
            let cache_dir = cache
                .first_writable_path()
                .ok_or(FetchPipelineError::NoWritableCache)?;
            let destination = cache_dir.join(&record.file_name);

            let _permit = driver.acquire_download_permit().await;
            if driver.is_cancelled() {
                return Err(FetchPipelineError::Cancelled);
            }

            krait_package_streaming::reqwest::download(
                client,
                record.url.clone(),
                &destination,
                record.package_record.size,
                record.package_record.sha256,
                record.package_record.md5,
                &driver.cancellation_flag(),
            )
            .await
            .map_err(|source| match source {
                ExtractError::Cancelled => FetchPipelineError::Cancelled,
                source => FetchPipelineError::DownloadFailed {
                    url: record.url.clone(),
                    source,
                },
            })?;

            (destination, true)
        }
    };

    // Extract next to the archive so both live in the same cache
    // directory.
    let cache_dir = tarball_path
        .parent()
        .expect("a cached archive always has a parent directory")
        .to_owned();

    let _permit = driver.acquire_extract_permit().await;
    if driver.is_cancelled() {
        return Err(FetchPipelineError::Cancelled);
    }

    let extracted_dir = {
        let tarball_path = tarball_path.clone();
        let cache_dir = cache_dir.clone();
        let record = record.clone();
        let file_name = record.file_name.clone();
        tokio::task::spawn_blocking(move || extract_into_cache(&tarball_path, &cache_dir, &record))
            .await
            .expect("the extract task never panics")
            .map_err(|source| FetchPipelineError::ExtractFailed {
                package: file_name,
                source,
            })?
    };

    cache.clear_query_cache(record);

    if downloaded {
        append_url(&cache_dir, &record.url)?;
    }

    Ok(extracted_dir)
}

/// Extracts an archive into its cache directory.
///
/// The extraction happens in a temporary sibling directory carrying the
/// in-progress sentinel; only a fully extracted tree (with its
/// `repodata_record.json` written last) is renamed into its final place.
fn extract_into_cache(
    tarball_path: &Path,
    cache_dir: &Path,
    record: &RepoDataRecord,
) -> Result<PathBuf, ExtractError> {
    let key = CacheKey::from(record);
    let final_dir = cache_dir.join(key.directory_name());

    let temp_dir = tempfile::Builder::new()
        .prefix(&format!(".extract-{key}-"))
        .tempdir_in(cache_dir)?;

    // The sentinel marks the tree as incomplete for any reader that sees
    // the temporary directory.
    std::fs::create_dir_all(temp_dir.path().join("info"))?;
    std::fs::write(temp_dir.path().join(FETCH_IN_PROGRESS_SENTINEL), b"")?;

    krait_package_streaming::fs::extract(tarball_path, temp_dir.path())?;

    // Record which package lives here; written atomically, readers treat a
    // missing record as an incomplete extraction.
    let record_path = temp_dir.path().join(REPODATA_RECORD_FILE);
    let mut record_file = tempfile::NamedTempFile::new_in(temp_dir.path().join("info"))?;
    serde_json::to_writer_pretty(&mut record_file, record)
        .map_err(|e| ExtractError::IoError(e.into()))?;
    record_file.as_file().sync_all()?;
    record_file
        .persist(&record_path)
        .map_err(|e| ExtractError::IoError(e.error))?;

    std::fs::remove_file(temp_dir.path().join(FETCH_IN_PROGRESS_SENTINEL))?;

    // Swap the tree into place. A stale invalid tree is replaced.
    if final_dir.exists() {
        std::fs::remove_dir_all(&final_dir)?;
    }
    let temp_path = temp_dir.into_path();
    std::fs::rename(&temp_path, &final_dir)?;

    Ok(final_dir)
}
