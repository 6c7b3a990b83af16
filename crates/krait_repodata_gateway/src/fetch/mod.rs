//! Fetching of `repodata.json` files with local caching, conditional
//! requests and transparent zstd decompression.

mod cache;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub use cache::{Expiring, RepoDataState};
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tokio::io::AsyncWriteExt;
use url::Url;

/// The name of the cached payload file.
pub const REPODATA_FILE: &str = "repodata.json";

/// The name of the cache state sidecar file.
pub const REPODATA_STATE_FILE: &str = "repodata.state.json";

/// How long a cached `has_zst` probe result stays valid.
fn zst_availability_expiration() -> chrono::Duration {
    chrono::Duration::days(14)
}

/// An error that can occur while fetching repodata.
#[derive(Debug, thiserror::Error)]
pub enum FetchRepoDataError {
    /// The request failed. Covers connection errors and non-retryable http
    /// status codes.
    #[error(transparent)]
    HttpError(#[from] reqwest::Error),

    /// The repodata does not exist on the server.
    #[error("repodata not found at {0}")]
    NotFound(Url),

    /// The download kept failing with retryable errors.
    #[error("failed to download {0} after {1} attempts")]
    RetriesExhausted(Url, u32),

    /// An io error occurred while reading or writing cache files.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A downloaded temporary file could not be moved into place.
    #[error("failed to persist temporary repodata file")]
    FailedToPersistTemporaryFile(#[from] tempfile::PersistError),

    /// There is no usable cache and fetching was not allowed.
    #[error("there is no cache available")]
    NoCacheAvailable,
}

/// Defines how to use the repodata cache.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheAction {
    /// Use the cache if it is fresh, fetch otherwise.
    #[default]
    CacheOrFetch,

    /// Only use the cache, error out if it is missing or out of date.
    UseCacheOnly,

    /// Only use the cache, regardless of freshness.
    ForceCacheOnly,

    /// Ignore any cached data and always refetch.
    NoCache,
}

/// Options for [`fetch_repo_data`].
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// How to use the local cache.
    pub cache_action: CacheAction,

    /// A cached payload younger than this is used without a network
    /// round-trip.
    pub local_repodata_ttl: Duration,

    /// Whether to prefer the `.zst` variant of the repodata when the server
    /// offers one.
    pub zstd_enabled: bool,

    /// How often to retry a download that fails with a retryable status
    /// (413, 429, 5xx).
    pub max_retries: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            cache_action: CacheAction::default(),
            local_repodata_ttl: Duration::from_secs(60),
            zstd_enabled: true,
            max_retries: 3,
        }
    }
}

/// Indicates how the cache was used to satisfy a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheResult {
    /// The cached payload was fresh enough, no request was made.
    CacheHit,

    /// The server confirmed the cached payload is still valid (304).
    CacheHitAfterFetch,

    /// The cache existed but new data was downloaded.
    CacheOutdated,

    /// There was no usable cache, data was downloaded.
    CacheNotPresent,
}

/// The result of a successful [`fetch_repo_data`] call.
#[derive(Debug)]
pub struct CachedRepoData {
    /// The path of the up-to-date `repodata.json` payload.
    pub repo_data_json_path: PathBuf,

    /// The cache state after the request.
    pub cache_state: RepoDataState,

    /// How the cache was used.
    pub cache_result: CacheResult,
}

/// The outcome of inspecting the local cache files.
#[derive(Debug)]
enum ValidatedCacheState {
    /// No cache, an unreadable cache, or a cache for a different url.
    InvalidOrMissing,

    /// The payload on disk does not match what the state file recorded.
    Mismatched(RepoDataState),

    /// Cache is usable but must be revalidated with the server.
    OutOfDate(RepoDataState),

    /// Cache is fresh, no request needed.
    UpToDate(RepoDataState),
}

/// Fetches the `repodata.json` of the given subdir url into `cache_path`,
/// reusing the cached copy when possible.
///
/// The refresh protocol:
/// 1. a payload younger than `local_repodata_ttl` is used as-is,
/// 2. otherwise a conditional `GET` is issued with `If-None-Match` and
///    `If-Modified-Since`; a `304` refreshes the state file and keeps the
///    payload,
/// 3. a `200` streams the body to a temporary sibling which is renamed over
///    the payload,
/// 4. retryable statuses (413, 429, 5xx) are retried with exponential
///    backoff, honoring `Retry-After`.
///
/// `file://` subdir urls are served by copying the file, without any http.
pub async fn fetch_repo_data(
    subdir_url: Url,
    client: &reqwest::Client,
    cache_path: &Path,
    options: &FetchOptions,
) -> Result<CachedRepoData, FetchRepoDataError> {
    let subdir_url = normalize_subdir_url(subdir_url);
    tokio::fs::create_dir_all(&cache_path).await?;

    let repo_data_json_path = cache_path.join(REPODATA_FILE);
    let cache_state_path = cache_path.join(REPODATA_STATE_FILE);

    // Local directories are simply copied, no http involved.
    if subdir_url.scheme() == "file" {
        return fetch_from_file_url(&subdir_url, &repo_data_json_path, &cache_state_path).await;
    }

    // Inspect the cache.
    let cache_state = if options.cache_action == CacheAction::NoCache {
        None
    } else {
        let state = validate_cached_state(
            cache_path,
            &subdir_url,
            options.local_repodata_ttl,
        );
        match (state, options.cache_action) {
            (ValidatedCacheState::UpToDate(cache_state), _)
            | (ValidatedCacheState::OutOfDate(cache_state), CacheAction::ForceCacheOnly) => {
                return Ok(CachedRepoData {
                    repo_data_json_path,
                    cache_state,
                    cache_result: CacheResult::CacheHit,
                });
            }
            (ValidatedCacheState::OutOfDate(_), CacheAction::UseCacheOnly)
            | (
                ValidatedCacheState::Mismatched(_) | ValidatedCacheState::InvalidOrMissing,
                CacheAction::UseCacheOnly | CacheAction::ForceCacheOnly,
            ) => {
                return Err(FetchRepoDataError::NoCacheAvailable);
            }
            (
                ValidatedCacheState::OutOfDate(cache_state)
                | ValidatedCacheState::Mismatched(cache_state),
                _,
            ) => Some(cache_state),
            (ValidatedCacheState::InvalidOrMissing, _) => None,
        }
    };

    // Determine whether the zst variant is available, preferring the cached
    // probe result.
    let has_zst = if options.zstd_enabled {
        match cache_state
            .as_ref()
            .and_then(|state| state.has_zst.as_ref())
            .and_then(|probe| probe.value(zst_availability_expiration()))
        {
            Some(has_zst) => *has_zst,
            None => {
                let zst_url = subdir_url
                    .join(&format!("{REPODATA_FILE}.zst"))
                    .expect("repodata filename always joins");
                check_valid_download_target(&zst_url, client).await
            }
        }
    } else {
        false
    };
    let has_zst_probe = Some(Expiring {
        value: has_zst,
        last_checked: chrono::Utc::now(),
    });

    let repo_data_url = if has_zst {
        subdir_url
            .join(&format!("{REPODATA_FILE}.zst"))
            .expect("repodata filename always joins")
    } else {
        subdir_url
            .join(REPODATA_FILE)
            .expect("repodata filename always joins")
    };

    // Replay the validators of the previous response.
    let mut headers = HeaderMap::new();
    if let Some(state) = &cache_state {
        if let Some(etag) = state.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(IF_NONE_MATCH, etag);
        }
        if let Some(last_modified) = state
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(IF_MODIFIED_SINCE, last_modified);
        }
    }

    tracing::debug!("fetching '{repo_data_url}'");
    let response = send_with_retry(
        client,
        repo_data_url.clone(),
        headers,
        options.max_retries,
    )
    .await?;

    if response.status() == StatusCode::NOT_MODIFIED {
        tracing::debug!("repodata at '{repo_data_url}' was unmodified");
        let cache_state = RepoDataState {
            url: repo_data_url,
            has_zst: has_zst_probe,
            ..cache_state.expect("a 304 implies a previous response with validators")
        };
        cache_state.to_path(&cache_state_path)?;
        return Ok(CachedRepoData {
            repo_data_json_path,
            cache_state,
            cache_result: CacheResult::CacheHitAfterFetch,
        });
    }

    // A fresh payload. Stream it to a temporary sibling, decompress if the
    // zst variant was downloaded, and atomically rename into place.
    let etag = header_string(&response, reqwest::header::ETAG);
    let last_modified = header_string(&response, reqwest::header::LAST_MODIFIED);

    let temp_file = stream_to_temp_file(response, cache_path, has_zst).await?;
    temp_file.as_file().sync_all()?;
    let file = temp_file.persist(&repo_data_json_path)?;
    let metadata = file.metadata()?;
    drop(file);

    let had_cache = cache_state.is_some();
    let cache_state = RepoDataState {
        url: repo_data_url,
        etag,
        last_modified,
        cache_last_modified: metadata.modified()?,
        cache_size: metadata.len(),
        has_zst: has_zst_probe,
    };
    cache_state.to_path(&cache_state_path)?;

    Ok(CachedRepoData {
        repo_data_json_path,
        cache_state,
        cache_result: if had_cache {
            CacheResult::CacheOutdated
        } else {
            CacheResult::CacheNotPresent
        },
    })
}

/// Serves a `file://` subdir by copying its `repodata.json` into the cache.
async fn fetch_from_file_url(
    subdir_url: &Url,
    repo_data_json_path: &Path,
    cache_state_path: &Path,
) -> Result<CachedRepoData, FetchRepoDataError> {
    let source = subdir_url
        .join(REPODATA_FILE)
        .expect("repodata filename always joins")
        .to_file_path()
        .map_err(|()| {
            FetchRepoDataError::IoError(std::io::Error::other("subdir url is not a local path"))
        })?;

    if let Err(e) = tokio::fs::copy(&source, repo_data_json_path).await {
        return if e.kind() == ErrorKind::NotFound {
            Err(FetchRepoDataError::NotFound(subdir_url.clone()))
        } else {
            Err(FetchRepoDataError::IoError(e))
        };
    }

    let metadata = tokio::fs::metadata(repo_data_json_path).await?;
    let cache_state = RepoDataState {
        url: subdir_url.clone(),
        etag: None,
        last_modified: None,
        cache_last_modified: metadata.modified()?,
        cache_size: metadata.len(),
        has_zst: None,
    };
    cache_state.to_path(cache_state_path)?;

    Ok(CachedRepoData {
        repo_data_json_path: repo_data_json_path.to_owned(),
        cache_state,
        cache_result: CacheResult::CacheHit,
    })
}

/// Sends the request, retrying retryable status codes (413, 429, 5xx) with
/// exponential backoff. A `Retry-After` header takes precedence over the
/// computed backoff.
async fn send_with_retry(
    client: &reqwest::Client,
    url: Url,
    headers: HeaderMap,
    max_retries: u32,
) -> Result<Response, FetchRepoDataError> {
    let mut attempt = 0;
    loop {
        let response = client
            .get(url.clone())
            .headers(headers.clone())
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchRepoDataError::NotFound(url));
        }
        if is_retryable(status) {
            attempt += 1;
            if attempt > max_retries {
                return Err(FetchRepoDataError::RetriesExhausted(url, attempt));
            }
            let delay = retry_after(&response)
                .unwrap_or_else(|| Duration::from_millis(250) * 2u32.pow(attempt - 1));
            tracing::warn!(
                "request to '{url}' returned {status}, retry #{attempt} in {delay:?}"
            );
            tokio::time::sleep(delay).await;
            continue;
        }
        return Ok(response.error_for_status()?);
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::PAYLOAD_TOO_LARGE
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn header_string(response: &Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToOwned::to_owned)
}

/// Streams the response body to a temporary file in `cache_path`,
/// decompressing zstd on the fly when the `.zst` variant was downloaded.
async fn stream_to_temp_file(
    mut response: Response,
    cache_path: &Path,
    is_zst: bool,
) -> Result<tempfile::NamedTempFile, FetchRepoDataError> {
    let temp_file = tempfile::NamedTempFile::new_in(cache_path)?;

    let mut file = tokio::fs::File::from_std(temp_file.reopen()?);
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    drop(file);

    if !is_zst {
        return Ok(temp_file);
    }

    // Decompress into a second temporary file and hand that one back.
    let decoded_file = tempfile::NamedTempFile::new_in(cache_path)?;
    let compressed_path = temp_file.path().to_owned();
    let decoded_path = decoded_file.path().to_owned();
    tokio::task::spawn_blocking(move || -> Result<(), std::io::Error> {
        let compressed = std::fs::File::open(compressed_path)?;
        let mut decoder = zstd::stream::read::Decoder::new(compressed)?;
        let mut out = std::fs::File::create(decoded_path)?;
        std::io::copy(&mut decoder, &mut out)?;
        Ok(())
    })
    .await
    .map_err(|_| std::io::Error::other("decompression task failed"))??;

    Ok(decoded_file)
}

/// Performs a `HEAD` request to see whether the url is downloadable.
async fn check_valid_download_target(url: &Url, client: &reqwest::Client) -> bool {
    tracing::debug!("checking availability of '{url}'");
    match client.head(url.clone()).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::warn!(
                "failed to perform HEAD request on '{url}': {e}. Assuming it is unavailable."
            );
            false
        }
    }
}

/// Ensures the subdir url ends with a trailing slash so joining file names
/// works.
fn normalize_subdir_url(url: Url) -> Url {
    let path = url.path().trim_end_matches('/').to_owned();
    let mut url = url;
    url.set_path(&format!("{path}/"));
    url
}

/// Inspects the cache files on disk and determines how usable they are.
fn validate_cached_state(
    cache_path: &Path,
    subdir_url: &Url,
    ttl: Duration,
) -> ValidatedCacheState {
    let repo_data_json_path = cache_path.join(REPODATA_FILE);
    let cache_state_path = cache_path.join(REPODATA_STATE_FILE);

    let payload_metadata = match std::fs::metadata(&repo_data_json_path) {
        Err(e) if e.kind() == ErrorKind::NotFound => return ValidatedCacheState::InvalidOrMissing,
        Err(e) => {
            tracing::warn!(
                "failed to get metadata of repodata payload '{}': {e}. Ignoring cached files...",
                repo_data_json_path.display()
            );
            return ValidatedCacheState::InvalidOrMissing;
        }
        Ok(metadata) => metadata,
    };

    let (cache_state, state_metadata) = match (
        RepoDataState::from_path(&cache_state_path),
        std::fs::metadata(&cache_state_path),
    ) {
        (Ok(state), Ok(metadata)) => (state, metadata),
        (Err(e), _) if e.kind() == ErrorKind::NotFound => {
            return ValidatedCacheState::InvalidOrMissing
        }
        (Err(e), _) => {
            tracing::warn!("invalid repodata cache state: {e}. Ignoring cached files...");
            return ValidatedCacheState::InvalidOrMissing;
        }
        (_, Err(_)) => return ValidatedCacheState::InvalidOrMissing,
    };

    // The state must refer to the same subdir.
    let cached_subdir_url = {
        let path = cache_state.url.path();
        let (subdir_path, _) = path.rsplit_once('/').unwrap_or(("", path));
        let mut url = cache_state.url.clone();
        url.set_path(&format!("{subdir_path}/"));
        url
    };
    if &cached_subdir_url != subdir_url {
        tracing::warn!("cache state refers to a different url. Ignoring cached files...");
        return ValidatedCacheState::InvalidOrMissing;
    }

    // The payload on disk must be the one the state was written for.
    if payload_metadata.len() != cache_state.cache_size
        || payload_metadata.modified().ok() != Some(cache_state.cache_last_modified)
    {
        tracing::warn!(
            "repodata cache state mismatches the payload on disk. Ignoring cached files..."
        );
        return ValidatedCacheState::Mismatched(cache_state);
    }

    // Freshness is judged by the age of the state file, which is touched
    // whenever the server confirms the payload.
    match state_metadata
        .modified()
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
    {
        Some(age) if age < ttl => ValidatedCacheState::UpToDate(cache_state),
        _ => ValidatedCacheState::OutOfDate(cache_state),
    }
}
