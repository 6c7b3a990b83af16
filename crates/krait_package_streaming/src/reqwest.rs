//! Downloading of package archives over HTTP.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use krait_digest::digest::Digest;
use krait_digest::{Md5, Md5Hash, Sha256, Sha256Hash};
use tokio::io::AsyncWriteExt;
use url::Url;

use super::ExtractError;

/// The result of a successful download.
#[derive(Debug)]
pub struct DownloadResult {
    /// The SHA256 hash of the downloaded bytes.
    pub sha256: Sha256Hash,

    /// The MD5 hash of the downloaded bytes.
    pub md5: Md5Hash,

    /// The number of bytes downloaded.
    pub bytes: u64,
}

/// Downloads a package archive to the given destination path.
///
/// The data is streamed to a temporary sibling file while both digests are
/// computed on the fly; the file is renamed into place only when the size
/// and checksum validations pass. `file://` urls are served from the local
/// filesystem without touching the network.
///
/// The `cancel` flag is polled between chunks; a raised flag aborts the
/// transfer and leaves no partial file behind.
pub async fn download(
    client: &reqwest::Client,
    url: Url,
    destination: &Path,
    expected_size: Option<u64>,
    expected_sha256: Option<Sha256Hash>,
    expected_md5: Option<Md5Hash>,
    cancel: &AtomicBool,
) -> Result<DownloadResult, ExtractError> {
    let parent = destination
        .parent()
        .ok_or_else(|| ExtractError::CouldNotCreateDestination(std::io::Error::other(
            "destination has no parent directory",
        )))?;
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(ExtractError::CouldNotCreateDestination)?;

    let temp_file = tempfile::Builder::new()
        .prefix(".krait-download-")
        .tempfile_in(parent)?;

    let mut sha256 = Sha256::default();
    let mut md5 = Md5::default();
    let mut total_bytes = 0u64;

    if url.scheme() == "file" {
        let source = url
            .to_file_path()
            .map_err(|()| ExtractError::UnsupportedArchiveType)?;
        let contents = tokio::fs::read(&source).await?;
        sha256.update(&contents);
        md5.update(&contents);
        total_bytes = contents.len() as u64;
        tokio::fs::write(temp_file.path(), &contents).await?;
    } else {
        tracing::debug!("downloading {url} to {}", destination.display());
        let mut response = client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let mut file = tokio::fs::File::from_std(temp_file.reopen()?);
        while let Some(chunk) = response.chunk().await? {
            if cancel.load(Ordering::Relaxed) {
                return Err(ExtractError::Cancelled);
            }
            sha256.update(&chunk);
            md5.update(&chunk);
            total_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
    }

    let sha256 = sha256.finalize();
    let md5 = md5.finalize();

    // Size first, it is the cheapest mismatch to detect.
    if let Some(expected) = expected_size {
        if expected != total_bytes {
            return Err(ExtractError::SizeMismatch {
                expected,
                actual: total_bytes,
            });
        }
    }

    // Prefer sha256; fall back to md5 only when no sha256 is known.
    if let Some(expected) = expected_sha256 {
        if expected != sha256 {
            return Err(ExtractError::HashMismatch {
                expected: format!("{expected:x}"),
                actual: format!("{sha256:x}"),
            });
        }
    } else if let Some(expected) = expected_md5 {
        if expected != md5 {
            return Err(ExtractError::HashMismatch {
                expected: format!("{expected:x}"),
                actual: format!("{md5:x}"),
            });
        }
    }

    temp_file
        .persist(destination)
        .map_err(|e| ExtractError::IoError(e.error))?;

    Ok(DownloadResult {
        sha256,
        md5,
        bytes: total_bytes,
    })
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;

    use url::Url;

    use super::download;
    use crate::ExtractError;

    #[tokio::test]
    async fn test_download_from_file_url() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("foo-1.0-0.tar.bz2");
        std::fs::write(&source, b"not really an archive").unwrap();
        let expected =
            krait_digest::compute_file_digest::<krait_digest::Sha256>(&source).unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let destination = dest_dir.path().join("foo-1.0-0.tar.bz2");
        let cancel = AtomicBool::new(false);

        let result = download(
            &reqwest::Client::new(),
            Url::from_file_path(&source).unwrap(),
            &destination,
            Some(21),
            Some(expected),
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert!(destination.is_file());
        assert_eq!(result.bytes, 21);
        assert_eq!(result.sha256, expected);
    }

    #[tokio::test]
    async fn test_download_checksum_mismatch_removes_file() {
        let source_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("foo-1.0-0.tar.bz2");
        std::fs::write(&source, b"payload").unwrap();

        let dest_dir = tempfile::tempdir().unwrap();
        let destination = dest_dir.path().join("foo-1.0-0.tar.bz2");
        let cancel = AtomicBool::new(false);

        let bad_hash = krait_digest::compute_bytes_digest::<krait_digest::Sha256>(b"other");
        let err = download(
            &reqwest::Client::new(),
            Url::from_file_path(&source).unwrap(),
            &destination,
            None,
            Some(bad_hash),
            None,
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExtractError::HashMismatch { .. }));
        assert!(!destination.exists());
        // No temporary files are left behind either.
        assert_eq!(std::fs::read_dir(dest_dir.path()).unwrap().count(), 0);
    }
}
