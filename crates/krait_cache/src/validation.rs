//! Validation of cached package archives and extracted package trees.

use std::path::Path;

use krait_conda_types::{PackageRecord, RepoDataRecord};

/// The name of the sentinel file that marks an extraction as in progress.
/// An extracted tree that still contains this file was never completed and
/// is treated as invalid.
pub const FETCH_IN_PROGRESS_SENTINEL: &str = "info/.fetch-in-progress";

/// The name of the record file written into an extracted tree when the
/// extraction completed successfully.
pub const REPODATA_RECORD_FILE: &str = "info/repodata_record.json";

/// An error describing why a cached entity failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The entity does not exist in this cache.
    #[error("not present in the cache")]
    NotPresent,

    /// The archive size does not match the record.
    #[error("archive size mismatch: expected {expected}, found {actual}")]
    SizeMismatch {
        /// The size recorded in the repodata.
        expected: u64,
        /// The size of the file on disk.
        actual: u64,
    },

    /// The archive checksum does not match the record.
    #[error("archive checksum mismatch")]
    ChecksumMismatch,

    /// The record has no checksum to validate against.
    #[error("the record carries no checksum")]
    NoChecksum,

    /// The extraction never completed.
    #[error("the extraction is incomplete")]
    IncompleteExtraction,

    /// The extracted tree belongs to a different package.
    #[error("the extracted tree belongs to a different package")]
    RecordMismatch,

    /// An io error occurred while validating.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Validates a cached package archive against its repodata record.
///
/// The archive is valid iff its size matches the recorded size (when known)
/// and its sha256 matches the recorded digest, or, lacking a recorded
/// sha256, its md5 does.
pub fn validate_tarball(path: &Path, record: &PackageRecord) -> Result<(), ValidationError> {
    let metadata = match path.metadata() {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(ValidationError::NotPresent),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::NotPresent)
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(expected_size) = record.size {
        if metadata.len() != expected_size {
            return Err(ValidationError::SizeMismatch {
                expected: expected_size,
                actual: metadata.len(),
            });
        }
    }

    if let Some(expected_sha256) = &record.sha256 {
        let actual = krait_digest::compute_file_digest::<krait_digest::Sha256>(path)?;
        if &actual != expected_sha256 {
            return Err(ValidationError::ChecksumMismatch);
        }
        return Ok(());
    }

    if let Some(expected_md5) = &record.md5 {
        let actual = krait_digest::compute_file_digest::<krait_digest::Md5>(path)?;
        if &actual != expected_md5 {
            return Err(ValidationError::ChecksumMismatch);
        }
        return Ok(());
    }

    // Without any checksum we only know the size matched. Accept the
    // archive when a size was recorded, reject it otherwise.
    if record.size.is_some() {
        Ok(())
    } else {
        Err(ValidationError::NoChecksum)
    }
}

/// Validates an extracted package tree.
///
/// The tree is valid iff it contains an `info/repodata_record.json` whose
/// `(name, version, build, subdir)` matches the given record and the
/// in-progress sentinel is absent.
pub fn validate_extracted_dir(
    path: &Path,
    record: &PackageRecord,
) -> Result<(), ValidationError> {
    if !path.is_dir() {
        return Err(ValidationError::NotPresent);
    }

    if path.join(FETCH_IN_PROGRESS_SENTINEL).exists() {
        return Err(ValidationError::IncompleteExtraction);
    }

    let record_path = path.join(REPODATA_RECORD_FILE);
    let contents = match fs_err::read_to_string(&record_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::IncompleteExtraction)
        }
        Err(e) => return Err(e.into()),
    };
    let cached: RepoDataRecord = match serde_json::from_str(&contents) {
        Ok(cached) => cached,
        Err(_) => return Err(ValidationError::RecordMismatch),
    };

    let cached = &cached.package_record;
    if cached.name != record.name
        || cached.version != record.version
        || cached.build != record.build
        || cached.subdir != record.subdir
    {
        return Err(ValidationError::RecordMismatch);
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use assert_matches::assert_matches;
    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};

    use super::{validate_extracted_dir, validate_tarball, ValidationError};

    fn record() -> PackageRecord {
        let mut record = PackageRecord::new(
            PackageName::new_unchecked("foo"),
            Version::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        record.subdir = "linux-64".to_owned();
        record
    }

    fn repodata_record(package_record: PackageRecord) -> RepoDataRecord {
        RepoDataRecord {
            file_name: "foo-1.0-0.tar.bz2".to_owned(),
            url: "https://example.com/linux-64/foo-1.0-0.tar.bz2".parse().unwrap(),
            channel: "https://example.com".to_owned(),
            package_record,
        }
    }

    #[test]
    fn test_validate_tarball() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo-1.0-0.tar.bz2");
        std::fs::write(&path, b"archive bytes").unwrap();

        let mut rec = record();
        rec.size = Some(13);
        rec.sha256 = Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
            b"archive bytes",
        ));
        assert!(validate_tarball(&path, &rec).is_ok());

        // A wrong size fails before any checksum is computed.
        rec.size = Some(14);
        assert_matches!(
            validate_tarball(&path, &rec),
            Err(ValidationError::SizeMismatch { .. })
        );

        // A wrong hash fails.
        rec.size = Some(13);
        rec.sha256 = Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
            b"other bytes",
        ));
        assert_matches!(
            validate_tarball(&path, &rec),
            Err(ValidationError::ChecksumMismatch)
        );

        // Lacking sha256, md5 is used.
        rec.sha256 = None;
        rec.md5 = Some(krait_digest::compute_bytes_digest::<krait_digest::Md5>(
            b"archive bytes",
        ));
        assert!(validate_tarball(&path, &rec).is_ok());

        // A missing file is simply not present.
        assert_matches!(
            validate_tarball(&dir.path().join("missing.tar.bz2"), &rec),
            Err(ValidationError::NotPresent)
        );
    }

    #[test]
    fn test_validate_extracted_dir() {
        let dir = tempfile::tempdir().unwrap();
        let package_dir = dir.path().join("foo-1.0-0");
        std::fs::create_dir_all(package_dir.join("info")).unwrap();

        // Without the record the extraction is incomplete.
        assert_matches!(
            validate_extracted_dir(&package_dir, &record()),
            Err(ValidationError::IncompleteExtraction)
        );

        let repodata = repodata_record(record());
        std::fs::write(
            package_dir.join("info/repodata_record.json"),
            serde_json::to_string(&repodata).unwrap(),
        )
        .unwrap();
        assert!(validate_extracted_dir(&package_dir, &record()).is_ok());

        // The sentinel invalidates the tree even with a record present.
        std::fs::write(package_dir.join("info/.fetch-in-progress"), b"").unwrap();
        assert_matches!(
            validate_extracted_dir(&package_dir, &record()),
            Err(ValidationError::IncompleteExtraction)
        );
        std::fs::remove_file(package_dir.join("info/.fetch-in-progress")).unwrap();

        // A record for a different package does not validate.
        let mut other = record();
        other.build = "1".to_owned();
        assert_matches!(
            validate_extracted_dir(&package_dir, &other),
            Err(ValidationError::RecordMismatch)
        );
    }
}
