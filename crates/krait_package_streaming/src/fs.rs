//! Extraction of package archives from files on disk.

use std::fs::File;
use std::path::Path;

use krait_conda_types::package::ArchiveType;

use super::{ExtractError, ExtractResult};

/// Extracts a `.tar.bz2` package archive at the specified path to a
/// directory.
pub fn extract_tar_bz2(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_tar_bz2(std::io::BufReader::new(file), destination)
}

/// Extracts a `.conda` package archive at the specified path to a directory.
pub fn extract_conda(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    let file = File::open(archive)?;
    crate::read::extract_conda(std::io::BufReader::new(file), destination)
}

/// Extracts a package archive at the specified path to a directory. The
/// archive format is determined from the file extension.
pub fn extract(archive: &Path, destination: &Path) -> Result<ExtractResult, ExtractError> {
    match ArchiveType::try_from(archive).ok_or(ExtractError::UnsupportedArchiveType)? {
        ArchiveType::TarBz2 => extract_tar_bz2(archive, destination),
        ArchiveType::Conda => extract_conda(archive, destination),
    }
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use crate::write::{write_conda_package, write_tar_bz2_package};

    fn make_package_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("info")).unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(
            dir.path().join("info/index.json"),
            r#"{"name": "foo", "version": "1.0", "build": "0", "build_number": 0}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("bin/foo"), "#!/bin/sh\necho foo\n").unwrap();
        dir
    }

    fn package_paths(dir: &std::path::Path) -> Vec<PathBuf> {
        vec![dir.join("info/index.json"), dir.join("bin/foo")]
    }

    #[test]
    fn test_tar_bz2_round_trip() {
        let package_dir = make_package_dir();
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = archive_dir.path().join("foo-1.0-0.tar.bz2");

        let file = std::fs::File::create(&archive_path).unwrap();
        write_tar_bz2_package(
            file,
            package_dir.path(),
            &package_paths(package_dir.path()),
            6,
        )
        .unwrap();

        let destination = tempfile::tempdir().unwrap();
        let result = super::extract(&archive_path, destination.path()).unwrap();

        assert!(destination.path().join("info/index.json").is_file());
        assert!(destination.path().join("bin/foo").is_file());

        // The returned hash covers the raw archive bytes.
        let expected =
            krait_digest::compute_file_digest::<krait_digest::Sha256>(&archive_path).unwrap();
        assert_eq!(result.sha256, expected);
    }

    #[test]
    fn test_conda_round_trip() {
        let package_dir = make_package_dir();
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = archive_dir.path().join("foo-1.0-0.conda");

        let file = std::fs::File::create(&archive_path).unwrap();
        write_conda_package(
            file,
            package_dir.path(),
            &package_paths(package_dir.path()),
            3,
        )
        .unwrap();

        let destination = tempfile::tempdir().unwrap();
        super::extract(&archive_path, destination.path()).unwrap();

        assert!(destination.path().join("info/index.json").is_file());
        assert!(destination.path().join("bin/foo").is_file());
    }

    #[test]
    fn test_unsupported_extension() {
        let err = super::extract(
            std::path::Path::new("foo-1.0-0.zip"),
            std::path::Path::new("/tmp/nonexistent"),
        )
        .unwrap_err();
        assert!(matches!(err, crate::ExtractError::UnsupportedArchiveType));
    }
}
