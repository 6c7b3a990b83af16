use std::fmt::{Display, Formatter};
use std::io::Write;
use std::path::{Path, PathBuf};

use fxhash::FxHashMap;
use parking_lot::Mutex;
use krait_conda_types::package::{ArchiveIdentifier, ArchiveType};
use krait_conda_types::RepoDataRecord;
use url::Url;

use crate::validation::{validate_extracted_dir, validate_tarball};

/// Identifies a package within a cache directory:
/// `<name>-<version>-<build>`.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct CacheKey {
    name: String,
    version: String,
    build_string: String,
}

impl CacheKey {
    /// The directory name of the extracted package tree.
    pub fn directory_name(&self) -> String {
        self.to_string()
    }

    /// The file name of the package archive for the given format.
    pub fn archive_file_name(&self, archive_type: ArchiveType) -> String {
        format!("{}{}", self, archive_type.extension())
    }
}

impl From<&RepoDataRecord> for CacheKey {
    fn from(record: &RepoDataRecord) -> Self {
        Self {
            name: record.package_record.name.as_normalized().to_owned(),
            version: record.package_record.version.as_str(),
            build_string: record.package_record.build.clone(),
        }
    }
}

impl From<ArchiveIdentifier> for CacheKey {
    fn from(identifier: ArchiveIdentifier) -> Self {
        Self {
            name: identifier.name,
            version: identifier.version,
            build_string: identifier.build_string,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.build_string)
    }
}

/// An error that can occur while working with the package cache.
#[derive(Debug, thiserror::Error)]
pub enum PackageCacheError {
    /// None of the configured cache directories is writable.
    #[error("no writable package cache directory available")]
    NoWritableCache,

    /// An io error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

#[derive(Default)]
struct QueryCache {
    /// Memoized tarball validation results keyed by (cache index, cache
    /// key).
    tarball: FxHashMap<(usize, String), Option<PathBuf>>,

    /// Memoized extracted-tree validation results keyed the same way.
    extracted: FxHashMap<(usize, String), Option<PathBuf>>,

    /// Memoized per-directory write test results.
    writable: FxHashMap<usize, bool>,
}

/// An ordered list of package cache directories.
///
/// Queries walk the directories in order and return the first entry that
/// passes validation; the first writable directory is the target for new
/// downloads. Validation results are memoized until
/// [`MultiPackageCache::clear_query_cache`] is called for the package.
pub struct MultiPackageCache {
    caches: Vec<PathBuf>,
    query_cache: Mutex<QueryCache>,
}

impl MultiPackageCache {
    /// Constructs a new cache from an ordered list of directories.
    pub fn new(caches: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            caches: caches.into_iter().collect(),
            query_cache: Mutex::new(QueryCache::default()),
        }
    }

    /// Constructs a cache consisting of a single directory.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self::new([path.into()])
    }

    /// The configured cache directories in search order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.caches
    }

    /// Returns the path of a validated archive of the given package in any
    /// of the caches, or `None`.
    pub fn get_tarball_path(&self, record: &RepoDataRecord) -> Option<PathBuf> {
        let key = CacheKey::from(record);
        let mut query_cache = self.query_cache.lock();
        for (idx, cache) in self.caches.iter().enumerate() {
            let memo_key = (idx, key.to_string());
            if let Some(result) = query_cache.tarball.get(&memo_key) {
                if let Some(path) = result {
                    return Some(path.clone());
                }
                continue;
            }

            let result = self.find_valid_tarball(cache, &key, record);
            query_cache.tarball.insert(memo_key, result.clone());
            if let Some(path) = result {
                return Some(path);
            }
        }
        None
    }

    /// Returns the path of a validated extracted tree of the given package,
    /// or `None`. With `check_only_writable` only the first writable cache
    /// directory is considered.
    pub fn get_extracted_dir_path(
        &self,
        record: &RepoDataRecord,
        check_only_writable: bool,
    ) -> Option<PathBuf> {
        let key = CacheKey::from(record);
        let writable = if check_only_writable {
            Some(self.first_writable_path()?)
        } else {
            None
        };

        let mut query_cache = self.query_cache.lock();
        for (idx, cache) in self.caches.iter().enumerate() {
            if let Some(writable) = &writable {
                if cache != writable {
                    continue;
                }
            }

            let memo_key = (idx, key.to_string());
            if let Some(result) = query_cache.extracted.get(&memo_key) {
                if let Some(path) = result {
                    return Some(path.clone());
                }
                continue;
            }

            let path = cache.join(key.directory_name());
            let result = match validate_extracted_dir(&path, &record.package_record) {
                Ok(()) => Some(path),
                Err(e) => {
                    tracing::debug!(
                        "extracted tree {} is not usable: {e}",
                        path.display()
                    );
                    None
                }
            };
            query_cache.extracted.insert(memo_key, result.clone());
            if let Some(path) = result {
                return Some(path);
            }
        }
        None
    }

    /// Returns the first cache directory that passes a write test, creating
    /// it if necessary.
    pub fn first_writable_path(&self) -> Option<PathBuf> {
        let mut query_cache = self.query_cache.lock();
        for (idx, cache) in self.caches.iter().enumerate() {
            let writable = *query_cache
                .writable
                .entry(idx)
                .or_insert_with(|| is_writable(cache));
            if writable {
                return Some(cache.clone());
            }
        }
        None
    }

    /// Invalidates all memoized validation results for the given package.
    pub fn clear_query_cache(&self, record: &RepoDataRecord) {
        let key = CacheKey::from(record).to_string();
        let mut query_cache = self.query_cache.lock();
        query_cache.tarball.retain(|(_, k), _| k != &key);
        query_cache.extracted.retain(|(_, k), _| k != &key);
    }

    fn find_valid_tarball(
        &self,
        cache: &Path,
        key: &CacheKey,
        record: &RepoDataRecord,
    ) -> Option<PathBuf> {
        // Prefer the archive format the record refers to but accept either.
        let mut file_names = vec![
            key.archive_file_name(ArchiveType::Conda),
            key.archive_file_name(ArchiveType::TarBz2),
        ];
        if let Some(archive_type) = ArchiveType::try_from(&record.file_name) {
            if archive_type == ArchiveType::TarBz2 {
                file_names.reverse();
            }
        }

        for file_name in file_names {
            let path = cache.join(file_name);
            match validate_tarball(&path, &record.package_record) {
                Ok(()) => return Some(path),
                Err(e) => {
                    tracing::debug!("archive {} is not usable: {e}", path.display());
                }
            }
        }
        None
    }
}

fn is_writable(cache: &Path) -> bool {
    if std::fs::create_dir_all(cache).is_err() {
        return false;
    }
    let probe = cache.join(format!(".write-test-{}", uuid::Uuid::new_v4()));
    match std::fs::File::create(&probe) {
        Ok(mut file) => {
            let ok = file.write_all(b"probe").is_ok();
            drop(file);
            let _ = std::fs::remove_file(&probe);
            ok
        }
        Err(_) => false,
    }
}

/// Appends a source url to the `urls.txt` file of a cache directory. The
/// write is serialized behind a process-wide mutex since multiple extract
/// tasks may finish concurrently.
pub fn append_url(cache: &Path, url: &Url) -> Result<(), std::io::Error> {
    static URLS_TXT_LOCK: Mutex<()> = Mutex::new(());

    let _guard = URLS_TXT_LOCK.lock();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(cache.join("urls.txt"))?;
    writeln!(file, "{url}")?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;
    use std::str::FromStr;

    use krait_conda_types::{PackageName, PackageRecord, RepoDataRecord, Version};

    use super::{append_url, CacheKey, MultiPackageCache};

    fn record(with_hash: bool) -> RepoDataRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked("bar"),
            Version::from_str("2.0").unwrap(),
            "0".to_owned(),
        );
        package_record.subdir = "linux-64".to_owned();
        if with_hash {
            package_record.size = Some(5);
            package_record.sha256 = Some(krait_digest::compute_bytes_digest::<
                krait_digest::Sha256,
            >(b"bytes"));
        }
        RepoDataRecord {
            package_record,
            file_name: "bar-2.0-0.tar.bz2".to_owned(),
            url: "https://example.com/linux-64/bar-2.0-0.tar.bz2".parse().unwrap(),
            channel: "https://example.com".to_owned(),
        }
    }

    #[test]
    fn test_cache_key() {
        let key = CacheKey::from(&record(false));
        assert_eq!(key.to_string(), "bar-2.0-0");
        assert_eq!(
            key.archive_file_name(krait_conda_types::package::ArchiveType::TarBz2),
            "bar-2.0-0.tar.bz2"
        );
    }

    #[test]
    fn test_tarball_found_in_second_cache() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        std::fs::write(second.path().join("bar-2.0-0.tar.bz2"), b"bytes").unwrap();

        let cache = MultiPackageCache::new([
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ]);
        let record = record(true);

        let path = cache.get_tarball_path(&record).unwrap();
        assert_eq!(path, second.path().join("bar-2.0-0.tar.bz2"));

        // The extracted tree does not exist yet.
        assert!(cache.get_extracted_dir_path(&record, false).is_none());

        // The first cache is the write target.
        assert_eq!(
            cache.first_writable_path().unwrap(),
            first.path().to_path_buf()
        );
    }

    #[test]
    fn test_query_cache_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MultiPackageCache::from_path(dir.path().to_path_buf());
        let record = record(true);

        // The negative result is memoized.
        assert!(cache.get_tarball_path(&record).is_none());
        std::fs::write(dir.path().join("bar-2.0-0.tar.bz2"), b"bytes").unwrap();
        assert!(cache.get_tarball_path(&record).is_none());

        // Until the query cache for the package is cleared.
        cache.clear_query_cache(&record);
        assert!(cache.get_tarball_path(&record).is_some());
    }

    #[test]
    fn test_first_writable_skips_unwritable() {
        let writable = tempfile::tempdir().unwrap();
        let cache = MultiPackageCache::new([
            PathBuf::from("/proc/definitely-not-writable"),
            writable.path().to_path_buf(),
        ]);
        assert_eq!(
            cache.first_writable_path().unwrap(),
            writable.path().to_path_buf()
        );
    }

    #[test]
    fn test_append_url() {
        let dir = tempfile::tempdir().unwrap();
        let url = url::Url::parse("https://example.com/linux-64/bar-2.0-0.tar.bz2").unwrap();
        append_url(dir.path(), &url).unwrap();
        append_url(dir.path(), &url).unwrap();

        let contents = std::fs::read_to_string(dir.path().join("urls.txt")).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().all(|line| line == url.as_str()));
    }
}
