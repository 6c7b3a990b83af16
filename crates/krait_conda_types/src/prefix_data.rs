//! [`PrefixData`]: the installed state of an environment prefix.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{PackageName, PackageRecord, PrefixRecord};

/// The set of packages installed in a prefix, loaded from the
/// `<prefix>/conda-meta/*.json` records.
///
/// Each package name is unique within a prefix. The data is loaded fresh per
/// top-level operation and mutated by transaction execution as records are
/// written and removed.
#[derive(Debug, Clone, Default)]
pub struct PrefixData {
    prefix: PathBuf,
    records: BTreeMap<PackageName, PrefixRecord>,
}

impl PrefixData {
    /// Loads the installed state from the given prefix. A prefix without a
    /// `conda-meta` directory is an empty environment.
    pub fn from_prefix(prefix: &Path) -> Result<Self, std::io::Error> {
        let mut records = BTreeMap::new();
        for record in PrefixRecord::collect_from_prefix(prefix)? {
            records.insert(
                record.repodata_record.package_record.name.clone(),
                record,
            );
        }
        Ok(Self {
            prefix: prefix.to_owned(),
            records,
        })
    }

    /// The prefix this data was loaded from.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Returns the record of the package with the given name, if installed.
    pub fn get(&self, name: &PackageName) -> Option<&PrefixRecord> {
        self.records.get(name)
    }

    /// Returns true if a package with the given name is installed.
    pub fn contains(&self, name: &PackageName) -> bool {
        self.records.contains_key(name)
    }

    /// Iterates over the installed records in name order.
    pub fn records(&self) -> impl Iterator<Item = &PrefixRecord> {
        self.records.values()
    }

    /// The number of installed packages.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no packages are installed.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the installed records sorted topologically: every package
    /// comes after the packages it depends on.
    pub fn sorted_topologically(&self) -> Vec<PrefixRecord> {
        PackageRecord::sort_topologically(self.records.values().cloned().collect())
    }

    /// Registers a newly installed record.
    pub fn insert(&mut self, record: PrefixRecord) {
        self.records.insert(
            record.repodata_record.package_record.name.clone(),
            record,
        );
    }

    /// Removes the record of the package with the given name.
    pub fn remove(&mut self, name: &PackageName) -> Option<PrefixRecord> {
        self.records.remove(name)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use crate::{PackageName, PackageRecord, PrefixRecord, RepoDataRecord, Version};

    use super::PrefixData;

    fn record(name: &str, depends: &[&str]) -> PrefixRecord {
        let mut package_record = PackageRecord::new(
            PackageName::new_unchecked(name),
            Version::from_str("1.0").unwrap(),
            "0".to_owned(),
        );
        package_record.depends = depends.iter().map(|d| (*d).to_owned()).collect();
        PrefixRecord::from_repodata_record(
            RepoDataRecord {
                package_record,
                file_name: format!("{name}-1.0-0.tar.bz2"),
                url: format!("https://example.com/{name}-1.0-0.tar.bz2")
                    .parse()
                    .unwrap(),
                channel: "https://example.com".to_owned(),
            },
            None,
            None,
            Vec::new(),
            None,
            None,
        )
    }

    #[test]
    fn test_load_and_sort() {
        let temp_dir = tempfile::tempdir().unwrap();
        let conda_meta = temp_dir.path().join("conda-meta");
        std::fs::create_dir_all(&conda_meta).unwrap();

        for record in [record("b", &["a"]), record("a", &[]), record("c", &["b"])] {
            record
                .write_to_path(conda_meta.join(record.file_name()))
                .unwrap();
        }

        let prefix_data = PrefixData::from_prefix(temp_dir.path()).unwrap();
        assert_eq!(prefix_data.len(), 3);
        assert!(prefix_data.contains(&PackageName::new_unchecked("a")));

        let sorted = prefix_data.sorted_topologically();
        let names: Vec<_> = sorted
            .iter()
            .map(|r| {
                r.repodata_record
                    .package_record
                    .name
                    .as_normalized()
                    .to_owned()
            })
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_missing_prefix_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let prefix_data = PrefixData::from_prefix(&temp_dir.path().join("missing")).unwrap();
        assert!(prefix_data.is_empty());
    }
}
