//! End-to-end tests: a local `file://` channel is indexed, solved against,
//! fetched into a package cache and linked into a prefix.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use assert_matches::assert_matches;
use krait::fetch::{populate_caches, FetchPipelineError};
use krait::install::{
    execute_transaction, ExecuteError, ExecuteOptions, InstallDriver, Transaction,
};
use krait_cache::MultiPackageCache;
use krait_conda_types::package::{PathType, PathsEntry, PathsJson};
use krait_conda_types::{
    Channel, ChannelInfo, PackageName, PackageRecord, Platform, PrefixData, RepoData,
    RepoDataRecord, Version,
};
use krait_repodata_gateway::SubdirData;
use krait_solve::{Pool, SolveJobs, Solver, SolverFlags};

/// A local channel directory that test packages are published into.
struct TestChannel {
    dir: tempfile::TempDir,
    repodata: RepoData,
}

impl TestChannel {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("linux-64")).unwrap();
        Self {
            dir,
            repodata: RepoData {
                info: Some(ChannelInfo {
                    subdir: "linux-64".to_owned(),
                    base_url: None,
                }),
                ..RepoData::default()
            },
        }
    }

    /// Builds a `.tar.bz2` package with the given files, writes it into the
    /// channel and registers it in the repodata.
    fn add_package(
        &mut self,
        name: &str,
        version: &str,
        depends: &[&str],
        files: &[(&str, &str)],
    ) -> RepoDataRecord {
        let (archive_path, record) =
            build_package(self.dir.path().join("linux-64"), name, version, depends, files);
        let file_name = archive_path.file_name().unwrap().to_string_lossy().to_string();
        self.repodata
            .packages
            .insert(file_name, record.package_record.clone());
        record
    }

    fn write_repodata(&self) {
        std::fs::write(
            self.dir.path().join("linux-64/repodata.json"),
            serde_json::to_string_pretty(&self.repodata).unwrap(),
        )
        .unwrap();
    }

    fn channel(&self) -> Channel {
        Channel::from_url(url::Url::from_directory_path(self.dir.path()).unwrap())
    }
}

/// Builds a package archive on disk and returns its path and record.
fn build_package(
    subdir_dir: PathBuf,
    name: &str,
    version: &str,
    depends: &[&str],
    files: &[(&str, &str)],
) -> (PathBuf, RepoDataRecord) {
    let stage = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(stage.path().join("info")).unwrap();

    let mut paths = Vec::new();
    let mut archive_members = vec![
        stage.path().join("info/index.json"),
        stage.path().join("info/paths.json"),
    ];
    for (relative_path, contents) in files {
        let full_path = stage.path().join(relative_path);
        std::fs::create_dir_all(full_path.parent().unwrap()).unwrap();
        std::fs::write(&full_path, contents).unwrap();
        archive_members.push(full_path);
        paths.push(PathsEntry {
            relative_path: PathBuf::from(relative_path),
            path_type: PathType::HardLink,
            prefix_placeholder: None,
            file_mode: None,
            no_link: false,
            sha256: Some(krait_digest::compute_bytes_digest::<krait_digest::Sha256>(
                contents,
            )),
            size_in_bytes: Some(contents.len() as u64),
        });
    }

    std::fs::write(
        stage.path().join("info/index.json"),
        serde_json::to_string(&serde_json::json!({
            "name": name,
            "version": version,
            "build": "0",
            "build_number": 0,
            "depends": depends,
            "subdir": "linux-64",
        }))
        .unwrap(),
    )
    .unwrap();
    std::fs::write(
        stage.path().join("info/paths.json"),
        serde_json::to_string(&PathsJson {
            paths_version: 1,
            paths,
        })
        .unwrap(),
    )
    .unwrap();

    let file_name = format!("{name}-{version}-0.tar.bz2");
    std::fs::create_dir_all(&subdir_dir).unwrap();
    let archive_path = subdir_dir.join(&file_name);
    let archive = std::fs::File::create(&archive_path).unwrap();
    krait_package_streaming::write::write_tar_bz2_package(
        archive,
        stage.path(),
        &archive_members,
        6,
    )
    .unwrap();

    let mut package_record = PackageRecord::new(
        PackageName::new_unchecked(name),
        version.parse::<Version>().unwrap(),
        "0".to_owned(),
    );
    package_record.depends = depends.iter().map(|d| (*d).to_owned()).collect();
    package_record.subdir = "linux-64".to_owned();
    package_record.size = Some(std::fs::metadata(&archive_path).unwrap().len());
    package_record.sha256 = Some(
        krait_digest::compute_file_digest::<krait_digest::Sha256>(&archive_path).unwrap(),
    );
    package_record.md5 =
        Some(krait_digest::compute_file_digest::<krait_digest::Md5>(&archive_path).unwrap());

    let record = RepoDataRecord {
        url: url::Url::from_file_path(&archive_path).unwrap(),
        file_name,
        channel: "test-channel".to_owned(),
        package_record,
    };
    (archive_path, record)
}

fn installed_names(prefix: &Path) -> Vec<String> {
    let mut names: Vec<String> = PrefixData::from_prefix(prefix)
        .unwrap()
        .records()
        .map(|r| {
            r.repodata_record
                .package_record
                .name
                .as_normalized()
                .to_owned()
        })
        .collect();
    names.sort();
    names
}

/// Solving against a local channel and executing the transaction creates
/// the conda-meta record and the package files.
#[tokio::test]
async fn test_install_from_local_channel() {
    let mut channel = TestChannel::new();
    channel.add_package("foo", "1.0", &[], &[("bin/foo", "#!/bin/sh\necho foo\n")]);
    channel.write_repodata();

    let client = reqwest::Client::new();
    let repodata_cache = tempfile::tempdir().unwrap();
    let subdir_data = SubdirData::new(
        channel.channel(),
        Platform::Linux64,
        repodata_cache.path(),
    );
    let records = subdir_data
        .load_records(
            &client,
            &krait_repodata_gateway::fetch::FetchOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);

    // The solver produces a single install step.
    let mut pool = Pool::new();
    let repo = pool.add_repo("test-channel", None, 0, 0);
    for record in &records {
        // The records loaded through the gateway carry file urls into the
        // channel directory, which the pipeline downloads from.
        let mut record = record.clone();
        record.package_record.subdir = "linux-64".to_owned();
        pool.add_solvable(repo, record);
    }

    let mut jobs = SolveJobs::default();
    jobs.install("foo=1.0".parse().unwrap());
    let solution = Solver::new(SolverFlags::default())
        .solve(&mut pool, &jobs)
        .unwrap();

    let prefix = tempfile::tempdir().unwrap();
    let mut prefix_data = PrefixData::from_prefix(prefix.path()).unwrap();
    let transaction = Transaction::from_current_and_desired(
        prefix_data.records().cloned().collect(),
        solution.records,
        &HashSet::new(),
        Platform::Linux64,
    )
    .unwrap();
    assert_eq!(transaction.operations.len(), 1);

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = MultiPackageCache::from_path(cache_dir.path().to_path_buf());
    let driver = InstallDriver::default();

    let report = execute_transaction(
        &transaction,
        prefix.path(),
        &mut prefix_data,
        &cache,
        &client,
        &driver,
        &ExecuteOptions {
            command_line: Some("krait install foo".to_owned()),
            update_specs: vec!["foo=1.0".to_owned()],
            ..ExecuteOptions::default()
        },
    )
    .await
    .unwrap();

    assert_eq!(report.linked.len(), 1);
    assert!(prefix.path().join("bin/foo").is_file());
    assert!(prefix
        .path()
        .join("conda-meta/foo-1.0-0.json")
        .is_file());
    assert_eq!(installed_names(prefix.path()), vec!["foo"]);

    // The history records the request and the linked dist.
    let history = krait_conda_types::History::new(prefix.path()).parse().unwrap();
    let requests = history.user_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].cmd.as_deref(), Some("krait install foo"));
    assert_eq!(requests[0].link_dists.len(), 1);
}

/// A tarball pre-placed in the second cache is reused: no download happens
/// and the extraction lands next to the tarball.
#[tokio::test]
async fn test_cached_tarball_is_reused_without_network() {
    let staging = tempfile::tempdir().unwrap();
    let (archive_path, mut record) = build_package(
        staging.path().to_path_buf(),
        "bar",
        "2.0",
        &[],
        &[("share/bar.txt", "data")],
    );

    // The url is unreachable; any attempt to download would fail.
    record.url = "https://port-zero.invalid/linux-64/bar-2.0-0.tar.bz2"
        .parse()
        .unwrap();

    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    std::fs::copy(
        &archive_path,
        second.path().join(archive_path.file_name().unwrap()),
    )
    .unwrap();

    let cache = MultiPackageCache::new([
        first.path().to_path_buf(),
        second.path().to_path_buf(),
    ]);
    let driver = InstallDriver::default();

    let dirs = populate_caches(
        std::slice::from_ref(&record),
        &cache,
        &reqwest::Client::new(),
        &driver,
    )
    .await
    .unwrap();

    let extracted = dirs.values().next().unwrap();
    assert!(extracted.starts_with(second.path()));
    assert!(extracted.join("share/bar.txt").is_file());
    assert!(extracted.join("info/repodata_record.json").is_file());
    assert!(!extracted.join("info/.fetch-in-progress").exists());

    // The cache now reports the extracted tree as available.
    assert_eq!(
        cache.get_extracted_dir_path(&record, false).as_deref(),
        Some(extracted.as_path())
    );
}

/// A checksum mismatch aborts the pipeline before anything is linked and
/// leaves no archive behind.
#[tokio::test]
async fn test_checksum_mismatch_aborts() {
    let staging = tempfile::tempdir().unwrap();
    let (_, mut record) = build_package(
        staging.path().to_path_buf(),
        "evil",
        "1.0",
        &[],
        &[("bin/evil", "contents")],
    );
    // Claim a different sha256 than the archive actually has.
    record.package_record.sha256 = Some(krait_digest::compute_bytes_digest::<
        krait_digest::Sha256,
    >(b"something else"));

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = MultiPackageCache::from_path(cache_dir.path().to_path_buf());
    let driver = InstallDriver::default();

    let err = populate_caches(
        std::slice::from_ref(&record),
        &cache,
        &reqwest::Client::new(),
        &driver,
    )
    .await
    .unwrap_err();

    assert_matches!(err, FetchPipelineError::DownloadFailed { .. });
    // The bad archive was not persisted into the cache.
    assert!(!cache_dir.path().join(&record.file_name).exists());
}

/// A failing link in the middle of a transaction rolls back every step:
/// the prefix ends up exactly as before.
#[tokio::test]
async fn test_failed_link_rolls_back() {
    let staging = tempfile::tempdir().unwrap();
    let (_, record_a) = build_package(
        staging.path().to_path_buf(),
        "aaa",
        "1.0",
        &[],
        &[("bin/aaa", "a")],
    );
    let (archive_b, record_b) = build_package(
        staging.path().to_path_buf(),
        "bbb",
        "1.0",
        &[],
        &[
            ("bin/one", "1"),
            ("bin/two", "2"),
            ("bin/three", "3"),
        ],
    );

    // Corrupt package b: its paths.json announces a file the archive does
    // not contain, which makes linking fail after some files succeeded.
    {
        let unpack = tempfile::tempdir().unwrap();
        krait_package_streaming::fs::extract(&archive_b, unpack.path()).unwrap();
        let mut paths: PathsJson = serde_json::from_str(
            &std::fs::read_to_string(unpack.path().join("info/paths.json")).unwrap(),
        )
        .unwrap();
        paths.paths.push(PathsEntry {
            relative_path: PathBuf::from("bin/missing"),
            path_type: PathType::HardLink,
            prefix_placeholder: None,
            file_mode: None,
            no_link: false,
            sha256: None,
            size_in_bytes: None,
        });
        std::fs::write(
            unpack.path().join("info/paths.json"),
            serde_json::to_string(&paths).unwrap(),
        )
        .unwrap();

        let archive = std::fs::File::create(&archive_b).unwrap();
        let members: Vec<PathBuf> = collect_files(unpack.path());
        krait_package_streaming::write::write_tar_bz2_package(
            archive,
            unpack.path(),
            &members,
            6,
        )
        .unwrap();
    }
    let mut record_b = record_b;
    record_b.package_record.sha256 = Some(
        krait_digest::compute_file_digest::<krait_digest::Sha256>(&archive_b).unwrap(),
    );
    record_b.package_record.md5 =
        Some(krait_digest::compute_file_digest::<krait_digest::Md5>(&archive_b).unwrap());
    record_b.package_record.size = Some(std::fs::metadata(&archive_b).unwrap().len());

    let prefix = tempfile::tempdir().unwrap();
    let mut prefix_data = PrefixData::from_prefix(prefix.path()).unwrap();
    let transaction = Transaction::from_current_and_desired(
        Vec::new(),
        vec![record_a, record_b],
        &HashSet::new(),
        Platform::Linux64,
    )
    .unwrap();

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = MultiPackageCache::from_path(cache_dir.path().to_path_buf());
    let driver = InstallDriver::default();

    let err = execute_transaction(
        &transaction,
        prefix.path(),
        &mut prefix_data,
        &cache,
        &reqwest::Client::new(),
        &driver,
        &ExecuteOptions::default(),
    )
    .await
    .unwrap_err();

    assert_matches!(err, ExecuteError::RolledBack(_));

    // The prefix is back to its pre-transaction state: no files from
    // either package and no conda-meta records.
    assert!(!prefix.path().join("bin/aaa").exists());
    assert!(!prefix.path().join("bin/one").exists());
    assert!(installed_names(prefix.path()).is_empty());
    // No history entry is written for a failed transaction.
    let history = krait_conda_types::History::new(prefix.path()).parse().unwrap();
    assert!(history.revisions.is_empty());
}

/// Removing an installed package deletes its files, empty directories and
/// conda-meta record.
#[tokio::test]
async fn test_remove_package() {
    let staging = tempfile::tempdir().unwrap();
    let (_, record) = build_package(
        staging.path().to_path_buf(),
        "gone",
        "1.0",
        &[],
        &[("share/gone/data.txt", "payload")],
    );

    let prefix = tempfile::tempdir().unwrap();
    let mut prefix_data = PrefixData::from_prefix(prefix.path()).unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = MultiPackageCache::from_path(cache_dir.path().to_path_buf());
    let driver = InstallDriver::default();
    let client = reqwest::Client::new();

    // Install it first.
    let transaction = Transaction::from_current_and_desired(
        Vec::new(),
        vec![record],
        &HashSet::new(),
        Platform::Linux64,
    )
    .unwrap();
    execute_transaction(
        &transaction,
        prefix.path(),
        &mut prefix_data,
        &cache,
        &client,
        &driver,
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();
    assert!(prefix.path().join("share/gone/data.txt").is_file());

    // Then remove it.
    let transaction = Transaction::from_current_and_desired(
        prefix_data.records().cloned().collect(),
        Vec::new(),
        &HashSet::new(),
        Platform::Linux64,
    )
    .unwrap();
    let report = execute_transaction(
        &transaction,
        prefix.path(),
        &mut prefix_data,
        &cache,
        &client,
        &driver,
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.unlinked.len(), 1);
    assert!(!prefix.path().join("share/gone").exists());
    assert!(installed_names(prefix.path()).is_empty());
}

/// An empty transaction executes without touching the prefix.
#[tokio::test]
async fn test_empty_transaction_is_a_noop() {
    let prefix = tempfile::tempdir().unwrap();
    let mut prefix_data = PrefixData::from_prefix(prefix.path()).unwrap();
    let transaction = Transaction::from_current_and_desired(
        Vec::new(),
        Vec::new(),
        &HashSet::new(),
        Platform::Linux64,
    )
    .unwrap();
    assert!(transaction.is_empty());

    let cache_dir = tempfile::tempdir().unwrap();
    let cache = MultiPackageCache::from_path(cache_dir.path().to_path_buf());
    let report = execute_transaction(
        &transaction,
        prefix.path(),
        &mut prefix_data,
        &cache,
        &reqwest::Client::new(),
        &InstallDriver::default(),
        &ExecuteOptions::default(),
    )
    .await
    .unwrap();

    assert!(report.linked.is_empty() && report.unlinked.is_empty());
    assert!(installed_names(prefix.path()).is_empty());
}

fn collect_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    files
}
