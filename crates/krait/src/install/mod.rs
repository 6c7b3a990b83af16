//! Installing packages into (and removing them from) an environment
//! prefix.

mod driver;
mod entry_point;
pub mod link;
mod link_script;
mod pyc;
mod python;
mod transaction;
mod unlink;

pub mod execute;

pub use driver::{InstallDriver, InstallDriverBuilder};
pub use entry_point::create_unix_python_entry_point;
pub use execute::{execute_transaction, ExecuteError, ExecuteOptions, ExecuteReport};
pub use link::{link_file, LinkFileError};
pub use link_script::{run_link_script, LinkScriptError, LinkScriptKind};
pub use pyc::compile_bytecode;
pub use python::{PythonInfo, PythonInfoError};
pub use transaction::{Transaction, TransactionError, TransactionOperation};
pub use unlink::{clean_trash, unlink_package, UnlinkError};

use std::path::{Path, PathBuf};

use krait_conda_types::package::{IndexJson, LinkJson, NoArchLinks, PathsJson};
use krait_conda_types::prefix_record::{PathType, PathsEntry};
use krait_conda_types::Platform;

/// An error that might occur when installing a package.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// The operation was cancelled.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The `paths.json` of the package could not be read.
    #[error("failed to read 'paths.json'")]
    FailedToReadPathsJson(#[source] std::io::Error),

    /// The `index.json` of the package could not be read.
    #[error("failed to read 'index.json'")]
    FailedToReadIndexJson(#[source] std::io::Error),

    /// The `link.json` of the package could not be read.
    #[error("failed to read 'link.json'")]
    FailedToReadLinkJson(#[source] std::io::Error),

    /// A file could not be linked into the prefix.
    #[error("failed to link '{0}'")]
    FailedToLink(PathBuf, #[source] LinkFileError),

    /// An entry point script could not be created.
    #[error("failed to create entry point '{0}'")]
    FailedToCreateEntryPoint(String, #[source] std::io::Error),

    /// The target prefix is not representable as UTF-8, which makes prefix
    /// replacement impossible.
    #[error("target prefix is not UTF-8")]
    TargetPrefixIsNotUtf8,

    /// The target directory could not be created.
    #[error("failed to create target directory")]
    FailedToCreateTargetDirectory(#[source] std::io::Error),

    /// A `noarch: python` package cannot be linked without a python
    /// interpreter in the environment.
    #[error("cannot link a noarch python package without python in the environment")]
    MissingPythonInfo,
}

/// Options for [`link_package`].
#[derive(Default)]
pub struct InstallOptions {
    /// The prefix string to substitute for placeholders. Defaults to the
    /// target directory itself; differs in rare relocation scenarios.
    pub target_prefix: Option<PathBuf>,

    /// Whether hard links may be used. When disabled every file is copied.
    pub allow_hard_links: Option<bool>,

    /// The platform the package is installed for.
    pub platform: Option<Platform>,

    /// The python interpreter of the environment; required for
    /// `noarch: python` packages.
    pub python_info: Option<PythonInfo>,
}

/// The result of linking a package into a prefix.
pub struct LinkedPackage {
    /// The installed paths, for the conda-meta record.
    pub paths: Vec<PathsEntry>,

    /// Prefix-relative python source files that want bytecode compilation.
    pub py_files: Vec<PathBuf>,
}

/// Links an extracted package into the target directory.
///
/// Reads the package's `paths.json` (falling back to the deprecated
/// `files`), links every entry (substituting the prefix placeholder where
/// present), creates entry points for `noarch: python` packages, and
/// returns the path metadata for the conda-meta record. On failure every
/// file linked so far is removed again so a failed package leaves no
/// traces.
pub fn link_package(
    package_dir: &Path,
    target_dir: &Path,
    options: &InstallOptions,
) -> Result<LinkedPackage, InstallError> {
    let target_prefix = options
        .target_prefix
        .as_deref()
        .unwrap_or(target_dir)
        .to_str()
        .ok_or(InstallError::TargetPrefixIsNotUtf8)?
        .to_owned();

    std::fs::create_dir_all(target_dir).map_err(InstallError::FailedToCreateTargetDirectory)?;

    let index_json = IndexJson::from_package_directory(package_dir)
        .map_err(InstallError::FailedToReadIndexJson)?;
    let is_noarch_python = index_json.noarch.is_python();

    let python_info = match (is_noarch_python, options.python_info.as_ref()) {
        (true, Some(python_info)) => Some(python_info),
        (true, None) => return Err(InstallError::MissingPythonInfo),
        (false, _) => None,
    };

    let paths_json = PathsJson::from_package_directory_with_deprecated_fallback(package_dir)
        .map_err(InstallError::FailedToReadPathsJson)?;

    let allow_hard_links = options.allow_hard_links.unwrap_or(true);

    let mut paths = Vec::with_capacity(paths_json.paths.len());
    let mut py_files = Vec::new();
    let mut linked_files: Vec<PathBuf> = Vec::new();

    let mut result: Result<(), InstallError> = Ok(());
    for entry in &paths_json.paths {
        // noarch python packages are laid out relative to site-packages.
        let destination_relative_path = match python_info {
            Some(python_info) => python_info
                .get_python_noarch_target_path(&entry.relative_path)
                .into_owned(),
            None => entry.relative_path.clone(),
        };

        match link::link_file(
            entry,
            &destination_relative_path,
            package_dir,
            target_dir,
            &target_prefix,
            allow_hard_links,
        ) {
            Ok(linked) => {
                linked_files.push(destination_relative_path.clone());
                if let Some(python_info) = python_info {
                    if destination_relative_path
                        .extension()
                        .is_some_and(|ext| ext == "py")
                    {
                        // The interpreter will create the bytecode next to
                        // the source; record it so it is cleaned up on
                        // unlink.
                        paths.push(PathsEntry {
                            relative_path: python_info
                                .bytecode_path(&destination_relative_path),
                            path_type: PathType::PycFile,
                            no_link: false,
                            sha256: None,
                            sha256_in_prefix: None,
                            size_in_bytes: None,
                            file_mode: None,
                            prefix_placeholder: None,
                        });
                        py_files.push(destination_relative_path.clone());
                    }
                }
                paths.push(PathsEntry {
                    relative_path: destination_relative_path,
                    path_type: match linked.link_type {
                        krait_conda_types::LinkType::Directory => PathType::Directory,
                        _ => entry.path_type.into(),
                    },
                    no_link: entry.no_link,
                    sha256: entry.sha256,
                    sha256_in_prefix: linked.sha256_in_prefix,
                    size_in_bytes: entry.size_in_bytes,
                    file_mode: entry.file_mode,
                    prefix_placeholder: entry.prefix_placeholder.clone(),
                });
            }
            Err(e) => {
                result = Err(InstallError::FailedToLink(entry.relative_path.clone(), e));
                break;
            }
        }
    }

    // Entry points of noarch python packages.
    if result.is_ok() {
        if let Some(python_info) = python_info {
            match read_entry_points(package_dir) {
                Ok(entry_points) => {
                    for entry_point in entry_points {
                        match entry_point::create_unix_python_entry_point(
                            target_dir,
                            &target_prefix,
                            &entry_point,
                            python_info,
                        ) {
                            Ok(entry) => {
                                linked_files.push(entry.relative_path.clone());
                                paths.push(entry);
                            }
                            Err(e) => {
                                result = Err(InstallError::FailedToCreateEntryPoint(
                                    entry_point.command.clone(),
                                    e,
                                ));
                                break;
                            }
                        }
                    }
                }
                Err(e) => result = Err(e),
            }
        }
    }

    match result {
        Ok(()) => Ok(LinkedPackage { paths, py_files }),
        Err(e) => {
            // Remove everything linked so far; a failed package must not
            // leave partial files in the prefix.
            for file in linked_files.iter().rev() {
                let path = target_dir.join(file);
                if let Err(remove_error) = std::fs::remove_file(&path) {
                    if !matches!(
                        remove_error.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::IsADirectory
                    ) {
                        tracing::warn!(
                            "failed to remove partially linked file '{}': {remove_error}",
                            path.display()
                        );
                    }
                }
            }
            Err(e)
        }
    }
}

/// Reads the entry points of a `noarch: python` package; a missing
/// `link.json` means there are none.
fn read_entry_points(
    package_dir: &Path,
) -> Result<Vec<krait_conda_types::package::EntryPoint>, InstallError> {
    match LinkJson::from_package_directory(package_dir) {
        Ok(link_json) => Ok(match link_json.noarch {
            NoArchLinks::Python(python_links) => python_links.entry_points,
            NoArchLinks::Generic => Vec::new(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(InstallError::FailedToReadLinkJson(e)),
    }
}
