//! Unlinking packages from an environment.

use std::{collections::HashSet, io::ErrorKind, path::Path};

use indexmap::IndexSet;
use itertools::Itertools;
use krait_conda_types::PrefixRecord;

/// The directory inside a prefix where files that could not be deleted are
/// parked until the next transaction cleans them up.
pub const TRASH_DIR_NAME: &str = ".krait-trash";

/// An error that can occur while unlinking a package.
#[derive(Debug, thiserror::Error)]
pub enum UnlinkError {
    /// An empty directory could not be removed.
    #[error("failed to delete empty directory {0}")]
    FailedToDeleteDirectory(String, #[source] std::io::Error),

    /// An installed file could not be removed.
    #[error("failed to delete file {0}")]
    FailedToDeleteFile(String, #[source] std::io::Error),

    /// A directory could not be listed.
    #[error("failed to read directory {0}")]
    FailedToReadDirectory(String, #[source] std::io::Error),
}

/// Completely removes a package from the environment: every recorded path
/// is deleted, directories that end up empty are removed, and finally the
/// conda-meta record itself is deleted.
///
/// A file that cannot be removed (on Windows it may be mapped by a running
/// process) is renamed into the prefix trash directory and cleaned up by a
/// later transaction.
pub fn unlink_package(
    target_prefix: &Path,
    prefix_record: &PrefixRecord,
) -> Result<(), UnlinkError> {
    let is_python_noarch = prefix_record
        .repodata_record
        .package_record
        .noarch
        .is_python();

    let mut directories = HashSet::new();

    for paths in prefix_record.paths_data.paths.iter() {
        let full_path = target_prefix.join(&paths.relative_path);
        match std::fs::remove_file(&full_path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Already gone, nothing to do.
            }
            Err(e) if e.kind() == ErrorKind::IsADirectory => {
                // Recorded directories are handled below.
            }
            Err(first_error) => {
                if let Err(e) = move_to_trash(target_prefix, &full_path) {
                    tracing::warn!(
                        "failed to move undeletable file '{}' to the trash: {e}",
                        full_path.display()
                    );
                    return Err(UnlinkError::FailedToDeleteFile(
                        paths.relative_path.to_string_lossy().to_string(),
                        first_error,
                    ));
                }
            }
        }

        if let Some(parent) = paths.relative_path.parent() {
            directories.insert(parent.to_path_buf());
        }
    }

    // Remove the directories that became empty, deepest first.
    let mut directories: IndexSet<_> = directories.into_iter().sorted().collect();
    while let Some(directory) = directories.pop() {
        let directory_path = target_prefix.join(&directory);
        if !directory_path.is_dir() {
            continue;
        }

        let mut read_dir = directory_path.read_dir().map_err(|e| {
            UnlinkError::FailedToReadDirectory(directory_path.to_string_lossy().to_string(), e)
        })?;

        match read_dir.next().transpose() {
            Ok(None) => {
                std::fs::remove_dir(&directory_path).map_err(|e| {
                    UnlinkError::FailedToDeleteDirectory(
                        directory_path.to_string_lossy().to_string(),
                        e,
                    )
                })?;
            }

            // A lone `__pycache__` left behind by a python noarch package
            // counts as empty.
            Ok(Some(entry))
                if is_python_noarch
                    && entry.file_name() == "__pycache__"
                    && read_dir.next().is_none() =>
            {
                std::fs::remove_dir_all(&directory_path).map_err(|e| {
                    UnlinkError::FailedToDeleteDirectory(
                        directory_path.to_string_lossy().to_string(),
                        e,
                    )
                })?;
            }
            _ => {
                // The directory is not empty, so its parents are not empty
                // either.
                let mut current = directory.as_path();
                while let Some(parent) = current.parent() {
                    if !directories.shift_remove(parent) {
                        break;
                    }
                    current = parent;
                }
            }
        }
    }

    // Remove the conda-meta record last; as long as it exists the package
    // counts as installed.
    let conda_meta_path = target_prefix
        .join("conda-meta")
        .join(prefix_record.file_name());
    std::fs::remove_file(&conda_meta_path).map_err(|e| {
        UnlinkError::FailedToDeleteFile(conda_meta_path.to_string_lossy().to_string(), e)
    })?;

    Ok(())
}

/// Renames an undeletable file into the trash directory of the prefix.
fn move_to_trash(target_prefix: &Path, path: &Path) -> Result<(), std::io::Error> {
    let trash_dir = target_prefix.join(TRASH_DIR_NAME);
    std::fs::create_dir_all(&trash_dir)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let trash_path = trash_dir.join(format!("{}-{file_name}", uuid::Uuid::new_v4()));
    std::fs::rename(path, trash_path)
}

/// Best-effort removal of the trash directory, called at the start of a
/// transaction. Files that are still busy simply stay for the next run.
pub fn clean_trash(target_prefix: &Path) -> Result<(), std::io::Error> {
    let trash_dir = target_prefix.join(TRASH_DIR_NAME);
    match std::fs::remove_dir_all(&trash_dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::warn!(
                "failed to clean the trash at '{}': {e} (ignored)",
                trash_dir.display()
            );
            Ok(())
        }
    }
}
