//! Applying a [`Transaction`] to a prefix: the ordered unlink/link loop
//! with rollback, bytecode compilation and the history entry.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use krait_cache::{CacheKey, MultiPackageCache};
use krait_conda_types::prefix_record::Link;
use krait_conda_types::{HistoryError, PrefixData, PrefixRecord, RepoDataRecord};

use crate::fetch::{populate_caches, FetchPipelineError};
use crate::lock::{LockError, PrefixLock};

use super::link_script::{run_link_script, LinkScriptKind};
use super::transaction::{Transaction, TransactionOperation};
use super::unlink::{clean_trash, unlink_package, UnlinkError};
use super::{InstallDriver, InstallError, InstallOptions, PythonInfo};

/// Options controlling the execution of a transaction.
#[derive(Debug, Default, Clone)]
pub struct ExecuteOptions {
    /// Stop after the download/extract pipeline, leaving the prefix
    /// untouched.
    pub download_only: bool,

    /// Whether to run pre/post link scripts shipped by packages.
    pub execute_link_scripts: bool,

    /// The command line recorded in the history entry.
    pub command_line: Option<String>,

    /// The specs the user requested to install or update, for the history
    /// entry and the `requested_spec` fields of the conda-meta records.
    pub update_specs: Vec<String>,

    /// The specs the user requested to remove, for the history entry.
    pub remove_specs: Vec<String>,
}

/// A report of a successfully executed transaction.
#[derive(Debug, Default)]
pub struct ExecuteReport {
    /// The dist strings of the packages that were linked.
    pub linked: Vec<String>,

    /// The dist strings of the packages that were unlinked.
    pub unlinked: Vec<String>,
}

/// An error that can occur while executing a transaction.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The prefix lock could not be acquired.
    #[error(transparent)]
    LockError(#[from] LockError),

    /// The fetch pipeline failed; the prefix was not touched.
    #[error(transparent)]
    FetchPipelineError(#[from] FetchPipelineError),

    /// A package failed to link.
    #[error("failed to link {package}")]
    LinkError {
        /// The package that failed.
        package: String,
        /// The underlying error.
        #[source]
        source: InstallError,
    },

    /// A package failed to unlink.
    #[error(transparent)]
    UnlinkError(#[from] UnlinkError),

    /// A pre-link script failed, aborting the package.
    #[error("the pre-link script of {package} failed")]
    PreLinkScriptFailed {
        /// The package whose script failed.
        package: String,
        /// The underlying error.
        #[source]
        source: super::link_script::LinkScriptError,
    },

    /// The history entry could not be appended.
    #[error(transparent)]
    HistoryError(#[from] HistoryError),

    /// An io error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// A package required by the plan is missing from the cache; the fetch
    /// pipeline should have produced it.
    #[error("package {0} is missing from the cache")]
    MissingFromCache(String),

    /// The operation was interrupted.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The operation failed and every completed step was undone; the
    /// prefix is back in its previous state.
    #[error("the transaction was rolled back")]
    RolledBack(#[source] Box<ExecuteError>),
}

/// One completed operation on the rollback stack.
enum ExecutedOp {
    Linked {
        record: PrefixRecord,
    },
    Unlinked {
        record: PrefixRecord,
        package_dir: Option<PathBuf>,
    },
}

/// Executes a transaction against a prefix.
///
/// The prefix is locked for the whole execution. All archives are
/// downloaded and extracted before the first link/unlink happens, so a
/// validation failure never leaves a half-updated environment. Each
/// completed operation is pushed onto a rollback stack; on failure or
/// interruption the stack is unwound in reverse and the original error is
/// reported.
pub async fn execute_transaction(
    transaction: &Transaction,
    prefix: &Path,
    prefix_data: &mut PrefixData,
    cache: &MultiPackageCache,
    client: &reqwest::Client,
    driver: &InstallDriver,
    options: &ExecuteOptions,
) -> Result<ExecuteReport, ExecuteError> {
    // Exclusive access to the prefix for the rest of the function.
    let _lock = PrefixLock::try_acquire(prefix)?;

    // Remove leftovers from earlier transactions.
    clean_trash(prefix)?;

    // Materialize every package in the cache before touching the prefix.
    let to_fetch: Vec<RepoDataRecord> = transaction.installed_packages().cloned().collect();
    let package_dirs = populate_caches(&to_fetch, cache, client, driver).await?;

    if options.download_only {
        return Ok(ExecuteReport::default());
    }

    let mut rollback_stack: Vec<ExecutedOp> = Vec::new();
    let mut py_files: Vec<PathBuf> = Vec::new();

    let result = execute_operations(
        transaction,
        prefix,
        prefix_data,
        &package_dirs,
        driver,
        options,
        &mut rollback_stack,
        &mut py_files,
    )
    .await;

    let report = match result {
        Ok(report) => report,
        Err(error) => {
            tracing::warn!("transaction failed ({error}), rolling back");
            rollback(prefix, &rollback_stack, transaction.current_python_info.as_ref()).await;
            // The prefix contents changed under us; reload the records from
            // disk so the caller sees the restored state.
            *prefix_data = PrefixData::from_prefix(prefix)?;
            return Err(ExecuteError::RolledBack(Box::new(error)));
        }
    };

    // Python bytecode compilation drains before the transaction is
    // considered complete.
    if let Some(python_info) = &transaction.python_info {
        if let Err(e) = super::pyc::compile_bytecode(prefix, python_info, &py_files).await {
            tracing::warn!("bytecode compilation failed (ignored): {e}");
        }
    }

    // The history entry is the last step; it is only written for
    // transactions that completed.
    let history = krait_conda_types::History::new(prefix);
    history.write_revision(&krait_conda_types::Revision {
        timestamp: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        cmd: options.command_line.clone(),
        update_specs: options.update_specs.clone(),
        remove_specs: options.remove_specs.clone(),
        removed: report.unlinked.iter().cloned().collect::<BTreeSet<_>>(),
        added: report.linked.iter().cloned().collect::<BTreeSet<_>>(),
    })?;

    Ok(report)
}

/// Runs the ordered operation loop. Completed operations are pushed onto
/// the rollback stack owned by the caller so a failure can be unwound.
#[allow(clippy::too_many_arguments)]
async fn execute_operations(
    transaction: &Transaction,
    prefix: &Path,
    prefix_data: &mut PrefixData,
    package_dirs: &std::collections::HashMap<String, PathBuf>,
    driver: &InstallDriver,
    options: &ExecuteOptions,
    rollback_stack: &mut Vec<ExecutedOp>,
    py_files: &mut Vec<PathBuf>,
) -> Result<ExecuteReport, ExecuteError> {
    let mut report = ExecuteReport::default();

    for operation in &transaction.operations {
        if driver.is_cancelled() {
            return Err(ExecuteError::Cancelled);
        }

        if let Some(old) = operation.record_to_remove() {
            let package_dir = package_dirs
                .get(&CacheKey::from(&old.repodata_record).to_string())
                .cloned();
            unlink_one(prefix, prefix_data, old, options).await?;
            report.unlinked.push(dist_string(&old.repodata_record));
            rollback_stack.push(ExecutedOp::Unlinked {
                record: old.clone(),
                package_dir,
            });
        }

        if let Some(new) = operation.record_to_install() {
            let key = CacheKey::from(new).to_string();
            let package_dir = package_dirs
                .get(&key)
                .ok_or_else(|| ExecuteError::MissingFromCache(key))?;

            let linked = link_one(
                prefix,
                prefix_data,
                new,
                package_dir,
                transaction.python_info.as_ref(),
                options,
            )
            .await?;
            py_files.extend(linked.py_files);
            report.linked.push(dist_string(new));
            rollback_stack.push(ExecutedOp::Linked {
                record: linked.record,
            });
        }
    }

    Ok(report)
}

struct LinkOutcome {
    record: PrefixRecord,
    py_files: Vec<PathBuf>,
}

/// Links one package and writes its conda-meta record.
async fn link_one(
    prefix: &Path,
    prefix_data: &mut PrefixData,
    record: &RepoDataRecord,
    package_dir: &Path,
    python_info: Option<&PythonInfo>,
    options: &ExecuteOptions,
) -> Result<LinkOutcome, ExecuteError> {
    let package_name = record.package_record.name.as_normalized().to_owned();

    if options.execute_link_scripts {
        // A failing pre-link script aborts the package before any file is
        // linked.
        run_link_script(
            LinkScriptKind::PreLink,
            &record.package_record,
            package_dir,
            prefix,
        )
        .await
            .map_err(|source| ExecuteError::PreLinkScriptFailed {
                package: package_name.clone(),
                source,
            })?;
    }

    let install_options = InstallOptions {
        python_info: python_info.cloned(),
        ..InstallOptions::default()
    };
    let linked = {
        let package_dir = package_dir.to_owned();
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || {
            super::link_package(&package_dir, &prefix, &install_options)
        })
        .await
        .expect("the link task never panics")
        .map_err(|source| ExecuteError::LinkError {
            package: package_name.clone(),
            source,
        })?
    };

    // The requested spec is recorded when the user asked for this package
    // by name.
    let requested_spec = options
        .update_specs
        .iter()
        .find(|spec| {
            spec.split([' ', '=', '<', '>', '!', '~'])
                .next()
                .is_some_and(|name| name.eq_ignore_ascii_case(&package_name))
        })
        .cloned();

    let prefix_record = PrefixRecord::from_repodata_record(
        record.clone(),
        None,
        Some(package_dir.to_owned()),
        linked.paths,
        requested_spec,
        Some(Link {
            source: package_dir.to_owned(),
            link_type: None,
        }),
    );

    write_prefix_record(prefix, &prefix_record)?;
    prefix_data.insert(prefix_record.clone());

    if options.execute_link_scripts {
        // Post-link failures are logged but do not fail the package.
        if let Err(e) =
            run_link_script(LinkScriptKind::PostLink, &record.package_record, prefix, prefix)
                .await
        {
            tracing::warn!("the post-link script of {package_name} failed: {e}");
        }
    }

    Ok(LinkOutcome {
        record: prefix_record,
        py_files: linked.py_files,
    })
}

/// Unlinks one package, running its pre-unlink script first.
async fn unlink_one(
    prefix: &Path,
    prefix_data: &mut PrefixData,
    record: &PrefixRecord,
    options: &ExecuteOptions,
) -> Result<(), ExecuteError> {
    if options.execute_link_scripts {
        if let Err(e) = run_link_script(
            LinkScriptKind::PreUnlink,
            &record.repodata_record.package_record,
            prefix,
            prefix,
        )
        .await
        {
            tracing::warn!(
                "the pre-unlink script of {} failed: {e}",
                record.repodata_record.package_record.name.as_normalized()
            );
        }
    }

    {
        let prefix = prefix.to_owned();
        let record = record.clone();
        tokio::task::spawn_blocking(move || unlink_package(&prefix, &record))
            .await
            .expect("the unlink task never panics")?;
    }

    prefix_data.remove(&record.repodata_record.package_record.name);
    Ok(())
}

/// Unwinds the rollback stack in reverse. Errors during rollback are
/// logged; they do not mask the original failure.
async fn rollback(
    prefix: &Path,
    rollback_stack: &[ExecutedOp],
    current_python_info: Option<&PythonInfo>,
) {
    for executed in rollback_stack.iter().rev() {
        match executed {
            ExecutedOp::Linked { record } => {
                let prefix = prefix.to_owned();
                let record = record.clone();
                let result =
                    tokio::task::spawn_blocking(move || unlink_package(&prefix, &record))
                        .await
                        .expect("the unlink task never panics");
                if let Err(e) = result {
                    tracing::error!("error while rolling back a link operation: {e}");
                }
            }
            ExecutedOp::Unlinked {
                record,
                package_dir,
            } => {
                let package_dir = package_dir
                    .clone()
                    .or_else(|| record.link.as_ref().map(|link| link.source.clone()));
                let Some(package_dir) = package_dir else {
                    tracing::error!(
                        "cannot restore {}: its package directory is unknown",
                        record.repodata_record.package_record.name.as_normalized()
                    );
                    continue;
                };

                let install_options = InstallOptions {
                    python_info: current_python_info.cloned(),
                    ..InstallOptions::default()
                };
                let relink = {
                    let prefix = prefix.to_owned();
                    let package_dir = package_dir.clone();
                    tokio::task::spawn_blocking(move || {
                        super::link_package(&package_dir, &prefix, &install_options)
                    })
                    .await
                    .expect("the link task never panics")
                };
                match relink {
                    Ok(_) => {
                        if let Err(e) = write_prefix_record(prefix, record) {
                            tracing::error!(
                                "error while restoring the conda-meta record: {e}"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!("error while rolling back an unlink operation: {e}");
                    }
                }
            }
        }
    }
}

/// Writes a conda-meta record via a temporary sibling file.
fn write_prefix_record(prefix: &Path, record: &PrefixRecord) -> Result<(), std::io::Error> {
    let conda_meta = prefix.join("conda-meta");
    std::fs::create_dir_all(&conda_meta)?;
    let mut temp = tempfile::NamedTempFile::new_in(&conda_meta)?;
    serde_json::to_writer_pretty(&mut temp, record)?;
    temp.as_file().sync_all()?;
    temp.persist(conda_meta.join(record.file_name()))
        .map_err(|e| e.error)?;
    Ok(())
}

/// The dist string of a record as it appears in the history file:
/// `<channel>::<name>-<version>-<build>`.
fn dist_string(record: &RepoDataRecord) -> String {
    format!(
        "{}::{}-{}-{}",
        record.channel,
        record.package_record.name.as_normalized(),
        record.package_record.version,
        record.package_record.build
    )
}
