//! Computing the ordered set of operations that brings a prefix from its
//! current state to a desired state.

use std::collections::{HashMap, HashSet};

use krait_conda_types::{PackageRecord, Platform, PrefixRecord, RepoDataRecord};

use super::python::{PythonInfo, PythonInfoError};

/// An error that occurred while constructing a [`Transaction`].
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The version of the python interpreter could not be interpreted.
    #[error(transparent)]
    PythonInfoError(#[from] PythonInfoError),
}

/// A single operation of a transaction.
#[derive(Debug, Clone)]
pub enum TransactionOperation {
    /// Install a new package.
    Install(RepoDataRecord),

    /// Remove an old package and install a different build in its place.
    /// Covers upgrades, downgrades and replacement by a different build.
    Change {
        /// The installed record to remove.
        old: PrefixRecord,

        /// The new record to install.
        new: RepoDataRecord,
    },

    /// Unlink and relink the same package. Happens when the python minor
    /// version changes and all `noarch: python` packages need their
    /// bytecode recompiled, and for explicitly forced reinstalls.
    Reinstall(PrefixRecord),

    /// Completely remove a package.
    Remove(PrefixRecord),
}

impl TransactionOperation {
    /// The record that will be present after this operation, if any.
    pub fn record_to_install(&self) -> Option<&RepoDataRecord> {
        match self {
            TransactionOperation::Install(record) => Some(record),
            TransactionOperation::Change { new, .. } => Some(new),
            TransactionOperation::Reinstall(old) => Some(&old.repodata_record),
            TransactionOperation::Remove(_) => None,
        }
    }

    /// The installed record removed by this operation, if any.
    pub fn record_to_remove(&self) -> Option<&PrefixRecord> {
        match self {
            TransactionOperation::Install(_) => None,
            TransactionOperation::Change { old, .. }
            | TransactionOperation::Reinstall(old)
            | TransactionOperation::Remove(old) => Some(old),
        }
    }
}

/// The ordered plan that brings an environment from one state to another.
///
/// Remove operations come first (dependents before their dependencies),
/// followed by install operations in topological order (dependencies before
/// their dependents).
#[derive(Debug)]
pub struct Transaction {
    /// The operations to perform, in order.
    pub operations: Vec<TransactionOperation>,

    /// The python interpreter of the target state, if any.
    pub python_info: Option<PythonInfo>,

    /// The python interpreter of the current state, if any.
    pub current_python_info: Option<PythonInfo>,

    /// The platform the transaction applies to.
    pub platform: Platform,
}

impl Transaction {
    /// Constructs a transaction by diffing the current situation against
    /// the desired one.
    ///
    /// `reinstall_names` forces a relink of the named packages even when
    /// their content is unchanged.
    pub fn from_current_and_desired(
        current: Vec<PrefixRecord>,
        desired: Vec<RepoDataRecord>,
        reinstall_names: &HashSet<String>,
        platform: Platform,
    ) -> Result<Self, TransactionError> {
        // Determine the python interpreters of both states; switching the
        // minor version requires relinking every noarch python package.
        let current_python_info = find_python_info(current.iter().map(AsRef::as_ref), platform)?;
        let desired_python_info = find_python_info(desired.iter().map(AsRef::as_ref), platform)?;
        let needs_python_relink = match (&current_python_info, &desired_python_info) {
            (Some(current), Some(desired)) => desired.is_relink_required(current),
            _ => false,
        };

        // Link order: dependencies before dependents.
        let desired = PackageRecord::sort_topologically(desired);

        let mut current_map: HashMap<String, PrefixRecord> = current
            .into_iter()
            .map(|r| {
                (
                    r.repodata_record
                        .package_record
                        .name
                        .as_normalized()
                        .to_owned(),
                    r,
                )
            })
            .collect();

        let desired_names: HashSet<String> = desired
            .iter()
            .map(|r| r.package_record.name.as_normalized().to_owned())
            .collect();

        // Packages that disappear are removed first, dependents before
        // dependencies.
        let mut operations = Vec::new();
        let mut removals: Vec<&PrefixRecord> = current_map
            .values()
            .filter(|record| {
                !desired_names.contains(
                    record
                        .repodata_record
                        .package_record
                        .name
                        .as_normalized(),
                )
            })
            .collect();
        let sorted_removals =
            PackageRecord::sort_topologically(removals.drain(..).cloned().collect());
        for record in sorted_removals.into_iter().rev() {
            operations.push(TransactionOperation::Remove(record));
        }

        for record in desired {
            let name = record.package_record.name.as_normalized().to_owned();
            let old_record = current_map.remove(&name);

            if let Some(old_record) = old_record {
                if !describe_same_content(
                    &record.package_record,
                    &old_record.repodata_record.package_record,
                ) {
                    operations.push(TransactionOperation::Change {
                        old: old_record,
                        new: record,
                    });
                } else if reinstall_names.contains(&name)
                    || (needs_python_relink
                        && old_record.repodata_record.package_record.noarch.is_python())
                {
                    operations.push(TransactionOperation::Reinstall(old_record));
                }
                // Identical content needs no operation.
            } else {
                operations.push(TransactionOperation::Install(record));
            }
        }

        Ok(Self {
            operations,
            python_info: desired_python_info,
            current_python_info,
            platform,
        })
    }

    /// Iterates over the records of all packages that will be removed.
    pub fn removed_packages(&self) -> impl Iterator<Item = &PrefixRecord> + '_ {
        self.operations
            .iter()
            .filter_map(TransactionOperation::record_to_remove)
    }

    /// Iterates over the records of all packages that will be installed.
    /// This is the full LINK set: it includes packages that are merely
    /// relinked and therefore need no download.
    pub fn installed_packages(&self) -> impl Iterator<Item = &RepoDataRecord> + '_ {
        self.operations
            .iter()
            .filter_map(TransactionOperation::record_to_install)
    }

    /// Returns true if the transaction contains no operations.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Determines the python interpreter among a set of records.
fn find_python_info<'a>(
    records: impl IntoIterator<Item = &'a PackageRecord>,
    platform: Platform,
) -> Result<Option<PythonInfo>, PythonInfoError> {
    records
        .into_iter()
        .find(|r| r.name.as_normalized() == "python")
        .map(|record| PythonInfo::from_python_record(record, platform))
        .map_or(Ok(None), |info| info.map(Some))
}

/// Returns true if the two records describe the same package content.
fn describe_same_content(from: &PackageRecord, to: &PackageRecord) -> bool {
    // Matching hashes mean identical content.
    if let (Some(a), Some(b)) = (from.sha256.as_ref(), to.sha256.as_ref()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (from.md5.as_ref(), to.md5.as_ref()) {
        return a == b;
    }

    // Mismatching sizes mean different content.
    if let (Some(a), Some(b)) = (from.size.as_ref(), to.size.as_ref()) {
        if a != b {
            return false;
        }
    }

    from.name == to.name && from.version == to.version && from.build == to.build
}
