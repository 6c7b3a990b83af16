//! `krait_conda_types` contains the data types that describe the conda
//! ecosystem: versions and version constraints, match specs, channels,
//! platforms, repodata indices, installed-package records and the history
//! ledger of an environment prefix.
//!
//! The types in this crate are plain data with parsing, ordering and
//! (de)serialization logic. Higher level behavior (fetching, solving,
//! linking) lives in the sibling crates.

mod channel;
mod conda_lock;
mod explicit_environment_spec;
mod history;
mod match_spec;
mod no_arch_type;
pub mod package;
mod package_name;
mod platform;
mod prefix_data;
pub mod prefix_record;
mod repo_data;
mod repo_data_record;
mod topological_sort;
pub(crate) mod utils;
mod version;
mod version_spec;

pub use channel::{Channel, ChannelConfig, ParseChannelError};
pub use conda_lock::{CondaLock, CondaLockError, LockedDependency, LockedHash, PackageManager};
pub use explicit_environment_spec::{
    ExplicitEnvironmentEntry, ExplicitEnvironmentSpec, PackageArchiveHash,
    ParseExplicitEnvironmentSpecError,
};
pub use history::{History, HistoryError, HistoryRevision, ParsedHistory, Revision, UserRequest};
pub use match_spec::{matcher::StringMatcher, MatchSpec, ParseMatchSpecError};
pub use no_arch_type::{NoArchType, RawNoArchType};
pub use package_name::{PackageName, ParsePackageNameError};
pub use platform::{ParsePlatformError, Platform};
pub use prefix_data::PrefixData;
pub use prefix_record::{
    Link, LinkType, PathType as PrefixPathType, PathsEntry as PrefixPathsEntry, PrefixPaths,
    PrefixRecord,
};
pub use repo_data::{compute_package_url, ChannelInfo, PackageRecord, RepoData};
pub use repo_data_record::RepoDataRecord;
pub use topological_sort::validate_dependencies;
pub use version::{ParseVersionError, ParseVersionErrorKind, Version, VersionWithSource};
pub use version_spec::{
    is_start_of_version_constraint, LogicalOperator, ParseVersionSpecError, VersionOperator,
    VersionSpec,
};

/// The number of a build. Used in the repodata and in build-number match
/// specs.
pub type BuildNumber = u64;
