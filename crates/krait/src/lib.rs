#![deny(missing_docs)]

//! The krait package manager core.
//!
//! This crate ties the sibling crates together: it resolves requested match
//! specs against channel repodata ([`krait_repodata_gateway`]) with the
//! solver from [`krait_solve`], materializes the required archives in the
//! package cache ([`krait_cache`], [`krait_package_streaming`]) through a
//! bounded download/extract pipeline, and applies the resulting
//! [`install::Transaction`] to an environment prefix with rollback on
//! failure.

pub mod fetch;
pub mod install;
mod lock;

pub use lock::{LockError, PrefixLock};

use std::path::PathBuf;

/// Returns the default package cache directory of the current user.
pub fn default_cache_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .map(|home| home.join(".cache").join("krait"))
}
