#![deny(missing_docs)]

//! The on-disk package cache: one or more directories holding downloaded
//! package archives and their extracted trees.
//!
//! A cache directory contains, per package, the archive
//! `<name>-<version>-<build>.{tar.bz2,conda}` and the extracted tree
//! `<name>-<version>-<build>/`. Multiple cache directories are searched in
//! order; the first writable one receives new downloads. Validation results
//! are memoized per `(cache, package)` until explicitly invalidated.

mod package_cache;
pub mod validation;

pub use package_cache::{append_url, CacheKey, MultiPackageCache, PackageCacheError};
