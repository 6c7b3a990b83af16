#![deny(missing_docs)]

//! Reading and writing of conda package archives.
//!
//! Two archive formats exist in the ecosystem: `.tar.bz2` (a bzip2
//! compressed tar stream) and `.conda` (a zip container holding two inner
//! zstd-compressed tarballs, one for `info/` and one for the payload).
//! This crate extracts both formats to a directory, writes them for tests
//! and tooling, and downloads archives over HTTP with checksum
//! verification and cooperative cancellation.

use krait_digest::{Md5Hash, Sha256Hash};
use zip::result::ZipError;

pub mod fs;
pub mod read;
pub mod reqwest;
pub mod write;

/// An error that can occur when extracting a package archive.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// An I/O error occurred while reading or writing archive data.
    #[error("an io error occurred")]
    IoError(#[from] std::io::Error),

    /// The destination directory could not be created.
    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    /// The outer zip of a `.conda` archive was invalid.
    #[error("invalid zip archive")]
    ZipError(#[source] zip::result::ZipError),

    /// The archive format could not be determined from the file name.
    #[error("unsupported package archive format")]
    UnsupportedArchiveType,

    /// The downloaded data did not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The expected hex digest.
        expected: String,
        /// The actual hex digest of the data.
        actual: String,
    },

    /// The downloaded data did not have the expected size.
    #[error("size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        /// The expected size in bytes.
        expected: u64,
        /// The actual number of bytes.
        actual: u64,
    },

    /// The download failed.
    #[error(transparent)]
    ReqwestError(#[from] ::reqwest::Error),

    /// The operation was cancelled by the interruption flag.
    #[error("the task was cancelled")]
    Cancelled,
}

impl From<ZipError> for ExtractError {
    fn from(value: ZipError) -> Self {
        match value {
            ZipError::Io(io) => Self::IoError(io),
            e => Self::ZipError(e),
        }
    }
}

/// Returned by the extraction functions, containing the hashes of the
/// archive bytes that were read.
#[derive(Debug)]
pub struct ExtractResult {
    /// The SHA256 hash of the archive.
    pub sha256: Sha256Hash,

    /// The MD5 hash of the archive.
    pub md5: Md5Hash,
}
