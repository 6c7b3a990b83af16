#![deny(missing_docs)]

//! Fetching and caching of conda repodata.
//!
//! For every `(channel, subdir)` pair a [`SubdirData`] maintains a local
//! cache directory holding the `repodata.json` payload and a
//! `repodata.state.json` sidecar with the http caching headers of the last
//! response. Refreshes use conditional requests and prefer the
//! zstd-compressed variant of the index when the server offers one.

pub mod fetch;
mod subdir_data;

pub use subdir_data::{SubdirData, SubdirDataError};
