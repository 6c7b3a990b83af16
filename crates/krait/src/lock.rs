use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// The name of the lock file inside `conda-meta`.
const LOCK_FILE_NAME: &str = "krait.lock";

/// An error that can occur while acquiring the prefix lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process holds the lock.
    #[error("the environment is locked by another process{}", .holder_pid.map(|pid| format!(" (pid {pid})")).unwrap_or_default())]
    Contended {
        /// The pid recorded in the lock file, if readable.
        holder_pid: Option<u32>,
    },

    /// An io error occurred while creating or writing the file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The OS advisory lock operation failed.
    #[error("failed to operate on the lock file")]
    FsLock(#[source] fslock::Error),
}

/// An exclusive advisory lock on an environment prefix, held for the
/// duration of a transaction.
///
/// The lock is the zero-length-ish file `<prefix>/conda-meta/krait.lock`,
/// acquired with an OS advisory exclusive lock. The pid of the holder is
/// written into the file for diagnostics. Advisory locks are released by
/// the OS when the holding process dies, so a lock file left behind by a
/// crashed process does not block the next invocation.
#[derive(Debug)]
pub struct PrefixLock {
    path: PathBuf,
    lock: Option<fslock::LockFile>,
}

impl PrefixLock {
    /// Tries to acquire the lock on the given prefix without blocking.
    /// Fails with [`LockError::Contended`] when another process holds it.
    pub fn try_acquire(prefix: &Path) -> Result<Self, LockError> {
        let conda_meta = prefix.join("conda-meta");
        fs_err::create_dir_all(&conda_meta)?;
        let path = conda_meta.join(LOCK_FILE_NAME);

        tracing::debug!("acquiring prefix lock at '{}'", path.display());
        let mut lock = fslock::LockFile::open(&path).map_err(LockError::FsLock)?;
        if !lock.try_lock().map_err(LockError::FsLock)? {
            return Err(LockError::Contended {
                holder_pid: read_holder_pid(&path),
            });
        }

        // Record our pid for diagnostics on the other side.
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&path)?;
        write!(file, "{}", std::process::id())?;

        Ok(Self {
            path,
            lock: Some(lock),
        })
    }

    /// Acquires the lock, blocking until it becomes available. Runs on a
    /// blocking thread so it can be awaited.
    pub async fn acquire(prefix: &Path) -> Result<Self, LockError> {
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || {
            let conda_meta = prefix.join("conda-meta");
            fs_err::create_dir_all(&conda_meta)?;
            let path = conda_meta.join(LOCK_FILE_NAME);

            let mut lock = fslock::LockFile::open(&path).map_err(LockError::FsLock)?;
            lock.lock().map_err(LockError::FsLock)?;

            let mut file = std::fs::OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&path)?;
            write!(file, "{}", std::process::id())?;

            Ok(Self {
                path,
                lock: Some(lock),
            })
        })
        .await
        .expect("the lock task never panics")
    }
}

fn read_holder_pid(path: &Path) -> Option<u32> {
    let mut contents = String::new();
    std::fs::File::open(path)
        .ok()?
        .read_to_string(&mut contents)
        .ok()?;
    contents.trim().parse().ok()
}

impl Drop for PrefixLock {
    fn drop(&mut self) {
        drop(self.lock.take());
        // Removing the file is best effort; if another process took the
        // lock in the meantime an empty file remains, which is harmless.
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod test {
    use assert_matches::assert_matches;

    use super::{LockError, PrefixLock};

    #[test]
    fn test_exclusive() {
        let prefix = tempfile::tempdir().unwrap();

        let lock = PrefixLock::try_acquire(prefix.path()).unwrap();
        assert!(prefix.path().join("conda-meta/krait.lock").exists());

        // A second acquisition fails and names the holder.
        let err = PrefixLock::try_acquire(prefix.path()).unwrap_err();
        assert_matches!(err, LockError::Contended { holder_pid: Some(pid) } if pid == std::process::id());

        // After release the lock can be taken again.
        drop(lock);
        let _lock = PrefixLock::try_acquire(prefix.path()).unwrap();
    }
}
