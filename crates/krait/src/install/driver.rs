//! The [`InstallDriver`]: shared concurrency limits and the interruption
//! flag of an installation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Shared resources of a running installation.
///
/// Downloads and extractions can mostly run in parallel, but unbounded
/// parallelism starves the system: the driver owns one semaphore for
/// concurrent HTTP transfers and one for concurrent extractions, plus the
/// process-wide interruption flag that all long running tasks poll at their
/// checkpoints.
#[derive(Clone)]
pub struct InstallDriver {
    download_semaphore: Arc<Semaphore>,
    extract_semaphore: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
}

/// A builder to configure an [`InstallDriver`].
#[derive(Debug)]
pub struct InstallDriverBuilder {
    download_concurrency: usize,
    extract_concurrency: usize,
}

impl Default for InstallDriver {
    fn default() -> Self {
        Self::builder().finish()
    }
}

impl Default for InstallDriverBuilder {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            download_concurrency: 5,
            extract_concurrency: cpus,
        }
    }
}

impl InstallDriverBuilder {
    /// Sets the number of simultaneous HTTP transfers.
    pub fn with_download_concurrency(self, limit: usize) -> Self {
        Self {
            download_concurrency: limit.max(1),
            ..self
        }
    }

    /// Sets the number of simultaneous extractions.
    pub fn with_extract_concurrency(self, limit: usize) -> Self {
        Self {
            extract_concurrency: limit.max(1),
            ..self
        }
    }

    /// Builds the driver.
    pub fn finish(self) -> InstallDriver {
        InstallDriver {
            download_semaphore: Arc::new(Semaphore::new(self.download_concurrency)),
            extract_semaphore: Arc::new(Semaphore::new(self.extract_concurrency)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl InstallDriver {
    /// Constructs a builder for a driver.
    pub fn builder() -> InstallDriverBuilder {
        InstallDriverBuilder::default()
    }

    /// Acquires a permit from the download pool.
    pub async fn acquire_download_permit(&self) -> OwnedSemaphorePermit {
        self.download_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("the download semaphore is never closed")
    }

    /// Acquires a permit from the extract pool.
    pub async fn acquire_extract_permit(&self) -> OwnedSemaphorePermit {
        self.extract_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("the extract semaphore is never closed")
    }

    /// The process-wide interruption flag. Wire this to SIGINT/SIGTERM
    /// handling at the application edge.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Raises the interruption flag; in-flight tasks stop at their next
    /// checkpoint.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Returns true if the interruption flag was raised.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::InstallDriver;

    #[test]
    fn test_cancellation_flag_is_shared() {
        let driver = InstallDriver::default();
        let clone = driver.clone();
        assert!(!driver.is_cancelled());
        clone.cancel();
        assert!(driver.is_cancelled());
    }
}
