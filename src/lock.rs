//! Cross-process locking with marker files
//!
//! A resource `path` is locked by exclusively creating `path.lck`. Marker
//! files are visible to every process touching the work directory (other
//! manager instances, the GIMPS client's own tooling, a human with an
//! editor), which in-process primitives would not be.
//!
//! All resources a caller needs are acquired in one [`LockManager::acquire`]
//! call. Markers are always created in sorted path order, so two instances
//! locking overlapping sets can never wait on each other in a cycle.
//!
//! ```no_run
//! use primenet_manager::lock::LockManager;
//! use std::path::Path;
//!
//! # async fn example() -> primenet_manager::Result<()> {
//! let locks = LockManager::default();
//! let guard = locks.acquire(&[Path::new("results.txt"), Path::new("worktodo.txt")]).await?;
//! // ... read-modify-write both files ...
//! guard.release().await;
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::retry::{FixedRetry, IsRetryable, with_fixed_retry};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix appended to a resource path to form its lock marker
pub const LOCK_SUFFIX: &str = ".lck";

/// Marker file path for a resource
pub fn marker_path(resource: &Path) -> PathBuf {
    let mut name = OsString::from(resource.as_os_str());
    name.push(LOCK_SUFFIX);
    PathBuf::from(name)
}

/// Acquires and releases marker-file locks
#[derive(Clone, Debug, Default)]
pub struct LockManager {
    retry: FixedRetry,
}

impl LockManager {
    /// Create a lock manager with the given retry policy for both acquire and release
    pub fn new(retry: FixedRetry) -> Self {
        Self { retry }
    }

    /// Lock every resource in `resources`
    ///
    /// Either all markers are created and a guard holding them is returned,
    /// or none are held when this returns: markers created earlier in the
    /// same call are removed before the error is reported.
    pub async fn acquire(&self, resources: &[&Path]) -> Result<LockGuard> {
        let mut markers: Vec<PathBuf> = resources.iter().map(|r| marker_path(r)).collect();
        markers.sort();
        markers.dedup();

        let mut held = Vec::with_capacity(markers.len());
        for marker in markers {
            if let Err(e) = self.create_marker(&marker).await {
                release_markers(&held, &self.retry).await;
                return Err(e);
            }
            debug!(marker = %marker.display(), "lock acquired");
            held.push(marker);
        }

        Ok(LockGuard {
            markers: held,
            retry: self.retry,
            released: false,
        })
    }

    async fn create_marker(&self, marker: &Path) -> Result<()> {
        let created = with_fixed_retry(&self.retry, move || async move {
            tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(marker)
                .await
                .map(drop)
        })
        .await;

        match created {
            Ok(()) => Ok(()),
            Err(e) if e.is_retryable() => Err(Error::Lock {
                path: marker.to_path_buf(),
                attempts: self.retry.attempts,
            }),
            Err(e) => Err(Error::file(marker, e)),
        }
    }
}

/// Markers held by the current process
///
/// Call [`LockGuard::release`] on every exit path. If a guard is dropped
/// without being released (a panic, a cancelled future), the drop makes one
/// synchronous attempt to remove each marker.
#[must_use = "locks are released when the guard is released or dropped"]
#[derive(Debug)]
pub struct LockGuard {
    markers: Vec<PathBuf>,
    retry: FixedRetry,
    released: bool,
}

impl LockGuard {
    /// Marker files held by this guard, in creation order
    pub fn markers(&self) -> &[PathBuf] {
        &self.markers
    }

    /// Remove all markers, retrying transient failures. Never fails.
    pub async fn release(mut self) {
        release_markers(&self.markers, &self.retry).await;
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for marker in self.markers.iter().rev() {
            match std::fs::remove_file(marker) {
                Ok(()) => debug!(marker = %marker.display(), "lock released on drop"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(marker = %marker.display(), error = %e, "could not remove lock marker")
                }
            }
        }
    }
}

async fn release_markers(markers: &[PathBuf], retry: &FixedRetry) {
    for marker in markers.iter().rev() {
        let removed = with_fixed_retry(retry, move || async move {
            match tokio::fs::remove_file(marker).await {
                // someone cleaned it up already, nothing left to do
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        })
        .await;

        match removed {
            Ok(()) => debug!(marker = %marker.display(), "lock released"),
            Err(e) => warn!(
                marker = %marker.display(),
                error = %e,
                "could not remove lock marker, it must be deleted by hand"
            ),
        }
    }
}
