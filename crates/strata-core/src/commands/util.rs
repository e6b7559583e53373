use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::StrataConfig;
use crate::repo::lock::{self, LockMode};
use crate::repo::Repository;
use crate::storage;
use strata_types::error::{Result, StrataError};

/// Open the configured repository. The object index is not loaded.
pub fn open_repo(config: &StrataConfig) -> Result<Repository> {
    let backend = storage::backend_from_url(&config.repository.url)?;
    Repository::open(backend).map_err(|e| match e {
        StrataError::RepoNotFound(_) => StrataError::RepoNotFound(config.repository.url.clone()),
        other => other,
    })
}

/// Return `Err(StrataError::Interrupted)` if the shutdown flag is set.
pub fn check_interrupted(shutdown: Option<&AtomicBool>) -> Result<()> {
    if shutdown.is_some_and(|f| f.load(Ordering::Relaxed)) {
        return Err(StrataError::Interrupted);
    }
    Ok(())
}

/// Execute a repository mutation while holding a lock of `mode`.
/// The lock is released on every exit path; a release failure is only
/// reported when the action itself succeeded. Waiting for a contended lock
/// stops as soon as `shutdown` is set.
pub fn with_repo_lock<T>(
    repo: &Repository,
    mode: LockMode,
    retry_for: Duration,
    shutdown: Option<&AtomicBool>,
    action: impl FnOnce(&Repository) -> Result<T>,
) -> Result<T> {
    let guard =
        lock::acquire_lock_with_retry(repo.storage().as_ref(), mode, retry_for, shutdown)?;
    let result = action(repo);

    match lock::release_lock(repo.storage().as_ref(), guard) {
        Ok(()) => result,
        Err(release_err) => {
            if result.is_err() {
                tracing::warn!("failed to release repository lock: {release_err}");
                result
            } else {
                Err(release_err)
            }
        }
    }
}
