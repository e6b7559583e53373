use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use strata_types::error::{Result, StrataError};

use crate::storage::StorageBackend;

const LOCKS_PREFIX: &str = "locks/";
const STALE_LOCK_AGE: Duration = Duration::from_secs(6 * 60 * 60);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);
/// Longest uninterrupted sleep while waiting between attempts.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Exclusivity of a repository lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock for operations that only add data.
    Append,
    /// Sole access, required before anything is deleted.
    Exclusive,
}

impl LockMode {
    /// A rewrite that forgets the old snapshot deletes records, so it needs
    /// exclusivity; otherwise it only appends.
    pub fn for_rewrite(forget: bool) -> Self {
        if forget {
            LockMode::Exclusive
        } else {
            LockMode::Append
        }
    }

    pub fn is_exclusive(self) -> bool {
        self == LockMode::Exclusive
    }

    fn conflicts_with(self, other: LockMode) -> bool {
        self.is_exclusive() || other.is_exclusive()
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LockMode::Append => "append",
            LockMode::Exclusive => "exclusive",
        })
    }
}

/// JSON lock record stored at `locks/<timestamp>-<random>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    pub hostname: String,
    pub username: String,
    pub pid: u32,
    pub time: DateTime<Utc>,
    pub exclusive: bool,
}

impl LockEntry {
    fn mode(&self) -> LockMode {
        if self.exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Append
        }
    }
}

/// Handle to an acquired lock. Hand it back to [`release_lock`].
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    mode: LockMode,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

/// Try once to take a lock of the given mode.
///
/// Writes our own record, then compares against every record whose key sorts
/// before ours. Keys start with a zero-padded timestamp, so the oldest
/// conflicting record wins and the loser removes its own record.
pub fn acquire_lock(storage: &dyn StorageBackend, mode: LockMode) -> Result<LockGuard> {
    cleanup_stale_locks(storage, STALE_LOCK_AGE)?;

    let now = Utc::now();
    let entry = LockEntry {
        hostname: crate::platform::hostname(),
        username: crate::platform::username(),
        pid: std::process::id(),
        time: now,
        exclusive: mode.is_exclusive(),
    };
    let suffix = format!("{:032x}", rand::random::<u128>());
    let key = format!(
        "{LOCKS_PREFIX}{:020}-{suffix}.json",
        now.timestamp_micros()
    );
    storage.put(&key, &serde_json::to_vec(&entry)?)?;

    let mut keys = list_lock_keys(storage)?;
    keys.sort();
    for other in keys.iter().take_while(|k| **k < key) {
        let other_mode = match storage.get(other)? {
            Some(data) => match serde_json::from_slice::<LockEntry>(&data) {
                Ok(e) => e.mode(),
                // Unreadable records are treated as exclusive holders.
                Err(_) => LockMode::Exclusive,
            },
            // Released between list and get.
            None => continue,
        };
        if mode.conflicts_with(other_mode) {
            if let Err(e) = storage.delete(&key) {
                warn!(key = %key, error = %e, "failed to remove losing lock record");
            }
            return Err(StrataError::Locked(other.clone()));
        }
    }

    debug!(key = %key, mode = %mode, "acquired repository lock");
    Ok(LockGuard { key, mode })
}

/// Acquire a lock, retrying on contention with exponential backoff plus
/// jitter until `retry_for` has elapsed. A zero window means one attempt.
///
/// The shutdown flag is checked before every attempt and while waiting;
/// once set, the wait ends with `Interrupted`.
pub fn acquire_lock_with_retry(
    storage: &dyn StorageBackend,
    mode: LockMode,
    retry_for: Duration,
    shutdown: Option<&AtomicBool>,
) -> Result<LockGuard> {
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        if is_shutdown(shutdown) {
            return Err(StrataError::Interrupted);
        }
        match acquire_lock(storage, mode) {
            Ok(guard) => return Ok(guard),
            Err(StrataError::Locked(holder)) => {
                let remaining = retry_for.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Err(StrataError::Locked(holder));
                }
                let delay = backoff_delay(attempt).min(remaining);
                attempt += 1;
                debug!(
                    attempt,
                    holder = %holder,
                    delay_ms = delay.as_millis() as u64,
                    "lock contention, retrying"
                );
                sleep_unless_shutdown(delay, shutdown)?;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_shutdown(shutdown: Option<&AtomicBool>) -> bool {
    shutdown.is_some_and(|f| f.load(Ordering::Relaxed))
}

/// Sleep for `delay` in short slices, bailing out when shutdown is requested.
fn sleep_unless_shutdown(delay: Duration, shutdown: Option<&AtomicBool>) -> Result<()> {
    let deadline = Instant::now() + delay;
    loop {
        if is_shutdown(shutdown) {
            return Err(StrataError::Interrupted);
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Ok(());
        }
        std::thread::sleep(left.min(SHUTDOWN_POLL));
    }
}

/// Exponential delay with +/-25% jitter, capped at [`RETRY_MAX_DELAY`].
fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE_DELAY.as_millis() as u64;
    let delay = base.saturating_mul(1 << attempt.min(6));
    let jitter_span = (delay / 2).max(1);
    let jitter = rand::random::<u64>() % jitter_span;
    let delay = (delay - delay / 4 + jitter).max(100);
    Duration::from_millis(delay).min(RETRY_MAX_DELAY)
}

pub fn release_lock(storage: &dyn StorageBackend, guard: LockGuard) -> Result<()> {
    storage.delete(&guard.key)?;
    debug!(key = %guard.key, "released repository lock");
    Ok(())
}

/// Forcibly remove every lock record, returning how many were removed.
///
/// Recovery tool for locks left behind by killed processes.
pub fn break_lock(storage: &dyn StorageBackend) -> Result<usize> {
    let mut removed = 0;
    for key in list_lock_keys(storage)? {
        storage.delete(&key)?;
        info!(key = %key, "removed lock");
        removed += 1;
    }
    Ok(removed)
}

/// Read every parseable lock record, oldest first.
pub fn list_locks(storage: &dyn StorageBackend) -> Result<Vec<(String, LockEntry)>> {
    let mut keys = list_lock_keys(storage)?;
    keys.sort();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(data) = storage.get(&key)? else {
            continue;
        };
        if let Ok(entry) = serde_json::from_slice::<LockEntry>(&data) {
            out.push((key, entry));
        }
    }
    Ok(out)
}

fn list_lock_keys(storage: &dyn StorageBackend) -> Result<Vec<String>> {
    let mut keys = storage.list(LOCKS_PREFIX)?;
    keys.retain(|k| k.starts_with(LOCKS_PREFIX) && k.ends_with(".json"));
    Ok(keys)
}

fn cleanup_stale_locks(storage: &dyn StorageBackend, max_age: Duration) -> Result<()> {
    let now = Utc::now();
    let max_age = chrono::Duration::from_std(max_age)
        .map_err(|e| StrataError::Other(format!("stale lock age: {e}")))?;
    for (key, entry) in list_locks(storage)? {
        if now.signed_duration_since(entry.time) > max_age {
            info!(key = %key, hostname = %entry.hostname, pid = entry.pid, "removing stale lock");
            if let Err(e) = storage.delete(&key) {
                warn!(key = %key, error = %e, "failed to remove stale lock");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn write_lock_entry_for_test(
    storage: &dyn StorageBackend,
    time: DateTime<Utc>,
    exclusive: bool,
) -> String {
    let entry = LockEntry {
        hostname: "other-host".into(),
        username: "other".into(),
        pid: 4242,
        time,
        exclusive,
    };
    let key = format!(
        "{LOCKS_PREFIX}{:020}-{:032x}.json",
        time.timestamp_micros(),
        rand::random::<u128>()
    );
    storage
        .put(&key, &serde_json::to_vec(&entry).unwrap())
        .unwrap();
    key
}
