use std::collections::HashSet;

use tracing::debug;

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use super::Snapshot;
use crate::repo::Repository;

/// Selects the newest snapshot that passes the filter.
pub const LATEST: &str = "latest";

/// Host, tag and path constraints applied to candidate snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotFilter {
    /// Any of these hosts.
    pub hosts: Vec<String>,
    /// Any group, where every tag of the group must be present.
    pub tags: Vec<Vec<String>>,
    /// All of these paths.
    pub paths: Vec<String>,
}

impl SnapshotFilter {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.tags.is_empty() && self.paths.is_empty()
    }

    pub fn matches(&self, snapshot: &Snapshot) -> bool {
        if !self.hosts.is_empty() && !self.hosts.iter().any(|h| *h == snapshot.hostname) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|group| snapshot.has_tags(group)) {
            return false;
        }
        snapshot.has_paths(&self.paths)
    }
}

/// Split `--tag a,b` values into groups. Empty entries are dropped.
pub fn parse_tag_groups<S: AsRef<str>>(raw: &[S]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|value| {
            value
                .as_ref()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|group| !group.is_empty())
        .collect()
}

/// Resolve a full id or a unique prefix against `ids`.
pub fn resolve_prefix(ids: &[ObjectId], prefix: &str) -> Result<ObjectId> {
    let mut found = ids.iter().filter(|id| id.has_hex_prefix(prefix));
    match (found.next(), found.next()) {
        (Some(id), None) => Ok(*id),
        (Some(_), Some(_)) => Err(StrataError::AmbiguousSnapshot(prefix.to_string())),
        (None, _) => Err(StrataError::SnapshotNotFound(prefix.to_string())),
    }
}

/// The newest snapshot among `ids` that passes `filter`.
pub fn find_latest(
    repo: &Repository,
    ids: &[ObjectId],
    filter: &SnapshotFilter,
) -> Result<ObjectId> {
    let mut latest: Option<(ObjectId, Snapshot)> = None;
    for id in ids {
        let snapshot = repo.load_snapshot(id)?;
        if !filter.matches(&snapshot) {
            continue;
        }
        let newer = latest
            .as_ref()
            .map_or(true, |(_, best)| snapshot.time > best.time);
        if newer {
            latest = Some((*id, snapshot));
        }
    }
    latest
        .map(|(id, _)| id)
        .ok_or_else(|| StrataError::SnapshotNotFound(LATEST.to_string()))
}

/// Lazily loads the selected snapshot records.
///
/// The id list is fixed when the iterator is created, so records written
/// while iterating are never visited.
pub struct SnapshotIter<'r> {
    repo: &'r Repository,
    ids: std::vec::IntoIter<ObjectId>,
    /// Applied only when selecting all snapshots.
    filter: Option<SnapshotFilter>,
}

impl Iterator for SnapshotIter<'_> {
    type Item = Result<(ObjectId, Snapshot)>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            let snapshot = match self.repo.load_snapshot(&id) {
                Ok(s) => s,
                Err(e) => return Some(Err(e)),
            };
            match &self.filter {
                Some(filter) if !filter.matches(&snapshot) => {
                    debug!(snapshot = %id, "skipping filtered snapshot");
                }
                _ => return Some(Ok((id, snapshot))),
            }
        }
        None
    }
}

/// Select snapshots by explicit arguments or, with none, by filter.
///
/// Arguments are full ids, unique id prefixes or `latest`. Explicit ids
/// bypass the filter; `latest` means the newest snapshot passing it.
/// Duplicates are visited once, in argument order.
pub fn find_snapshots<'r, S: AsRef<str>>(
    repo: &'r Repository,
    args: &[S],
    filter: &SnapshotFilter,
) -> Result<SnapshotIter<'r>> {
    let all = repo.list_snapshot_ids()?;
    if args.is_empty() {
        return Ok(SnapshotIter {
            repo,
            ids: all.into_iter(),
            filter: Some(filter.clone()),
        });
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(args.len());
    for arg in args {
        let arg = arg.as_ref();
        let id = if arg == LATEST {
            find_latest(repo, &all, filter)?
        } else {
            resolve_prefix(&all, arg)?
        };
        if seen.insert(id) {
            selected.push(id);
        }
    }
    Ok(SnapshotIter {
        repo,
        ids: selected.into_iter(),
        filter: None,
    })
}
