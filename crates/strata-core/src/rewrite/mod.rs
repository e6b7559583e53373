pub mod tree;

use std::fmt;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, warn};

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use crate::concurrency::TaskGroup;
use crate::filter::Selector;
use crate::repo::upload::{HashOnlySaver, UploadPipeline};
use crate::repo::Repository;
use crate::snapshot::{Snapshot, SnapshotSummary};

pub use self::tree::{RewriteResult, SizeSummary, TreeRewriter};

/// Tag added to rewritten snapshots that are kept alongside the original.
pub const REWRITE_TAG: &str = "rewrite";

/// Replacement host and/or time for rewritten snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataOverride {
    pub hostname: Option<String>,
    pub time: Option<DateTime<Utc>>,
}

impl MetadataOverride {
    /// `None` when neither field is set.
    pub fn non_empty(self) -> Option<Self> {
        if self.hostname.is_none() && self.time.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

/// Per-run settings for [`replace_snapshot`].
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub dry_run: bool,
    pub forget: bool,
    pub metadata: Option<MetadataOverride>,
    pub add_tag: String,
    /// Attach a summary to snapshots that have none.
    pub snapshot_summary: bool,
    pub upload_concurrency: usize,
}

impl Default for RewriteRequest {
    fn default() -> Self {
        Self {
            dry_run: false,
            forget: false,
            metadata: None,
            add_tag: REWRITE_TAG.to_string(),
            snapshot_summary: false,
            upload_concurrency: crate::config::clamp_upload_concurrency(4),
        }
    }
}

/// How the tree of each snapshot is produced. Chosen once per run.
pub enum TreeFilter {
    /// Keep the tree as-is (metadata-only rewrites).
    Identity,
    /// Rebuild through a selector.
    Rewrite(TreeRewriter),
    /// Walk with an accept-all selector to compute a missing summary.
    SummaryOnly(TreeRewriter),
}

impl TreeFilter {
    /// Choose the filter for a run from its selector and flags.
    pub fn choose(selector: Selector, snapshot_summary: bool) -> Self {
        if selector.is_filtering() {
            TreeFilter::Rewrite(TreeRewriter::new(selector))
        } else if snapshot_summary {
            TreeFilter::SummaryOnly(TreeRewriter::new(Selector::accept_all()))
        } else {
            TreeFilter::Identity
        }
    }
}

/// What happened while processing one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteEvent {
    SnapshotStarted { id: ObjectId, description: String },
    NothingIncluded,
    WouldDeleteEmpty,
    RemovedEmpty { id: ObjectId },
    WouldSaveNew,
    WouldRemoveOld,
    WouldSetTime(DateTime<Utc>),
    WouldSetHostname(String),
    SettingTime(DateTime<Utc>),
    SettingHostname(String),
    SavedNew { id: ObjectId },
    RemovedOld { id: ObjectId },
}

fn local_time(t: &DateTime<Utc>) -> String {
    t.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

impl fmt::Display for RewriteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteEvent::SnapshotStarted { description, .. } => write!(f, "\n{description}"),
            RewriteEvent::NothingIncluded => {
                write!(f, "no files included, keeping snapshot unchanged")
            }
            RewriteEvent::WouldDeleteEmpty => write!(f, "would delete empty snapshot"),
            RewriteEvent::RemovedEmpty { id } => write!(f, "removed empty snapshot {id}"),
            RewriteEvent::WouldSaveNew => write!(f, "would save new snapshot"),
            RewriteEvent::WouldRemoveOld => write!(f, "would remove old snapshot"),
            RewriteEvent::WouldSetTime(t) => write!(f, "would set time to {}", local_time(t)),
            RewriteEvent::WouldSetHostname(h) => write!(f, "would set hostname to {h}"),
            RewriteEvent::SettingTime(t) => write!(f, "setting time to {}", local_time(t)),
            RewriteEvent::SettingHostname(h) => write!(f, "setting host to {h}"),
            RewriteEvent::SavedNew { id } => write!(f, "saved new snapshot {id}"),
            RewriteEvent::RemovedOld { id } => write!(f, "removed old snapshot {id}"),
        }
    }
}

pub(crate) fn emit_progress(progress: &mut Option<&mut dyn FnMut(RewriteEvent)>, event: RewriteEvent) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

/// Outcome of filtering one snapshot's tree.
struct Filtered {
    tree: Option<ObjectId>,
    summary: Option<SizeSummary>,
}

fn run_filter(
    repo: &Repository,
    snapshot: &Snapshot,
    root: ObjectId,
    filter: &TreeFilter,
    request: &RewriteRequest,
    shutdown: Option<&AtomicBool>,
    progress: &mut Option<&mut dyn FnMut(RewriteEvent)>,
) -> Result<Filtered> {
    let rewriter = match filter {
        TreeFilter::Identity => {
            return Ok(Filtered {
                tree: Some(root),
                summary: None,
            })
        }
        // Snapshots that already carry a summary have nothing to gain here.
        TreeFilter::SummaryOnly(_) if snapshot.summary.is_some() => {
            return Ok(Filtered {
                tree: Some(root),
                summary: None,
            })
        }
        TreeFilter::Rewrite(rw) | TreeFilter::SummaryOnly(rw) => rw,
    };

    let group = TaskGroup::new(shutdown);
    let result = if request.dry_run {
        let result = rewriter.rewrite(repo, &HashOnlySaver::new(repo), &group, "/", root)?;
        group.finish()?;
        result
    } else {
        let pipeline = UploadPipeline::new(repo, request.upload_concurrency);
        let (result, stats) = pipeline.run(&group, |saver| {
            rewriter.rewrite(repo, saver, &group, "/", root)
        })?;
        debug!(
            trees_queued = stats.queued,
            trees_uploaded = stats.uploaded,
            "filtered snapshot tree"
        );
        result
    };

    if result.new_tree.is_none() && rewriter.selector().has_includes() {
        warn!("no files included, keeping snapshot unchanged");
        emit_progress(progress, RewriteEvent::NothingIncluded);
        return Ok(Filtered {
            tree: Some(root),
            summary: None,
        });
    }
    Ok(Filtered {
        tree: result.new_tree,
        summary: Some(result.summary),
    })
}

/// Filter one snapshot and, if anything changed, replace it.
///
/// Returns whether the snapshot was (or in a dry run, would be) modified.
/// The new record is written only after every new tree has been flushed, so
/// a failure at any earlier point leaves the repository as it was.
pub fn replace_snapshot(
    repo: &Repository,
    id: ObjectId,
    mut snapshot: Snapshot,
    filter: &TreeFilter,
    request: &RewriteRequest,
    shutdown: Option<&AtomicBool>,
    progress: &mut Option<&mut dyn FnMut(RewriteEvent)>,
) -> Result<bool> {
    let root = snapshot
        .tree
        .ok_or_else(|| StrataError::MalformedSnapshot(id.to_string()))?;

    let filtered = run_filter(
        repo,
        &snapshot,
        root,
        filter,
        request,
        shutdown,
        progress,
    )?;

    let Some(new_tree) = filtered.tree else {
        if request.dry_run {
            emit_progress(progress, RewriteEvent::WouldDeleteEmpty);
        } else {
            repo.delete_snapshot(&id)?;
            emit_progress(progress, RewriteEvent::RemovedEmpty { id });
        }
        return Ok(true);
    };

    let attach_summary = request.snapshot_summary && snapshot.summary.is_none();
    if new_tree == root && request.metadata.is_none() && !attach_summary {
        debug!(snapshot = %id, "snapshot not modified");
        return Ok(false);
    }

    let metadata = request.metadata.clone().unwrap_or_default();
    if snapshot.original.is_none() {
        snapshot.original = Some(id);
    }
    snapshot.tree = Some(new_tree);

    if let Some(size) = filtered.summary {
        match snapshot.summary.as_mut() {
            Some(summary) => {
                summary.total_files_processed = size.file_count;
                summary.total_bytes_processed = size.file_size;
            }
            None if request.snapshot_summary => {
                snapshot.summary = Some(SnapshotSummary {
                    backup_start: snapshot.time,
                    backup_end: snapshot.time,
                    total_files_processed: size.file_count,
                    total_bytes_processed: size.file_size,
                    ..Default::default()
                });
            }
            None => {}
        }
    }

    if !request.forget {
        snapshot.add_tags(&[request.add_tag.as_str()]);
    }
    if let Some(time) = metadata.time {
        snapshot.time = time;
    }
    if let Some(host) = &metadata.hostname {
        snapshot.hostname = host.clone();
    }

    // Saving an identical record would return `id` itself, and forgetting
    // would then delete the only copy.
    if repo.snapshot_id(&snapshot)? == id {
        debug!(snapshot = %id, "rewritten record identical to original");
        return Ok(false);
    }

    if request.dry_run {
        emit_progress(progress, RewriteEvent::WouldSaveNew);
        if request.forget {
            emit_progress(progress, RewriteEvent::WouldRemoveOld);
        }
        if let Some(time) = metadata.time {
            emit_progress(progress, RewriteEvent::WouldSetTime(time));
        }
        if let Some(host) = metadata.hostname {
            emit_progress(progress, RewriteEvent::WouldSetHostname(host));
        }
        return Ok(true);
    }

    if let Some(time) = metadata.time {
        emit_progress(progress, RewriteEvent::SettingTime(time));
    }
    if let Some(host) = metadata.hostname {
        emit_progress(progress, RewriteEvent::SettingHostname(host));
    }

    let new_id = repo.save_snapshot(&snapshot)?;
    emit_progress(progress, RewriteEvent::SavedNew { id: new_id });

    if request.forget {
        repo.delete_snapshot(&id)?;
        emit_progress(progress, RewriteEvent::RemovedOld { id });
    }
    Ok(true)
}
