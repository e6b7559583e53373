use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info};

use super::util::{check_interrupted, open_repo, with_repo_lock};
use crate::config::StrataConfig;
use crate::filter::{ExcludeOptions, IncludeOptions, Selector};
use crate::repo::lock::LockMode;
use crate::repo::Repository;
use crate::rewrite::{
    emit_progress, replace_snapshot, MetadataOverride, RewriteEvent, RewriteRequest, TreeFilter,
    REWRITE_TAG,
};
use crate::snapshot::find::{find_snapshots, SnapshotFilter};
use strata_types::error::{Result, StrataError};

/// Accepted layout for `--new-time`, interpreted in local time.
pub const NEW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Options for `strata rewrite`.
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    pub forget: bool,
    pub dry_run: bool,
    pub new_host: Option<String>,
    pub new_time: Option<String>,
    pub snapshot_summary: bool,
    pub exclude: ExcludeOptions,
    pub include: IncludeOptions,
    pub filter: SnapshotFilter,
    /// Ids, id prefixes or `latest`; empty selects every snapshot.
    pub snapshots: Vec<String>,
}

impl RewriteOptions {
    fn has_metadata(&self) -> bool {
        self.new_host.is_some() || self.new_time.is_some()
    }

    /// Reject contradictory or empty requests before the repository is
    /// touched.
    pub fn validate(&self) -> Result<()> {
        if self.exclude.is_empty()
            && self.include.is_empty()
            && !self.has_metadata()
            && !self.snapshot_summary
        {
            return Err(StrataError::Usage(
                "Nothing to do: no excludes/includes provided and no new metadata provided".into(),
            ));
        }
        if !self.exclude.is_empty() && !self.include.is_empty() {
            return Err(StrataError::Usage(
                "exclude and include patterns are mutually exclusive".into(),
            ));
        }
        Ok(())
    }

    /// Parsed host/time overrides, or `None` when neither was given.
    pub fn metadata(&self) -> Result<Option<MetadataOverride>> {
        let time = self.new_time.as_deref().map(parse_new_time).transpose()?;
        Ok(MetadataOverride {
            hostname: self.new_host.clone(),
            time,
        }
        .non_empty())
    }

    pub fn lock_mode(&self) -> LockMode {
        LockMode::for_rewrite(self.forget)
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS` in the local time zone.
pub fn parse_new_time(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), NEW_TIME_FORMAT)
        .map_err(|e| StrataError::Usage(format!("invalid --new-time {raw:?}: {e}")))?;
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| {
            StrataError::Usage(format!("invalid --new-time {raw:?}: no such local time"))
        })?;
    Ok(local.with_timezone(&Utc))
}

/// Outcome of a rewrite run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// Snapshots handed to the replacer.
    pub examined: usize,
    /// Snapshots that were (or in a dry run, would be) modified.
    pub modified: usize,
    pub dry_run: bool,
}

impl RewriteStats {
    /// Closing line printed after the run.
    pub fn message(&self) -> String {
        match (self.modified, self.dry_run) {
            (0, false) => "no snapshots were modified".into(),
            (0, true) => "no snapshots would be modified".into(),
            (n, false) => format!("modified {n} snapshots"),
            (n, true) => format!("would modify {n} snapshots"),
        }
    }
}

/// Run `strata rewrite`.
pub fn run(
    config: &StrataConfig,
    opts: &RewriteOptions,
    shutdown: Option<&AtomicBool>,
) -> Result<RewriteStats> {
    run_with_progress(config, opts, shutdown, None)
}

pub fn run_with_progress(
    config: &StrataConfig,
    opts: &RewriteOptions,
    shutdown: Option<&AtomicBool>,
    mut progress: Option<&mut dyn FnMut(RewriteEvent)>,
) -> Result<RewriteStats> {
    opts.validate()?;
    let metadata = opts.metadata()?;
    let selector = Selector::from_options(&opts.exclude, &opts.include)?;
    let filter = TreeFilter::choose(selector, opts.snapshot_summary);
    let request = RewriteRequest {
        dry_run: opts.dry_run,
        forget: opts.forget,
        metadata,
        add_tag: REWRITE_TAG.to_string(),
        snapshot_summary: opts.snapshot_summary,
        upload_concurrency: config.upload_concurrency(),
    };
    let retry_for = config.lock_retry()?;

    let repo = open_repo(config)?;
    if opts.dry_run {
        debug!("dry run: not locking the repository");
        return rewrite_snapshots(&repo, opts, &filter, &request, shutdown, &mut progress);
    }
    with_repo_lock(&repo, opts.lock_mode(), retry_for, shutdown, |repo| {
        rewrite_snapshots(repo, opts, &filter, &request, shutdown, &mut progress)
    })
}

fn rewrite_snapshots(
    repo: &Repository,
    opts: &RewriteOptions,
    filter: &TreeFilter,
    request: &RewriteRequest,
    shutdown: Option<&AtomicBool>,
    progress: &mut Option<&mut dyn FnMut(RewriteEvent)>,
) -> Result<RewriteStats> {
    let objects = repo.load_index()?;
    debug!(objects, "loaded object index");

    let mut stats = RewriteStats {
        dry_run: request.dry_run,
        ..Default::default()
    };
    for entry in find_snapshots(repo, &opts.snapshots, &opts.filter)? {
        check_interrupted(shutdown)?;
        let (id, snapshot) = entry?;
        emit_progress(
            progress,
            RewriteEvent::SnapshotStarted {
                id,
                description: snapshot.describe(&id),
            },
        );
        stats.examined += 1;
        let changed = replace_snapshot(repo, id, snapshot, filter, request, shutdown, progress)
            .map_err(|e| StrataError::rewrite(id.to_string(), e))?;
        if changed {
            stats.modified += 1;
        }
    }

    info!(
        examined = stats.examined,
        modified = stats.modified,
        dry_run = stats.dry_run,
        "rewrite finished"
    );
    Ok(stats)
}
