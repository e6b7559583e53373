use std::sync::atomic::AtomicBool;

use chrono::{Local, TimeZone};

use crate::commands;
use crate::commands::rewrite::{parse_new_time, RewriteOptions, RewriteStats};
use crate::commands::util::open_repo;
use crate::config::{RepositoryConfig, StrataConfig};
use crate::filter::{ExcludeOptions, IncludeOptions};
use crate::repo::lock::{acquire_lock, list_locks, release_lock, LockMode};
use crate::rewrite::RewriteEvent;
use crate::testutil::{all_snapshots, dir, file, list_paths, make_snapshot};
use strata_types::error::StrataError;
use strata_types::ObjectId;

fn make_test_config(repo_dir: &std::path::Path) -> StrataConfig {
    StrataConfig {
        repository: RepositoryConfig {
            url: repo_dir.to_string_lossy().to_string(),
        },
        ..Default::default()
    }
}

/// Initialize a repository with one snapshot and return its config and id.
fn setup() -> (tempfile::TempDir, StrataConfig, ObjectId) {
    let tmp = tempfile::tempdir().unwrap();
    let config = make_test_config(&tmp.path().join("repo"));
    let repo = commands::init::run(&config).unwrap();
    let (id, _) = make_snapshot(
        &repo,
        &[
            file("a.txt", b"hello"),
            file("b.log", b"0123456789"),
            dir("cache", vec![file("blob", b"zzz")]),
        ],
    );
    (tmp, config, id)
}

fn excluding(patterns: &[&str]) -> RewriteOptions {
    RewriteOptions {
        exclude: ExcludeOptions {
            excludes: patterns.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn nothing_to_do_is_rejected_before_repository_access() {
    let tmp = tempfile::tempdir().unwrap();
    let config = make_test_config(&tmp.path().join("does-not-exist"));
    let err = commands::rewrite::run(&config, &RewriteOptions::default(), None).unwrap_err();
    match err {
        StrataError::Usage(msg) => assert!(msg.starts_with("Nothing to do"), "{msg}"),
        other => panic!("expected usage error, got {other:?}"),
    }
}

#[test]
fn exclude_and_include_are_mutually_exclusive_before_locking() {
    let (_tmp, config, _) = setup();
    let repo = open_repo(&config).unwrap();
    let held = acquire_lock(repo.storage().as_ref(), LockMode::Exclusive).unwrap();

    let mut opts = excluding(&["*.log"]);
    opts.include = IncludeOptions {
        includes: vec!["*.txt".into()],
        ..Default::default()
    };
    let err = commands::rewrite::run(&config, &opts, None).unwrap_err();
    match err {
        StrataError::Usage(msg) => {
            assert_eq!(msg, "exclude and include patterns are mutually exclusive")
        }
        other => panic!("expected usage error, got {other:?}"),
    }
    assert_eq!(list_locks(repo.storage().as_ref()).unwrap().len(), 1);
    release_lock(repo.storage().as_ref(), held).unwrap();
}

#[test]
fn malformed_new_time_is_a_usage_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = make_test_config(&tmp.path().join("does-not-exist"));
    let opts = RewriteOptions {
        new_time: Some("yesterday".into()),
        ..Default::default()
    };
    assert!(matches!(
        commands::rewrite::run(&config, &opts, None),
        Err(StrataError::Usage(_))
    ));
}

#[test]
fn new_time_is_parsed_as_local_time() {
    let parsed = parse_new_time("2024-05-06 07:08:09").unwrap();
    let expected = Local
        .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
        .earliest()
        .unwrap();
    assert_eq!(parsed, expected);
    assert!(parse_new_time("2024-05-06").is_err());
}

#[test]
fn rewrite_excludes_files_and_releases_lock() {
    let (_tmp, config, id) = setup();
    let mut lines = Vec::new();
    let mut record = |e: RewriteEvent| lines.push(e.to_string());

    let stats = commands::rewrite::run_with_progress(
        &config,
        &excluding(&["*.log", "/cache"]),
        None,
        Some(&mut record),
    )
    .unwrap();
    assert_eq!(stats.examined, 1);
    assert_eq!(stats.modified, 1);
    assert_eq!(stats.message(), "modified 1 snapshots");
    assert!(lines[0].contains(&format!("snapshot {id}")), "{lines:?}");
    assert!(lines[1].starts_with("saved new snapshot"), "{lines:?}");

    let repo = open_repo(&config).unwrap();
    assert!(list_locks(repo.storage().as_ref()).unwrap().is_empty());
    let snapshots = all_snapshots(&repo);
    assert_eq!(snapshots.len(), 2);
    let (_, rewritten) = snapshots
        .iter()
        .find(|(sid, _)| *sid != id)
        .unwrap()
        .clone();
    assert_eq!(list_paths(&repo, rewritten.tree.unwrap()), ["/a.txt"]);
}

#[test]
fn second_run_is_a_no_op() {
    let (_tmp, config, _) = setup();
    let mut opts = excluding(&["*.log"]);
    opts.forget = true;
    commands::rewrite::run(&config, &opts, None).unwrap();

    let stats = commands::rewrite::run(&config, &opts, None).unwrap();
    assert_eq!(stats.modified, 0);
    assert_eq!(stats.message(), "no snapshots were modified");
    assert_eq!(all_snapshots(&open_repo(&config).unwrap()).len(), 1);
}

#[test]
fn dry_run_needs_no_lock_and_changes_nothing() {
    let (_tmp, config, id) = setup();
    let repo = open_repo(&config).unwrap();
    let held = acquire_lock(repo.storage().as_ref(), LockMode::Exclusive).unwrap();

    let mut opts = excluding(&["*.log"]);
    opts.dry_run = true;
    opts.forget = true;
    let stats = commands::rewrite::run(&config, &opts, None).unwrap();
    assert_eq!(stats.message(), "would modify 1 snapshots");
    let ids: Vec<_> = all_snapshots(&repo).into_iter().map(|(i, _)| i).collect();
    assert_eq!(ids, vec![id]);
    release_lock(repo.storage().as_ref(), held).unwrap();

    let mut noop = excluding(&["*.nothing"]);
    noop.dry_run = true;
    assert_eq!(
        commands::rewrite::run(&config, &noop, None).unwrap().message(),
        "no snapshots would be modified"
    );
}

#[test]
fn forget_requires_exclusive_lock() {
    let (_tmp, config, _) = setup();
    let repo = open_repo(&config).unwrap();
    let held = acquire_lock(repo.storage().as_ref(), LockMode::Append).unwrap();

    let mut opts = excluding(&["*.log"]);
    opts.forget = true;
    assert!(matches!(
        commands::rewrite::run(&config, &opts, None),
        Err(StrataError::Locked(_))
    ));

    // Without forget an append lock is enough.
    opts.forget = false;
    let stats = commands::rewrite::run(&config, &opts, None).unwrap();
    assert_eq!(stats.modified, 1);
    release_lock(repo.storage().as_ref(), held).unwrap();
}

#[test]
fn metadata_only_rewrite_selected_by_host() {
    let (_tmp, config, id) = setup();
    let opts = RewriteOptions {
        new_host: Some("renamed".into()),
        forget: true,
        filter: crate::snapshot::find::SnapshotFilter {
            hosts: vec!["host-a".into()],
            ..Default::default()
        },
        ..Default::default()
    };
    assert_eq!(commands::rewrite::run(&config, &opts, None).unwrap().modified, 1);

    let snapshots = all_snapshots(&open_repo(&config).unwrap());
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].1.hostname, "renamed");
    assert_eq!(snapshots[0].1.original, Some(id));

    // The renamed snapshot no longer matches the host filter.
    assert_eq!(commands::rewrite::run(&config, &opts, None).unwrap().examined, 0);
}

#[test]
fn unknown_snapshot_fails_and_releases_lock() {
    let (_tmp, config, _) = setup();
    let mut opts = excluding(&["*.log"]);
    opts.snapshots = vec!["ffffffffffff".into()];
    assert!(matches!(
        commands::rewrite::run(&config, &opts, None),
        Err(StrataError::SnapshotNotFound(_))
    ));
    let repo = open_repo(&config).unwrap();
    assert!(list_locks(repo.storage().as_ref()).unwrap().is_empty());
}

#[test]
fn interruption_aborts_and_releases_lock() {
    let (_tmp, config, _) = setup();
    let flag = AtomicBool::new(true);
    let err = commands::rewrite::run(&config, &excluding(&["*.log"]), Some(&flag)).unwrap_err();
    assert!(err.is_interrupted());
    let repo = open_repo(&config).unwrap();
    assert!(list_locks(repo.storage().as_ref()).unwrap().is_empty());
    assert_eq!(all_snapshots(&repo).len(), 1);
}

#[test]
fn per_snapshot_failures_name_the_snapshot() {
    let (_tmp, config, _) = setup();
    let repo = open_repo(&config).unwrap();
    let (_, mut sn) = all_snapshots(&repo).remove(0);
    sn.tree = None;
    let broken = repo.save_snapshot(&sn).unwrap();

    let mut opts = excluding(&["*.log"]);
    opts.snapshots = vec![broken.to_hex()];
    let err = commands::rewrite::run(&config, &opts, None).unwrap_err();
    assert_eq!(
        err.to_string(),
        format!(
            "unable to rewrite snapshot ID \"{broken}\": snapshot {broken} has no tree"
        )
    );
}

#[test]
fn missing_repository_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let config = make_test_config(&tmp.path().join("nowhere"));
    assert!(matches!(
        commands::rewrite::run(&config, &excluding(&["*.log"]), None),
        Err(StrataError::RepoNotFound(_))
    ));
}

#[test]
fn stats_messages() {
    let stats = |modified, dry_run| RewriteStats {
        examined: 3,
        modified,
        dry_run,
    };
    assert_eq!(stats(0, false).message(), "no snapshots were modified");
    assert_eq!(stats(0, true).message(), "no snapshots would be modified");
    assert_eq!(stats(2, false).message(), "modified 2 snapshots");
    assert_eq!(stats(2, true).message(), "would modify 2 snapshots");
}
