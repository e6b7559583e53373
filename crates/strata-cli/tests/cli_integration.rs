use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use strata_core::repo::format::ObjectType;
use strata_core::repo::lock::{self, LockMode};
use strata_core::repo::Repository;
use strata_core::snapshot::Snapshot;
use strata_core::storage::LocalBackend;
use strata_core::tree::{Node, Tree};
use strata_types::ObjectId;

struct CliFixture {
    _tmp: TempDir,
    home_dir: PathBuf,
    work_dir: PathBuf,
    repo_dir: PathBuf,
    config_path: PathBuf,
}

impl CliFixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let home_dir = tmp.path().join("home");
        let work_dir = tmp.path().join("work");
        let repo_dir = tmp.path().join("repo");
        let config_path = tmp.path().join("strata.yaml");

        std::fs::create_dir_all(&home_dir).unwrap();
        std::fs::create_dir_all(&work_dir).unwrap();

        Self {
            _tmp: tmp,
            home_dir,
            work_dir,
            repo_dir,
            config_path,
        }
    }

    fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(strata_binary_path());
        cmd.args(args);
        cmd.current_dir(&self.work_dir);
        cmd.env("HOME", &self.home_dir);
        cmd.env("XDG_CONFIG_HOME", self.home_dir.join(".config"));
        cmd.env_remove("STRATA_CONFIG");
        cmd.env_remove("STRATA_REPOSITORY");
        cmd.env("NO_COLOR", "1");
        cmd.output().unwrap()
    }

    /// Run against the fixture repository via `--repo`.
    fn run_repo(&self, args: &[&str]) -> Output {
        let repo = self.repo_dir.to_string_lossy().to_string();
        let mut full = vec!["--repo", repo.as_str()];
        full.extend_from_slice(args);
        self.run(&full)
    }

    fn run_ok(&self, args: &[&str]) -> String {
        let output = self.run_repo(args);
        if !output.status.success() {
            panic!(
                "command failed: {:?}\nstdout:\n{}\nstderr:\n{}",
                args,
                stdout(&output),
                stderr(&output)
            );
        }
        stdout(&output)
    }

    fn run_err(&self, args: &[&str]) -> (i32, String) {
        let output = self.run_repo(args);
        assert!(
            !output.status.success(),
            "command unexpectedly succeeded: {:?}\nstdout:\n{}\nstderr:\n{}",
            args,
            stdout(&output),
            stderr(&output)
        );
        (output.status.code().unwrap_or(-1), stderr(&output))
    }

    fn open_repo(&self) -> Repository {
        let storage = Arc::new(LocalBackend::new(self.repo_dir.to_str().unwrap()).unwrap());
        Repository::open(storage).unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn strata_binary_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_strata"))
}

fn yaml_quote_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
}

fn file_node(repo: &Repository, name: &str, data: &[u8]) -> Node {
    let blob = repo.save_object(ObjectType::Blob, data).unwrap();
    Node::file(name, data.len() as u64, vec![blob])
}

/// `/docs/report.txt`, `/docs/debug.log`, `/tmp/scratch.bin`
fn seed_snapshot(repo: &Repository, host: &str) -> ObjectId {
    let docs = repo
        .save_tree(&Tree::new(vec![
            file_node(repo, "debug.log", b"noise"),
            file_node(repo, "report.txt", b"quarterly"),
        ]))
        .unwrap();
    let tmp = repo
        .save_tree(&Tree::new(vec![file_node(repo, "scratch.bin", &[7u8; 512])]))
        .unwrap();
    let root = repo
        .save_tree(&Tree::new(vec![Node::dir("docs", docs), Node::dir("tmp", tmp)]))
        .unwrap();
    let mut snapshot = Snapshot::new(
        root,
        vec!["/docs".into(), "/tmp".into()],
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
    );
    snapshot.hostname = host.into();
    snapshot.username = "ops".into();
    repo.save_snapshot(&snapshot).unwrap()
}

fn root_names(repo: &Repository, snapshot: &Snapshot) -> Vec<String> {
    repo.load_tree(&snapshot.tree.unwrap())
        .unwrap()
        .nodes()
        .iter()
        .map(|n| n.name.clone())
        .collect()
}

#[test]
fn cli_init_then_rewrite_with_forget() {
    let fx = CliFixture::new();
    let out = fx.run_ok(&["init"]);
    assert!(out.contains("Repository initialized at:"), "{out}");

    let repo = fx.open_repo();
    let original = seed_snapshot(&repo, "web-1");

    let out = fx.run_ok(&["rewrite", "--forget", "-e", "/tmp", "-e", "*.log"]);
    assert!(out.contains("removed old snapshot"), "{out}");
    assert!(out.contains("modified 1 snapshots"), "{out}");

    let ids = repo.list_snapshot_ids().unwrap();
    assert_eq!(ids.len(), 1);
    assert_ne!(ids[0], original);
    let rewritten = repo.load_snapshot(&ids[0]).unwrap();
    assert_eq!(rewritten.original, Some(original));
    assert!(!rewritten.tags.contains(&"rewrite".to_string()));
    assert_eq!(root_names(&repo, &rewritten), vec!["docs"]);

    let out = fx.run_ok(&["rewrite", "-e", "/tmp"]);
    assert!(out.contains("no snapshots were modified"), "{out}");
}

#[test]
fn cli_dry_run_changes_nothing() {
    let fx = CliFixture::new();
    fx.run_ok(&["init"]);
    let repo = fx.open_repo();
    let id = seed_snapshot(&repo, "web-1");

    let out = fx.run_ok(&[
        "rewrite",
        "-n",
        "--new-host",
        "web-2",
        "--exclude",
        "*.log",
        &id.to_string(),
    ]);
    assert!(out.contains("would save new snapshot"), "{out}");
    assert!(out.contains("would set hostname to web-2"), "{out}");
    assert!(out.contains("would modify 1 snapshots"), "{out}");
    assert_eq!(repo.list_snapshot_ids().unwrap(), vec![id]);
}

#[test]
fn cli_config_file_and_host_filter() {
    let fx = CliFixture::new();
    std::fs::write(
        &fx.config_path,
        format!(
            "repository:\n  url: {}\nupload:\n  concurrency: 2\n",
            yaml_quote_path(&fx.repo_dir)
        ),
    )
    .unwrap();
    let config = fx.config_path.to_string_lossy().to_string();

    let output = fx.run(&["-c", &config, "init"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let repo = fx.open_repo();
    seed_snapshot(&repo, "web-1");
    seed_snapshot(&repo, "db-1");

    let output = fx.run(&["-c", &config, "rewrite", "--host", "db-1", "-i", "/docs"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).contains("modified 1 snapshots"));

    let snapshots: Vec<Snapshot> = repo
        .list_snapshot_ids()
        .unwrap()
        .iter()
        .map(|id| repo.load_snapshot(id).unwrap())
        .collect();
    assert_eq!(snapshots.len(), 3);
    let tagged: Vec<&Snapshot> = snapshots
        .iter()
        .filter(|s| s.tags.contains(&"rewrite".to_string()))
        .collect();
    assert_eq!(tagged.len(), 1);
    assert_eq!(tagged[0].hostname, "db-1");
    assert_eq!(root_names(&repo, tagged[0]), vec!["docs"]);
}

#[test]
fn cli_usage_errors_exit_one() {
    let fx = CliFixture::new();
    fx.run_ok(&["init"]);

    let (code, err) = fx.run_err(&["rewrite"]);
    assert_eq!(code, 1);
    assert!(err.contains("Nothing to do"), "{err}");

    let (code, err) = fx.run_err(&["rewrite", "-e", "*.log", "-i", "/docs"]);
    assert_eq!(code, 1);
    assert!(err.contains("mutually exclusive"), "{err}");

    let (code, err) = fx.run_err(&["rewrite", "--new-time", "yesterday"]);
    assert_eq!(code, 1);
    assert!(err.contains("--new-time"), "{err}");
}

#[test]
fn cli_missing_repository_exits_ten() {
    let fx = CliFixture::new();
    let (code, err) = fx.run_err(&["rewrite", "-e", "*.log"]);
    assert_eq!(code, 10);
    assert!(err.contains("repository not found"), "{err}");
}

#[test]
fn cli_locked_repository_exits_eleven_until_break_lock() {
    let fx = CliFixture::new();
    fx.run_ok(&["init"]);
    let repo = fx.open_repo();
    seed_snapshot(&repo, "web-1");

    let _held = lock::acquire_lock(repo.storage().as_ref(), LockMode::Exclusive).unwrap();

    let (code, err) = fx.run_err(&["rewrite", "-e", "*.log"]);
    assert_eq!(code, 11);
    assert!(err.contains("locked"), "{err}");

    let out = fx.run_ok(&["break-lock"]);
    assert!(out.contains("Removed 1 lock(s)."), "{out}");
    let out = fx.run_ok(&["break-lock"]);
    assert!(out.contains("No locks found."), "{out}");

    let out = fx.run_ok(&["rewrite", "-e", "*.log"]);
    assert!(out.contains("modified 1 snapshots"), "{out}");
}

#[test]
fn cli_init_twice_fails() {
    let fx = CliFixture::new();
    fx.run_ok(&["init"]);
    let (code, err) = fx.run_err(&["init"]);
    assert_eq!(code, 1);
    assert!(err.contains("already exists"), "{err}");
}

#[test]
fn cli_usage_errors_win_without_repository() {
    let fx = CliFixture::new();

    let output = fx.run(&["rewrite", "-e", "*.log", "-i", "/docs"]);
    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("mutually exclusive"), "{err}");
    assert!(!err.contains("no repository given"), "{err}");

    let output = fx.run(&["rewrite"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Nothing to do"));

    // Well-formed flags get as far as config resolution.
    let output = fx.run(&["rewrite", "-e", "*.log"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no repository given"));
}
