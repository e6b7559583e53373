use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use crate::repo::format::ObjectType;
use crate::repo::Repository;
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;
use crate::tree::{Node, Tree};
use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

/// In-memory storage backend for testing. Thread-safe via Mutex.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored key under `prefix`, sorted.
    pub fn keys(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.keys(prefix))
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        let Some(data) = map.get(key) else {
            return Ok(None);
        };
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(length as usize).min(data.len());
        Ok(Some(data[start..end].to_vec()))
    }
}

/// Wraps a [`MemoryBackend`], failing `put` for keys under a prefix once
/// armed, and counting deletes.
pub struct FaultyBackend {
    pub inner: MemoryBackend,
    fail_prefix: Mutex<Option<String>>,
    failed_puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl FaultyBackend {
    pub fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_prefix: Mutex::new(None),
            failed_puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn fail_puts_under(&self, prefix: &str) {
        *self.fail_prefix.lock().unwrap() = Some(prefix.to_string());
    }

    pub fn failed_puts(&self) -> usize {
        self.failed_puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl StorageBackend for FaultyBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let armed = self.fail_prefix.lock().unwrap().clone();
        if armed.is_some_and(|p| key.starts_with(&p)) {
            self.failed_puts.fetch_add(1, Ordering::SeqCst);
            return Err(StrataError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure writing {key}"),
            )));
        }
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.inner.get_range(key, offset, length)
    }
}

/// Create a repository backed by a fresh [`MemoryBackend`].
pub fn test_repo() -> (Repository, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let repo = Repository::init(backend.clone()).expect("failed to init test repo");
    (repo, backend)
}

/// Create a repository backed by a [`FaultyBackend`].
pub fn faulty_repo() -> (Repository, Arc<FaultyBackend>) {
    let backend = Arc::new(FaultyBackend::new());
    let repo = Repository::init(backend.clone()).expect("failed to init test repo");
    (repo, backend)
}

/// Declarative tree description for tests.
#[derive(Debug, Clone)]
pub enum Entry {
    File(&'static str, &'static [u8]),
    Dir(&'static str, Vec<Entry>),
    Symlink(&'static str, &'static str),
}

pub fn file(name: &'static str, data: &'static [u8]) -> Entry {
    Entry::File(name, data)
}

pub fn dir(name: &'static str, children: Vec<Entry>) -> Entry {
    Entry::Dir(name, children)
}

/// Store `entries` (blobs and trees) directly and return the root tree id.
pub fn build_tree(repo: &Repository, entries: &[Entry]) -> ObjectId {
    let nodes = entries
        .iter()
        .map(|entry| match entry {
            Entry::File(name, data) => {
                let content = if data.is_empty() {
                    Vec::new()
                } else {
                    vec![repo.save_object(ObjectType::Blob, data).unwrap()]
                };
                Node::file(*name, data.len() as u64, content)
            }
            Entry::Dir(name, children) => Node::dir(*name, build_tree(repo, children)),
            Entry::Symlink(name, target) => Node::symlink(*name, *target),
        })
        .collect();
    repo.save_tree(&Tree::new(nodes)).unwrap()
}

pub fn sample_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

/// Build a tree from `entries` and save a snapshot of it.
pub fn make_snapshot(repo: &Repository, entries: &[Entry]) -> (ObjectId, Snapshot) {
    let tree = build_tree(repo, entries);
    let mut snapshot = Snapshot::new(tree, vec!["/data".into()], sample_time());
    snapshot.hostname = "host-a".into();
    snapshot.username = "alice".into();
    let id = repo.save_snapshot(&snapshot).unwrap();
    (id, snapshot)
}

/// Every path reachable from `tree_id`, depth first, directories with a
/// trailing `/`.
pub fn list_paths(repo: &Repository, tree_id: ObjectId) -> Vec<String> {
    fn walk(repo: &Repository, tree_id: ObjectId, prefix: &str, out: &mut Vec<String>) {
        let tree = repo.load_tree(&tree_id).unwrap();
        for node in tree.nodes() {
            let path = format!("{prefix}/{}", node.name);
            if let Some(subtree) = node.subtree {
                out.push(format!("{path}/"));
                walk(repo, subtree, &path, out);
            } else {
                out.push(path);
            }
        }
    }
    let mut out = Vec::new();
    walk(repo, tree_id, "", &mut out);
    out
}

/// Snapshot records currently stored, sorted by id.
pub fn all_snapshots(repo: &Repository) -> Vec<(ObjectId, Snapshot)> {
    repo.list_snapshot_ids()
        .unwrap()
        .into_iter()
        .map(|id| (id, repo.load_snapshot(&id).unwrap()))
        .collect()
}
