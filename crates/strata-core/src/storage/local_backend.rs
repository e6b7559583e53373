use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use strata_types::error::{Result, StrataError};

use crate::storage::StorageBackend;

/// Repository stored in a plain directory tree on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        // Canonicalize existing roots so strip_prefix works through symlinks.
        let root = if root_path.exists() {
            fs::canonicalize(&root_path)?
        } else {
            root_path
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could resolve outside the repository root.
    fn check_key(key: &str) -> Result<()> {
        let unsafe_key = |why: &str| {
            Err(StrataError::InvalidFormat(format!(
                "unsafe storage key '{key}': {why}"
            )))
        };
        if key.is_empty() {
            return unsafe_key("empty");
        }
        if key.starts_with('/') || key.contains('\\') {
            return unsafe_key("not a relative '/'-separated path");
        }
        if Path::new(key)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return unsafe_key("parent traversal");
        }
        Ok(())
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        Self::check_key(key)?;
        Ok(self.root.join(key))
    }

    /// Stage into a sibling temp file and rename over the target.
    fn write_atomically(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        let mut staged = tempfile::NamedTempFile::new_in(dir)?;
        staged.write_all(data)?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn collect_keys(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.collect_keys(&entry.path(), keys)?;
                continue;
            }
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // In-flight temp files from write_atomically are not objects.
            if key.rsplit('/').next().is_some_and(|name| name.starts_with(".tmp")) {
                continue;
            }
            keys.push(key);
        }
        Ok(())
    }
}

fn not_found(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

impl StorageBackend for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            if !parent.is_dir() {
                fs::create_dir_all(parent)?;
            }
        }
        self.write_atomically(&path, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)?) {
            Ok(()) => Ok(()),
            Err(e) if not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        match fs::metadata(self.path_for(key)?) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if not_found(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = match prefix.trim_end_matches('/') {
            "" => self.root.clone(),
            p => self.path_for(p)?,
        };
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut keys = Vec::new();
                self.collect_keys(&dir, &mut keys)?;
                keys.sort();
                Ok(keys)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if not_found(&e) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let mut file = match fs::File::open(self.path_for(key)?) {
            Ok(f) => f,
            Err(e) if not_found(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut buf)?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path().to_str().unwrap()).unwrap();
        (dir, backend)
    }

    #[test]
    fn check_key_rejects_escapes() {
        for key in ["", "/etc/passwd", "..\\x", "data/../../etc", "../outside"] {
            assert!(LocalBackend::check_key(key).is_err(), "accepted {key:?}");
        }
        for key in ["config", "data/ab/abcdef", "snapshots/01", "locks/x.json"] {
            assert!(LocalBackend::check_key(key).is_ok(), "rejected {key:?}");
        }
    }

    #[test]
    fn put_get_delete_cycle() {
        let (_dir, backend) = backend();
        assert_eq!(backend.get("snapshots/aa").unwrap(), None);
        backend.put("snapshots/aa", b"record").unwrap();
        assert!(backend.exists("snapshots/aa").unwrap());
        assert_eq!(backend.get("snapshots/aa").unwrap().unwrap(), b"record");
        backend.delete("snapshots/aa").unwrap();
        assert!(!backend.exists("snapshots/aa").unwrap());
        // deleting again is fine
        backend.delete("snapshots/aa").unwrap();
    }

    #[test]
    fn list_walks_nested_dirs_sorted() {
        let (_dir, backend) = backend();
        backend.put("data/ff/ff01", b"b").unwrap();
        backend.put("data/0a/0a01", b"a").unwrap();
        backend.put("snapshots/s1", b"s").unwrap();
        backend.put("config", b"c").unwrap();

        assert_eq!(
            backend.list("data").unwrap(),
            vec!["data/0a/0a01", "data/ff/ff01"]
        );
        assert_eq!(backend.list("data/").unwrap().len(), 2);
        assert_eq!(backend.list("").unwrap().len(), 4);
        assert!(backend.list("locks").unwrap().is_empty());
    }

    #[test]
    fn get_range_clamps_to_object_end() {
        let (_dir, backend) = backend();
        backend.put("data/ab/blob", b"0123456789").unwrap();
        assert_eq!(
            backend.get_range("data/ab/blob", 2, 3).unwrap().unwrap(),
            b"234"
        );
        assert_eq!(
            backend.get_range("data/ab/blob", 8, 100).unwrap().unwrap(),
            b"89"
        );
        assert_eq!(backend.get_range("data/ab/missing", 0, 4).unwrap(), None);
    }

    #[test]
    fn traversal_keys_fail_every_operation() {
        let (_dir, backend) = backend();
        assert!(backend.get("../../etc/passwd").is_err());
        assert!(backend.put("../escape", b"bad").is_err());
        assert!(backend.delete("/absolute").is_err());
    }

    #[test]
    fn concurrent_puts_never_mix_payloads() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        let (_dir, backend) = backend();
        let backend = Arc::new(backend);
        backend.put("snapshots/contested", b"seed").unwrap();

        let payload_a = vec![0xAAu8; 64 * 1024];
        let payload_b = vec![0xBBu8; 64 * 1024];
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [payload_a.clone(), payload_b.clone()]
            .into_iter()
            .map(|payload| {
                let backend = Arc::clone(&backend);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    backend.put("snapshots/contested", &payload).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let result = backend.get("snapshots/contested").unwrap().unwrap();
        assert!(result == payload_a || result == payload_b);
        assert_eq!(backend.list("snapshots").unwrap().len(), 1);
    }
}
