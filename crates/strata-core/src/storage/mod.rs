pub mod local_backend;

use std::sync::Arc;

use strata_types::error::{Result, StrataError};

pub use local_backend::LocalBackend;

/// Key/value object store underneath a repository.
///
/// Keys are `/`-separated relative paths. Implementations must make `put`
/// atomic: a concurrent reader sees either the old object or the new one.
pub trait StorageBackend: Send + Sync {
    /// Read a whole object. `Ok(None)` when the key does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Delete an object. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// List every key below `prefix` (recursively).
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read up to `length` bytes starting at `offset`. Short reads at the end
    /// of an object return the available bytes.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).put(key, data)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        (**self).get_range(key, offset, length)
    }
}

/// Build a storage backend for a repository location.
///
/// Plain paths and `file://` URLs map to [`LocalBackend`]; any other scheme
/// is rejected.
pub fn backend_from_url(url: &str) -> Result<Arc<dyn StorageBackend>> {
    if let Some(path) = url.strip_prefix("file://") {
        return Ok(Arc::new(LocalBackend::new(path)?));
    }
    if let Some((scheme, _)) = url.split_once("://") {
        return Err(StrataError::UnsupportedBackend(scheme.to_string()));
    }
    Ok(Arc::new(LocalBackend::new(url)?))
}
