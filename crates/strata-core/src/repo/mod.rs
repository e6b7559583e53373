pub mod format;
pub mod lock;
pub mod upload;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use self::format::{pack_object, unpack_object_expect, ObjectType, ENVELOPE_HEADER_LEN};
use crate::snapshot::Snapshot;
use crate::storage::StorageBackend;
use crate::tree::Tree;

const CONFIG_KEY: &str = "config";
const DATA_PREFIX: &str = "data/";
const SNAPSHOTS_PREFIX: &str = "snapshots/";
const REPO_VERSION: u32 = 1;

/// Maximum total weight (serialized bytes) of cached trees.
const TREE_CACHE_MAX_BYTES: usize = 32 * 1024 * 1024;

/// Persisted as JSON at the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub version: u32,
    /// Random repository id, hex encoded.
    pub id: String,
    /// Key for content hashing, hex encoded.
    pub id_key: String,
    pub created: DateTime<Utc>,
}

/// FIFO tree cache bounded by total weight in bytes.
struct TreeCache {
    entries: HashMap<ObjectId, (Arc<Tree>, usize)>,
    order: VecDeque<ObjectId>,
    current_bytes: usize,
    max_bytes: usize,
}

impl TreeCache {
    fn new(max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            current_bytes: 0,
            max_bytes,
        }
    }

    fn get(&self, id: &ObjectId) -> Option<Arc<Tree>> {
        self.entries.get(id).map(|(tree, _)| Arc::clone(tree))
    }

    fn insert(&mut self, id: ObjectId, tree: Arc<Tree>, weight: usize) {
        if weight > self.max_bytes || self.entries.contains_key(&id) {
            return;
        }
        while self.current_bytes + weight > self.max_bytes {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            if let Some((_, w)) = self.entries.remove(&evicted) {
                self.current_bytes -= w;
            }
        }
        self.current_bytes += weight;
        self.entries.insert(id, (tree, weight));
        self.order.push_back(id);
    }
}

/// A handle to an opened repository.
///
/// Shared by reference between the traversal thread and upload workers, so
/// all mutable state sits behind locks.
pub struct Repository {
    storage: Arc<dyn StorageBackend>,
    pub config: RepoConfig,
    id_key: [u8; 32],
    /// Every object id known to exist under `data/`.
    index: RwLock<HashSet<ObjectId>>,
    tree_cache: Mutex<TreeCache>,
}

fn object_key(id: &ObjectId) -> String {
    format!("{DATA_PREFIX}{}/{}", id.shard_prefix(), id.to_hex())
}

fn snapshot_key(id: &ObjectId) -> String {
    format!("{SNAPSHOTS_PREFIX}{}", id.to_hex())
}

fn parse_id_key(raw: &str) -> Result<[u8; 32]> {
    let id = ObjectId::from_hex(raw)
        .map_err(|e| StrataError::InvalidFormat(format!("repository id_key: {e}")))?;
    Ok(id.0)
}

impl Repository {
    /// Initialize a new, empty repository.
    pub fn init(storage: Arc<dyn StorageBackend>) -> Result<Self> {
        if storage.exists(CONFIG_KEY)? {
            return Err(StrataError::RepoAlreadyExists("repository".into()));
        }

        let config = RepoConfig {
            version: REPO_VERSION,
            id: hex::encode(rand::random::<[u8; 32]>()),
            id_key: hex::encode(rand::random::<[u8; 32]>()),
            created: Utc::now(),
        };
        storage.put(CONFIG_KEY, &serde_json::to_vec_pretty(&config)?)?;
        debug!(id = %config.id, "initialized repository");

        Self::from_config(storage, config)
    }

    /// Open an existing repository. The object index is not loaded; call
    /// [`Repository::load_index`] before writing.
    pub fn open(storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let data = storage
            .get(CONFIG_KEY)?
            .ok_or_else(|| StrataError::RepoNotFound("repository".into()))?;
        let config: RepoConfig = serde_json::from_slice(&data)
            .map_err(|e| StrataError::InvalidFormat(format!("repository config: {e}")))?;
        if config.version != REPO_VERSION {
            return Err(StrataError::InvalidFormat(format!(
                "unsupported repository version: {}",
                config.version
            )));
        }
        Self::from_config(storage, config)
    }

    fn from_config(storage: Arc<dyn StorageBackend>, config: RepoConfig) -> Result<Self> {
        let id_key = parse_id_key(&config.id_key)?;
        Ok(Self {
            storage,
            config,
            id_key,
            index: RwLock::new(HashSet::new()),
            tree_cache: Mutex::new(TreeCache::new(TREE_CACHE_MAX_BYTES)),
        })
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Content identity of `data` under this repository's key.
    pub fn hash(&self, data: &[u8]) -> ObjectId {
        ObjectId::compute(&self.id_key, data)
    }

    /// Populate the object index from the `data/` listing.
    pub fn load_index(&self) -> Result<usize> {
        let mut ids = HashSet::new();
        for key in self.storage.list(DATA_PREFIX)? {
            let Some(name) = key.rsplit('/').next() else {
                continue;
            };
            if let Ok(id) = ObjectId::from_hex(name) {
                ids.insert(id);
            }
        }
        let count = ids.len();
        *self.index_write()? = ids;
        debug!(objects = count, "loaded object index");
        Ok(count)
    }

    pub fn has_object(&self, id: &ObjectId) -> Result<bool> {
        Ok(self.index_read()?.contains(id))
    }

    /// Record ids that were persisted outside of [`Repository::store_object`].
    pub fn add_to_index(&self, ids: impl IntoIterator<Item = ObjectId>) -> Result<()> {
        self.index_write()?.extend(ids);
        Ok(())
    }

    fn index_read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashSet<ObjectId>>> {
        self.index
            .read()
            .map_err(|_| StrataError::Other("object index lock poisoned".into()))
    }

    fn index_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashSet<ObjectId>>> {
        self.index
            .write()
            .map_err(|_| StrataError::Other("object index lock poisoned".into()))
    }

    /// Write an object whose id the caller already computed.
    ///
    /// Does not touch the index; the upload pipeline adds ids only after a
    /// successful flush.
    pub fn store_object(&self, obj_type: ObjectType, id: &ObjectId, payload: &[u8]) -> Result<()> {
        self.storage
            .put(&object_key(id), &pack_object(obj_type, payload))
    }

    /// Hash, store and index an object in one step, skipping known ids.
    pub fn save_object(&self, obj_type: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        let id = self.hash(payload);
        if !self.has_object(&id)? {
            self.store_object(obj_type, &id, payload)?;
            self.add_to_index([id])?;
        }
        Ok(id)
    }

    /// Serialize and save a tree directly, bypassing the upload pipeline.
    pub fn save_tree(&self, tree: &Tree) -> Result<ObjectId> {
        self.save_object(ObjectType::Tree, &tree.to_bytes()?)
    }

    pub fn load_tree(&self, id: &ObjectId) -> Result<Arc<Tree>> {
        if let Some(tree) = self.cache()?.get(id) {
            return Ok(tree);
        }
        let data = self
            .storage
            .get(&object_key(id))?
            .ok_or_else(|| StrataError::TreeNotFound(id.to_hex()))?;
        let tree = Arc::new(Tree::from_bytes(unpack_object_expect(&data, ObjectType::Tree)?)?);
        self.cache()?.insert(*id, Arc::clone(&tree), data.len());
        Ok(tree)
    }

    fn cache(&self) -> Result<std::sync::MutexGuard<'_, TreeCache>> {
        self.tree_cache
            .lock()
            .map_err(|_| StrataError::Other("tree cache lock poisoned".into()))
    }

    /// Read up to `len` bytes from the start of a data blob's payload.
    pub fn read_blob_prefix(&self, id: &ObjectId, len: u64) -> Result<Vec<u8>> {
        let data = self
            .storage
            .get_range(&object_key(id), ENVELOPE_HEADER_LEN, len)?
            .ok_or_else(|| StrataError::Other(format!("blob {id} not found")))?;
        Ok(data)
    }

    // ── Snapshots ────────────────────────────────────────────────────────

    pub fn list_snapshot_ids(&self) -> Result<Vec<ObjectId>> {
        let mut ids: Vec<ObjectId> = self
            .storage
            .list(SNAPSHOTS_PREFIX)?
            .iter()
            .filter_map(|k| k.strip_prefix(SNAPSHOTS_PREFIX))
            .filter_map(|name| ObjectId::from_hex(name).ok())
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub fn load_snapshot(&self, id: &ObjectId) -> Result<Snapshot> {
        let data = self
            .storage
            .get(&snapshot_key(id))?
            .ok_or_else(|| StrataError::SnapshotNotFound(id.to_hex()))?;
        Snapshot::from_bytes(unpack_object_expect(&data, ObjectType::Snapshot)?)
    }

    /// The id `snapshot` would be stored under.
    pub fn snapshot_id(&self, snapshot: &Snapshot) -> Result<ObjectId> {
        Ok(self.hash(&snapshot.to_bytes()?))
    }

    /// Write a new snapshot record and return its id.
    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<ObjectId> {
        let payload = snapshot.to_bytes()?;
        let id = self.hash(&payload);
        self.storage
            .put(&snapshot_key(&id), &pack_object(ObjectType::Snapshot, &payload))?;
        debug!(snapshot = %id, "saved snapshot record");
        Ok(id)
    }

    pub fn delete_snapshot(&self, id: &ObjectId) -> Result<()> {
        self.storage.delete(&snapshot_key(id))?;
        debug!(snapshot = %id, "deleted snapshot record");
        Ok(())
    }
}
