use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use super::format::ObjectType;
use super::Repository;
use crate::concurrency::TaskGroup;
use crate::tree::Tree;

/// Destination for trees built during a rewrite.
pub trait TreeSaver: Sync {
    /// Serialize, hash and queue `tree` for persistence, returning its id.
    fn save_tree(&self, tree: &Tree) -> Result<ObjectId>;
}

/// Counters reported once a pipeline has flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Trees handed to the pipeline, including deduplicated ones.
    pub queued: u64,
    /// Trees actually written to storage.
    pub uploaded: u64,
}

struct PendingTree {
    id: ObjectId,
    payload: Vec<u8>,
}

/// Bounded pool of upload workers fed by one traversal thread.
pub struct UploadPipeline<'r> {
    repo: &'r Repository,
    concurrency: usize,
}

/// Producer side of a running pipeline.
pub struct UploadHandle<'p> {
    repo: &'p Repository,
    tx: Sender<PendingTree>,
    /// Ids queued during this run, for dedup against in-flight uploads.
    queued: &'p Mutex<HashSet<ObjectId>>,
    group: &'p TaskGroup<'p>,
    saves: &'p AtomicU64,
}

impl<'r> UploadPipeline<'r> {
    pub fn new(repo: &'r Repository, concurrency: usize) -> Self {
        Self {
            repo,
            concurrency: crate::config::clamp_upload_concurrency(concurrency),
        }
    }

    /// Run `produce` on a traversal thread while workers persist the trees
    /// it queues, then flush.
    ///
    /// Returns only after every worker has exited. A failure on either side
    /// cancels the other. On success every queued tree is durable and
    /// indexed; on failure the caller must not reference any of them.
    pub fn run<'g, T, F>(&self, group: &'g TaskGroup<'g>, produce: F) -> Result<(T, UploadStats)>
    where
        T: Send,
        F: FnOnce(&UploadHandle<'_>) -> Result<T> + Send,
    {
        let queued = Mutex::new(HashSet::new());
        let saves = AtomicU64::new(0);
        let (tx, rx) = crossbeam_channel::bounded::<PendingTree>(self.concurrency * 2);

        let (output, uploaded) = thread::scope(|s| {
            let workers: Vec<_> = (0..self.concurrency)
                .map(|_| {
                    let rx = rx.clone();
                    s.spawn(move || upload_worker(self.repo, rx, group))
                })
                .collect();
            drop(rx);

            let traversal = s.spawn(|| {
                let handle = UploadHandle {
                    repo: self.repo,
                    tx,
                    queued: &queued,
                    group,
                    saves: &saves,
                };
                let result = produce(&handle);
                if result.is_err() {
                    group.cancel();
                }
                result
                // `handle` drops here, closing the channel so workers exit.
            });

            let output = traversal
                .join()
                .unwrap_or_else(|_| Err(StrataError::Other("traversal thread panicked".into())));
            if output.is_err() {
                group.cancel();
            }
            let mut uploaded = 0u64;
            for worker in workers {
                match worker.join() {
                    Ok(n) => uploaded += n,
                    Err(_) => group.fail(StrataError::Other("upload worker panicked".into())),
                }
            }
            (output, uploaded)
        });

        let worker_error = group.take_error();
        let output = match (output, worker_error) {
            // A worker failure cancelled the traversal: report the cause.
            (Err(StrataError::Interrupted), Some(e)) => return Err(e),
            (Err(e), _) => return Err(e),
            (Ok(_), Some(e)) => return Err(e),
            (Ok(v), None) => v,
        };
        if group.interrupted() {
            return Err(StrataError::Interrupted);
        }

        let ids = match queued.into_inner() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.repo.add_to_index(ids)?;
        let stats = UploadStats {
            queued: saves.into_inner(),
            uploaded,
        };
        debug!(
            queued = stats.queued,
            uploaded = stats.uploaded,
            "upload pipeline flushed"
        );
        Ok((output, stats))
    }
}

impl TreeSaver for UploadHandle<'_> {
    fn save_tree(&self, tree: &Tree) -> Result<ObjectId> {
        self.group.check()?;
        let payload = tree.to_bytes()?;
        let id = self.repo.hash(&payload);
        self.saves.fetch_add(1, Ordering::Relaxed);

        if self.repo.has_object(&id)? {
            return Ok(id);
        }
        {
            let mut queued = self
                .queued
                .lock()
                .map_err(|_| StrataError::Other("upload dedup set poisoned".into()))?;
            if !queued.insert(id) {
                return Ok(id);
            }
        }
        self.tx
            .send(PendingTree { id, payload })
            .map_err(|_| StrataError::Other("upload workers stopped".into()))?;
        Ok(id)
    }
}

/// Computes tree ids without persisting anything. Used by dry runs, which
/// hold no lock and must leave the repository untouched.
pub struct HashOnlySaver<'r> {
    repo: &'r Repository,
}

impl<'r> HashOnlySaver<'r> {
    pub fn new(repo: &'r Repository) -> Self {
        Self { repo }
    }
}

impl TreeSaver for HashOnlySaver<'_> {
    fn save_tree(&self, tree: &Tree) -> Result<ObjectId> {
        Ok(self.repo.hash(&tree.to_bytes()?))
    }
}

fn upload_worker(repo: &Repository, rx: Receiver<PendingTree>, group: &TaskGroup<'_>) -> u64 {
    let mut uploaded = 0;
    for pending in rx {
        // Keep draining after cancellation so the producer never blocks.
        if group.is_cancelled() {
            continue;
        }
        match repo.store_object(ObjectType::Tree, &pending.id, &pending.payload) {
            Ok(()) => uploaded += 1,
            Err(e) => {
                debug!(tree = %pending.id, error = %e, "tree upload failed");
                group.fail(e);
            }
        }
    }
    uploaded
}
