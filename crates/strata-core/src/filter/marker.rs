use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use crate::repo::Repository;
use crate::tree::Node;

/// Rejects a directory whose own listing holds a marker file.
///
/// Configured as `name[:signature]`. Without a signature the presence of an
/// entry called `name` is enough; with one, the entry must be a regular file
/// whose content starts with those bytes.
#[derive(Debug)]
pub struct MarkerPredicate {
    name: String,
    signature: Vec<u8>,
    /// Verdicts per directory tree id.
    cache: Mutex<HashMap<ObjectId, bool>>,
}

impl MarkerPredicate {
    pub fn parse(spec: &str) -> Result<Self> {
        if spec.is_empty() {
            return Err(StrataError::Usage(
                "name for exclusion tagfile is empty".into(),
            ));
        }
        let (name, signature) = match spec.split_once(':') {
            Some(("", _)) => {
                return Err(StrataError::Usage(
                    "no name for exclusion tagfile provided".into(),
                ))
            }
            Some((name, signature)) => (name, signature.as_bytes().to_vec()),
            None => (spec, Vec::new()),
        };
        debug!(tagfile = %name, "using exclusion tagfile");
        Ok(Self {
            name: name.to_string(),
            signature,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the directory `node` at `path` carries the marker.
    pub fn rejects(&self, path: &str, node: &Node, repo: &Repository) -> Result<bool> {
        if !node.is_dir() {
            return Ok(false);
        }
        // Missing subtrees are reported by the rewriter.
        let Some(subtree) = node.subtree else {
            return Ok(false);
        };
        if let Some(&cached) = self.lock_cache()?.get(&subtree) {
            return Ok(cached);
        }

        let tree = repo.load_tree(&subtree)?;
        let rejected = match tree.find(&self.name) {
            None => false,
            Some(_) if self.signature.is_empty() => true,
            Some(marker) => self.signature_matches(path, marker, repo)?,
        };
        self.lock_cache()?.insert(subtree, rejected);
        Ok(rejected)
    }

    fn lock_cache(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ObjectId, bool>>> {
        self.cache
            .lock()
            .map_err(|_| StrataError::Other("marker cache poisoned".into()))
    }

    fn signature_matches(&self, dir: &str, marker: &Node, repo: &Repository) -> Result<bool> {
        let tagfile = format!("{}/{}", dir.trim_end_matches('/'), self.name);
        if !marker.is_file() {
            warn!(tagfile = %tagfile, "exclusion tagfile is not a regular file");
            return Ok(false);
        }

        let want = self.signature.len() as u64;
        let mut head = Vec::with_capacity(self.signature.len());
        for blob in &marker.content {
            let remaining = want - head.len() as u64;
            if remaining == 0 {
                break;
            }
            head.extend(repo.read_blob_prefix(blob, remaining)?);
        }

        if head.len() < self.signature.len() {
            warn!(tagfile = %tagfile, "invalid (too short) signature in exclusion tagfile");
            return Ok(false);
        }
        if head != self.signature {
            warn!(tagfile = %tagfile, "invalid signature in exclusion tagfile");
            return Ok(false);
        }
        Ok(true)
    }
}
