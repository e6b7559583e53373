use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::Mutex;

use tracing::debug;

use strata_types::error::{Result, StrataError};
use strata_types::ObjectId;

use crate::concurrency::TaskGroup;
use crate::filter::{Decision, Selector};
use crate::repo::upload::TreeSaver;
use crate::repo::Repository;
use crate::tree::Tree;

/// Retained regular files and their total size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeSummary {
    pub file_count: u64,
    pub file_size: u64,
}

impl AddAssign for SizeSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.file_count += rhs.file_count;
        self.file_size += rhs.file_size;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteResult {
    /// `None` when filtering removed every entry.
    pub new_tree: Option<ObjectId>,
    pub summary: SizeSummary,
    /// Entries left in the rewritten tree.
    pub entries: usize,
}

/// Rebuilds trees without the entries a [`Selector`] rejects.
///
/// One rewriter serves a whole run. Results are memoized per (source tree,
/// path) so subtrees shared between snapshots are rebuilt once.
pub struct TreeRewriter {
    selector: Selector,
    memo: Mutex<HashMap<(ObjectId, String), RewriteResult>>,
}

/// Per-call collaborators, bundled to keep the recursion readable.
struct Walk<'a> {
    repo: &'a Repository,
    saver: &'a dyn TreeSaver,
    group: &'a TaskGroup<'a>,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.ends_with('/') {
        format!("{parent}{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl TreeRewriter {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Rewrite the tree `tree_id` reached at `path` (use `/` for a root).
    pub fn rewrite(
        &self,
        repo: &Repository,
        saver: &dyn TreeSaver,
        group: &TaskGroup<'_>,
        path: &str,
        tree_id: ObjectId,
    ) -> Result<RewriteResult> {
        let walk = Walk { repo, saver, group };
        self.rewrite_tree(&walk, path, tree_id)
    }

    fn memo_get(&self, key: &(ObjectId, String)) -> Result<Option<RewriteResult>> {
        Ok(self
            .memo
            .lock()
            .map_err(|_| StrataError::Other("rewrite memo poisoned".into()))?
            .get(key)
            .copied())
    }

    fn memo_put(&self, key: (ObjectId, String), result: RewriteResult) -> Result<()> {
        self.memo
            .lock()
            .map_err(|_| StrataError::Other("rewrite memo poisoned".into()))?
            .insert(key, result);
        Ok(())
    }

    fn rewrite_tree(&self, walk: &Walk<'_>, path: &str, tree_id: ObjectId) -> Result<RewriteResult> {
        let key = (tree_id, path.to_string());
        if let Some(hit) = self.memo_get(&key)? {
            return Ok(hit);
        }

        let source = walk.repo.load_tree(&tree_id)?;
        let mut rebuilt = Tree::default();
        let mut summary = SizeSummary::default();
        let mut changed = false;

        for node in source.nodes() {
            walk.group.check()?;
            let node_path = join_path(path, &node.name);
            let decision = self.selector.select(&node_path, node, walk.repo)?;
            if decision == Decision::Reject {
                changed = true;
                continue;
            }

            if !node.is_dir() {
                if node.is_file() {
                    summary.file_count += 1;
                    summary.file_size += node.size;
                }
                rebuilt.push(node.clone());
                continue;
            }

            let subtree = node.subtree.ok_or_else(|| {
                StrataError::InvalidFormat(format!("directory {node_path:?} has no subtree"))
            })?;
            let child = self.rewrite_tree(walk, &node_path, subtree)?;

            let new_subtree = match child.new_tree {
                Some(_) if self.drop_unmatched_empty(decision, child.entries) => None,
                Some(id) => Some(id),
                None if decision == Decision::KeepExplicit => {
                    Some(walk.saver.save_tree(&Tree::default())?)
                }
                None => None,
            };
            let Some(new_subtree) = new_subtree else {
                changed = true;
                continue;
            };

            summary += child.summary;
            let mut node = node.clone();
            if new_subtree != subtree {
                changed = true;
                node.subtree = Some(new_subtree);
            }
            rebuilt.push(node);
        }

        let new_tree = if rebuilt.is_empty() && !source.is_empty() {
            None
        } else if !changed {
            Some(tree_id)
        } else {
            let id = walk.saver.save_tree(&rebuilt)?;
            debug!(path, old = %tree_id, new = %id, "rewrote tree");
            Some(id)
        };

        let result = RewriteResult {
            new_tree,
            summary,
            entries: rebuilt.len(),
        };
        self.memo_put(key, result)?;
        Ok(result)
    }

    /// In inclusion mode an empty directory is only worth keeping when a
    /// pattern named it.
    fn drop_unmatched_empty(&self, decision: Decision, entries: usize) -> bool {
        entries == 0 && self.selector.has_includes() && decision == Decision::Keep
    }
}
