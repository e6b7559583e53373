pub mod find;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use strata_types::error::Result;
use strata_types::ObjectId;

/// One snapshot record, stored at `snapshots/<id>`.
///
/// Records are immutable: a rewrite saves a new record under a new id and,
/// when forgetting, deletes the old one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Root tree. A record without one is malformed and cannot be rewritten.
    #[serde(default)]
    pub tree: Option<ObjectId>,
    pub time: DateTime<Utc>,
    pub hostname: String,
    pub username: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// First ancestor in a rewrite lineage. Set once, never overwritten.
    #[serde(default)]
    pub original: Option<ObjectId>,
    #[serde(default)]
    pub summary: Option<SnapshotSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub backup_start: DateTime<Utc>,
    pub backup_end: DateTime<Utc>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub data_added: u64,
    pub total_files_processed: u64,
    pub total_bytes_processed: u64,
}

impl Snapshot {
    pub fn new(tree: ObjectId, paths: Vec<String>, time: DateTime<Utc>) -> Self {
        Self {
            tree: Some(tree),
            time,
            hostname: crate::platform::hostname(),
            username: crate::platform::username(),
            tags: Vec::new(),
            paths,
            description: None,
            original: None,
            summary: None,
        }
    }

    /// Add tags that are not present yet, keeping insertion order.
    /// Returns whether anything was added.
    pub fn add_tags<S: AsRef<str>>(&mut self, tags: &[S]) -> bool {
        let mut changed = false;
        for tag in tags {
            let tag = tag.as_ref();
            if tag.is_empty() || self.has_tag(tag) {
                continue;
            }
            self.tags.push(tag.to_string());
            changed = true;
        }
        changed
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// True when every tag in `tags` is present.
    pub fn has_tags<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().all(|t| self.has_tag(t.as_ref()))
    }

    /// True when every path in `paths` was part of this backup.
    pub fn has_paths<S: AsRef<str>>(&self, paths: &[S]) -> bool {
        paths
            .iter()
            .all(|p| self.paths.iter().any(|own| own == p.as_ref()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }

    /// One-line description used as the per-snapshot header.
    pub fn describe(&self, id: &ObjectId) -> String {
        let mut out = format!(
            "snapshot {} of [{}] at {} by {}@{}",
            id,
            self.paths.join(", "),
            self.time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            self.username,
            self.hostname,
        );
        if !self.tags.is_empty() {
            out.push_str(&format!(" [{}]", self.tags.join(", ")));
        }
        out
    }
}
