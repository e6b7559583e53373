use serde::{Deserialize, Serialize};

use strata_types::error::Result;
use strata_types::ObjectId;

/// A single directory entry inside a [`Tree`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub node_type: NodeType,
    pub mode: u32,
    /// Modification time in nanoseconds since Unix epoch.
    pub mtime: i64,
    pub size: u64,
    /// For regular files: the data blobs making up the content, in order.
    #[serde(default)]
    pub content: Vec<ObjectId>,
    /// For directories: the tree listing its children.
    #[serde(default)]
    pub subtree: Option<ObjectId>,
    /// For symlinks: the link target.
    #[serde(default)]
    pub link_target: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Dir,
    Symlink,
    Dev,
    Other,
}

impl Node {
    pub fn file(name: impl Into<String>, size: u64, content: Vec<ObjectId>) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::File,
            mode: 0o644,
            mtime: 0,
            size,
            content,
            subtree: None,
            link_target: None,
        }
    }

    pub fn dir(name: impl Into<String>, subtree: ObjectId) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Dir,
            mode: 0o755,
            mtime: 0,
            size: 0,
            content: Vec::new(),
            subtree: Some(subtree),
            link_target: None,
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: NodeType::Symlink,
            mode: 0o777,
            mtime: 0,
            size: 0,
            content: Vec::new(),
            subtree: None,
            link_target: Some(target.into()),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.node_type == NodeType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }
}

/// Ordered listing of one directory. Identity is the hash of [`Tree::to_bytes`].
///
/// Nodes are kept sorted by name so two listings with the same entries
/// always serialize to the same bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new(mut nodes: Vec<Node>) -> Self {
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Append a node. Callers visiting an existing tree in order keep the
    /// listing sorted; anything else is re-sorted here.
    pub fn push(&mut self, node: Node) {
        let in_order = self.nodes.last().map_or(true, |last| last.name < node.name);
        self.nodes.push(node);
        if !in_order {
            self.nodes.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(data)?)
    }
}
