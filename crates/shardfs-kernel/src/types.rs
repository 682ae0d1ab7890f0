//! Core namespace types.
//!
//! Files and directories are two variants of one node concept, modelled as a
//! closed sum type and dispatched with `match`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::content::FileContent;
use crate::index::SlotId;

/// Kind of a namespace node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum NodeKind {
    /// Regular file with byte content.
    File,
    /// Directory.
    Directory,
}

impl NodeKind {
    /// Returns true if this is a regular file.
    pub fn is_file(&self) -> bool {
        matches!(self, NodeKind::File)
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }
}

/// Payload carried by a node.
#[derive(Debug, Clone)]
pub enum NodeBody {
    File(Arc<FileContent>),
    Directory,
}

impl NodeBody {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::File(_) => NodeKind::File,
            NodeBody::Directory => NodeKind::Directory,
        }
    }
}

/// A node that has been allocated but not yet placed in the index.
///
/// The index consumes the builder when it binds it into a slot, so a builder
/// is finalized exactly once.
#[derive(Debug)]
pub struct NodeBuilder {
    body: NodeBody,
}

impl NodeBuilder {
    /// Allocate an empty file.
    pub fn file() -> Self {
        Self {
            body: NodeBody::File(Arc::new(FileContent::new())),
        }
    }

    /// Allocate a directory.
    pub fn directory() -> Self {
        Self {
            body: NodeBody::Directory,
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    /// Bind the node to its index position.
    pub(crate) fn finalize(self, slot: SlotId) -> Node {
        Node {
            slot,
            body: self.body,
        }
    }
}

/// A node bound into the index.
#[derive(Debug, Clone)]
pub struct Node {
    slot: SlotId,
    body: NodeBody,
}

impl Node {
    /// Index position this node was bound to.
    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn body(&self) -> &NodeBody {
        &self.body
    }

    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    /// File content, if this is a file.
    pub fn content(&self) -> Option<&Arc<FileContent>> {
        match &self.body {
            NodeBody::File(content) => Some(content),
            NodeBody::Directory => None,
        }
    }
}

/// A file as reported by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Last path segment.
    pub name: String,
    /// Absolute path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// A directory as reported by listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Last path segment, without the trailing separator.
    pub name: String,
    /// Absolute path, without the trailing separator (except for the root).
    pub path: String,
}

/// Immediate children of a directory, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub files: Vec<FileEntry>,
    pub dirs: Vec<DirEntry>,
}

impl Listing {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.dirs.is_empty()
    }

    /// Append another listing (no dedup).
    pub fn extend(&mut self, other: Listing) {
        self.files.extend(other.files);
        self.dirs.extend(other.dirs);
    }

    /// File names, sorted.
    pub fn file_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.files.iter().map(|f| f.name.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Directory names, sorted.
    pub fn dir_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.dirs.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Metadata for a single node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub kind: NodeKind,
    pub name: String,
    pub path: String,
    pub size: u64,
}
