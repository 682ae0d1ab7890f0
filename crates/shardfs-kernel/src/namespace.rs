//! Namespace engine: a path index plus a shared current-directory cursor.
//!
//! Structural operations take one namespace-wide `parking_lot::RwLock`.
//! Content streams take it only long enough to resolve the target file, then
//! release it and run against the file's own lock, so a slow stream never
//! stalls the tree.

use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::content::FileContent;
use crate::error::{NamespaceError, NamespaceResult};
use crate::index::{PathIndex, SEPARATOR, SlotId};
use crate::types::{DirEntry, FileEntry, Listing, Node, NodeBody, NodeBuilder, NodeKind, Stat};

struct State {
    index: PathIndex,
    cwd: SlotId,
}

impl State {
    /// Pick the starting slot for `path` and strip the leading separator.
    fn split<'a>(&self, path: &'a str) -> (SlotId, &'a str) {
        match path.strip_prefix(SEPARATOR) {
            Some(rel) => (self.index.root(), rel),
            None => (self.cwd, path),
        }
    }

    fn find(&self, key: &str) -> Option<SlotId> {
        let (start, rel) = self.split(key);
        self.index.find_at(start, rel)
    }

    /// Resolve `path` as a file first, then as a directory.
    fn find_any(&self, path: &str) -> Option<SlotId> {
        self.find(path).or_else(|| {
            if path.is_empty() || path.ends_with(SEPARATOR) {
                None
            } else {
                self.find(&dir_form(path))
            }
        })
    }

    /// Resolve a directory, distinguishing "missing" from "is a file".
    fn find_dir(&self, path: &str) -> NamespaceResult<SlotId> {
        let key = dir_form(path);
        if let Some(slot) = self.find(&key) {
            return Ok(slot);
        }
        match key.strip_suffix(SEPARATOR) {
            Some(file_key) if !file_key.is_empty() && self.find(file_key).is_some() => Err(
                NamespaceError::type_mismatch(format!("{path}: directory expected, file given")),
            ),
            _ => Err(NamespaceError::not_found(path)),
        }
    }

    fn listing<'a>(&self, nodes: impl IntoIterator<Item = &'a Node>) -> Listing {
        let mut listing = Listing::default();
        for node in nodes {
            let slot = node.slot();
            let name = self.index.name_of(slot).to_string();
            let path = self.index.path_of(slot);
            match node.body() {
                NodeBody::File(content) => listing.files.push(FileEntry {
                    name,
                    path,
                    size: content.len(),
                }),
                NodeBody::Directory => listing.dirs.push(DirEntry { name, path }),
            }
        }
        listing
    }

    /// Bind a new node under an existing parent directory.
    fn create(&mut self, path: &str, key: &str, builder: NodeBuilder) -> NamespaceResult<()> {
        let (start, rel) = self.split(key);
        if rel.is_empty() {
            return Err(NamespaceError::already_exists(path));
        }
        check_segments(path, rel)?;

        let (parent_rel, label) = split_parent(rel);
        let parent = self.index.find_at(start, parent_rel).ok_or_else(|| {
            NamespaceError::not_supported(format!("{path}: parent directory does not exist"))
        })?;

        if self.index.find_at(parent, label).is_some()
            || self.index.find_at(parent, &other_form(label)).is_some()
        {
            return Err(NamespaceError::already_exists(path));
        }

        self.index
            .insert_at(parent, label, builder)
            .map_err(|_| NamespaceError::already_exists(path))?;
        Ok(())
    }
}

/// Coerce a path into directory form. The empty path stays empty.
fn dir_form(path: &str) -> String {
    if path.is_empty() || path.ends_with(SEPARATOR) {
        path.to_string()
    } else {
        format!("{path}{SEPARATOR}")
    }
}

/// The same label in the opposite kind: `foo/` ↔ `foo`.
fn other_form(label: &str) -> String {
    match label.strip_suffix(SEPARATOR) {
        Some(file) => file.to_string(),
        None => format!("{label}{SEPARATOR}"),
    }
}

/// Split a relative key into its parent key and final label:
/// `a/b/` → (`a/`, `b/`), `a/f` → (`a/`, `f`), `f` → (``, `f`).
fn split_parent(rel: &str) -> (&str, &str) {
    let trimmed = rel.strip_suffix(SEPARATOR).unwrap_or(rel);
    match trimmed.rfind(SEPARATOR) {
        Some(i) => rel.split_at(i + 1),
        None => ("", rel),
    }
}

fn is_reserved(segment: &str) -> bool {
    segment == "." || segment == ".."
}

/// Reject `.`/`..` anywhere in `path`.
fn check_reserved(path: &str) -> NamespaceResult<()> {
    if path.split(SEPARATOR).any(is_reserved) {
        return Err(NamespaceError::invalid_name(path));
    }
    Ok(())
}

/// Reject empty and reserved segments in a relative key.
fn check_segments(path: &str, rel: &str) -> NamespaceResult<()> {
    let trimmed = rel.strip_suffix(SEPARATOR).unwrap_or(rel);
    if trimmed
        .split(SEPARATOR)
        .any(|segment| segment.is_empty() || is_reserved(segment))
    {
        return Err(NamespaceError::invalid_name(path));
    }
    Ok(())
}

/// One in-memory filesystem instance.
///
/// Paths starting with `/` are absolute; anything else is resolved against the
/// current directory, which is shared by every caller of this instance. The
/// empty path names the current directory.
pub struct Namespace {
    state: RwLock<State>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("cwd", &self.current_dir())
            .finish_non_exhaustive()
    }
}

impl Namespace {
    /// Create a namespace holding only the root directory.
    pub fn new() -> Self {
        let index = PathIndex::new();
        let cwd = index.root();
        Self {
            state: RwLock::new(State { index, cwd }),
        }
    }

    /// Absolute path of the current directory.
    pub fn current_dir(&self) -> String {
        let state = self.state.read();
        state.index.path_of(state.cwd)
    }

    /// Move the current directory.
    pub fn change_dir(&self, path: &str) -> NamespaceResult<()> {
        let mut state = self.state.write();
        let slot = state.find_dir(path)?;
        state.cwd = slot;
        debug!(cwd = %state.index.path_of(slot), "changed directory");
        Ok(())
    }

    /// Create a directory whose parent already exists.
    pub fn make_dir(&self, path: &str) -> NamespaceResult<()> {
        if path.is_empty() {
            return Err(NamespaceError::invalid_name(path));
        }
        let key = dir_form(path);
        self.state.write().create(path, &key, NodeBuilder::directory())?;
        debug!(path, "created directory");
        Ok(())
    }

    /// Create an empty file whose parent directory already exists.
    pub fn create_file(&self, path: &str) -> NamespaceResult<()> {
        if path.is_empty() || path.ends_with(SEPARATOR) {
            return Err(NamespaceError::invalid_name(path));
        }
        self.state.write().create(path, path, NodeBuilder::file())?;
        debug!(path, "created file");
        Ok(())
    }

    /// Remove a file or an empty directory.
    pub fn remove(&self, path: &str) -> NamespaceResult<()> {
        let mut state = self.state.write();
        let slot = state
            .find_any(path)
            .ok_or_else(|| NamespaceError::not_found(path))?;

        if slot == state.index.root() || slot == state.cwd {
            return Err(NamespaceError::not_supported(format!(
                "{path}: cannot remove the root or current directory"
            )));
        }
        if state.index.has_children(slot) {
            return Err(NamespaceError::directory_not_empty(path));
        }

        state.index.remove(slot);
        debug!(path, "removed");
        Ok(())
    }

    /// Immediate children of a directory.
    pub fn list(&self, path: &str) -> NamespaceResult<Listing> {
        let state = self.state.read();
        let slot = state.find_dir(path)?;
        Ok(state.listing(state.index.children(slot)))
    }

    /// Immediate children of a directory whose name equals `needle`.
    pub fn find(&self, path: &str, needle: &str) -> NamespaceResult<Listing> {
        let state = self.state.read();
        let slot = state.find_dir(path)?;
        Ok(state.listing(state.index.search_exact(slot, needle)))
    }

    /// Absolute path of the first node below `path` whose name matches
    /// `pattern`, in depth-first lexicographic order.
    pub fn find_first_regex(&self, pattern: &str, path: &str) -> NamespaceResult<String> {
        let regex = Regex::new(pattern)?;
        let state = self.state.read();
        let slot = state
            .find_any(path)
            .ok_or_else(|| NamespaceError::not_found(path))?;
        state
            .index
            .first_regex_match(slot, &regex)
            .map(|hit| state.index.path_of(hit))
            .ok_or_else(|| NamespaceError::not_found(format!("no match for {pattern} in {path}")))
    }

    /// Move a file or directory. Directories carry their subtree.
    ///
    /// Every check runs before the index is touched; the relocation itself
    /// happens under one write lock.
    pub fn rename(&self, src: &str, dst: &str) -> NamespaceResult<()> {
        check_reserved(src)?;
        check_reserved(dst)?;

        let mut state = self.state.write();
        let slot = state
            .find_any(src)
            .ok_or_else(|| NamespaceError::not_found(src))?;
        if slot == state.index.root() {
            return Err(NamespaceError::not_supported("cannot move the root"));
        }
        let kind = state
            .index
            .node(slot)
            .map(|n| n.kind())
            .ok_or_else(|| NamespaceError::not_found(src))?;

        let dst_key = match kind {
            NodeKind::File if dst.ends_with(SEPARATOR) => {
                return Err(NamespaceError::not_supported(format!(
                    "{dst}: cannot move a file onto a directory path"
                )));
            }
            NodeKind::File => dst.to_string(),
            NodeKind::Directory => dir_form(dst),
        };

        let (start, rel) = state.split(&dst_key);
        if rel.is_empty() {
            return Err(NamespaceError::already_exists(dst));
        }
        check_segments(dst, rel)?;

        if state.index.find_at(start, rel).is_some() {
            return Err(NamespaceError::already_exists(dst));
        }
        if state.index.find_at(start, &other_form(rel)).is_some() {
            return Err(NamespaceError::not_supported(format!(
                "{dst}: destination exists with a different kind"
            )));
        }

        let (parent_rel, label) = split_parent(rel);
        let parent = state
            .index
            .find_at(start, parent_rel)
            .ok_or_else(|| NamespaceError::not_found(format!("{dst}: parent directory")))?;
        if kind.is_dir() && state.index.is_within(parent, slot) {
            return Err(NamespaceError::not_supported(format!(
                "{dst}: cannot move a directory into itself"
            )));
        }

        state
            .index
            .relocate(slot, parent, label)
            .map_err(|_| NamespaceError::already_exists(dst))?;
        debug!(src, dst, "moved");
        Ok(())
    }

    /// Metadata for a file or directory.
    pub fn stat(&self, path: &str) -> NamespaceResult<Stat> {
        let state = self.state.read();
        let slot = state
            .find_any(path)
            .ok_or_else(|| NamespaceError::not_found(path))?;
        let node = state
            .index
            .node(slot)
            .ok_or_else(|| NamespaceError::not_found(path))?;
        Ok(Stat {
            kind: node.kind(),
            name: state.index.name_of(slot).to_string(),
            path: state.index.path_of(slot),
            size: node.content().map(|c| c.len()).unwrap_or(0),
        })
    }

    /// Resolve a file and hand back its content, releasing the namespace lock.
    fn content(&self, path: &str) -> NamespaceResult<Arc<FileContent>> {
        let state = self.state.read();
        let node = match state.find(path) {
            Some(slot) => state.index.node(slot),
            None if state.find_any(path).is_some() => None,
            None => return Err(NamespaceError::not_found(path)),
        };
        node.and_then(|n| n.content().cloned()).ok_or_else(|| {
            NamespaceError::type_mismatch(format!("{path}: file expected, directory given"))
        })
    }

    /// Stream the whole file into `sink`.
    pub async fn read<W>(&self, path: &str, sink: &mut W) -> NamespaceResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let content = self.content(path)?;
        Ok(content.read_to(sink).await?)
    }

    /// Stream the file from byte `offset` into `sink`.
    pub async fn read_at<W>(&self, path: &str, sink: &mut W, offset: u64) -> NamespaceResult<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let content = self.content(path)?;
        Ok(content.read_at(sink, offset).await?)
    }

    /// Replace the file's content with everything `source` yields.
    pub async fn write<R>(&self, path: &str, source: &mut R) -> NamespaceResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let content = self.content(path)?;
        let written = content.write_from(source).await?;
        debug!(path, written, "wrote file");
        Ok(written)
    }
}
