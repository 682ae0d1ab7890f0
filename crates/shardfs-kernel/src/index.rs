//! Path index: a prefix tree keyed by path segments.
//!
//! Each edge carries one segment *including* its trailing separator for
//! directories, so `bar` (file) and `bar/` (directory) are distinct edges.
//! Slots live in an arena and refer to each other by [`SlotId`]; a node's
//! position survives relocation of any of its ancestors, which is what lets
//! a directory move carry its whole subtree.
//!
//! The index is not synchronised. [`Namespace`](crate::Namespace) wraps it in
//! a single reader/writer lock.

use std::collections::BTreeMap;

use regex::Regex;
use thiserror::Error;

use crate::types::{Node, NodeBuilder};

/// Path separator.
pub const SEPARATOR: char = '/';

/// Path of the root directory.
pub const ROOT: &str = "/";

/// Position of a slot in the index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

/// Errors raised by the index itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// The target slot already holds a node.
    #[error("slot already bound: {0}")]
    AlreadyBound(String),

    /// The slot id does not refer to a live slot.
    #[error("stale slot")]
    StaleSlot,
}

#[derive(Debug)]
struct Slot {
    label: String,
    parent: Option<SlotId>,
    children: BTreeMap<String, SlotId>,
    node: Option<Node>,
}

impl Slot {
    fn new(label: String, parent: Option<SlotId>) -> Self {
        Self {
            label,
            parent,
            children: BTreeMap::new(),
            node: None,
        }
    }
}

/// Split a relative key into edge labels: `"bar/foo/"` → `["bar/", "foo/"]`.
pub fn labels(rel_key: &str) -> impl Iterator<Item = &str> {
    rel_key.split_inclusive(SEPARATOR)
}

/// Prefix tree mapping normalized path keys to nodes.
#[derive(Debug)]
pub struct PathIndex {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
}

impl Default for PathIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PathIndex {
    /// Create an index holding only the root directory.
    pub fn new() -> Self {
        let mut root = Slot::new(ROOT.to_string(), None);
        root.node = Some(NodeBuilder::directory().finalize(SlotId(0)));
        Self {
            slots: vec![Some(root)],
            free: Vec::new(),
        }
    }

    /// The root slot.
    pub fn root(&self) -> SlotId {
        SlotId(0)
    }

    fn get(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(id.0).and_then(|s| s.as_ref())
    }

    fn get_mut(&mut self, id: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(id.0).and_then(|s| s.as_mut())
    }

    fn alloc(&mut self, slot: Slot) -> SlotId {
        match self.free.pop() {
            Some(i) => {
                self.slots[i] = Some(slot);
                SlotId(i)
            }
            None => {
                self.slots.push(Some(slot));
                SlotId(self.slots.len() - 1)
            }
        }
    }

    /// Node bound at `id`, if any.
    pub fn node(&self, id: SlotId) -> Option<&Node> {
        self.get(id).and_then(|s| s.node.as_ref())
    }

    /// Parent slot of `id` (None for the root).
    pub fn parent(&self, id: SlotId) -> Option<SlotId> {
        self.get(id).and_then(|s| s.parent)
    }

    /// Walk `rel_key` from `start` without requiring nodes along the way.
    fn walk(&self, start: SlotId, rel_key: &str) -> Option<SlotId> {
        let mut current = start;
        for label in labels(rel_key) {
            current = *self.get(current)?.children.get(label)?;
        }
        Some(current)
    }

    /// Find the slot for `rel_key` relative to `start`. Only slots holding a
    /// node count as found.
    pub fn find_at(&self, start: SlotId, rel_key: &str) -> Option<SlotId> {
        let found = self.walk(start, rel_key)?;
        self.node(found).map(|_| found)
    }

    /// Bind `builder` at `rel_key` relative to `start`, creating intermediate
    /// slots as needed.
    pub fn insert_at(
        &mut self,
        start: SlotId,
        rel_key: &str,
        builder: NodeBuilder,
    ) -> Result<SlotId, IndexError> {
        if self.get(start).is_none() {
            return Err(IndexError::StaleSlot);
        }

        let mut current = start;
        for label in labels(rel_key) {
            let existing = self.get(current).and_then(|s| s.children.get(label).copied());
            current = match existing {
                Some(child) => child,
                None => {
                    let child = self.alloc(Slot::new(label.to_string(), Some(current)));
                    if let Some(parent) = self.get_mut(current) {
                        parent.children.insert(label.to_string(), child);
                    }
                    child
                }
            };
        }

        if self.node(current).is_some() {
            return Err(IndexError::AlreadyBound(self.key_of(current)));
        }
        let node = builder.finalize(current);
        if let Some(slot) = self.get_mut(current) {
            slot.node = Some(node);
        }
        Ok(current)
    }

    /// Unbind the node at `id` and prune slots left without nodes or children.
    ///
    /// The root is never removed.
    pub fn remove(&mut self, id: SlotId) -> Option<Node> {
        if id == self.root() {
            return None;
        }
        let node = self.get_mut(id)?.node.take();
        self.prune(id);
        node
    }

    fn prune(&mut self, mut id: SlotId) {
        while id != self.root() {
            let Some(slot) = self.get(id) else { return };
            if slot.node.is_some() || !slot.children.is_empty() {
                return;
            }
            let parent = slot.parent;
            let label = slot.label.clone();
            self.slots[id.0] = None;
            self.free.push(id.0);
            let Some(parent) = parent else { return };
            if let Some(p) = self.get_mut(parent) {
                p.children.remove(&label);
            }
            id = parent;
        }
    }

    /// Detach `id` with its whole subtree and re-attach it under `new_parent`
    /// with edge label `new_label`. Nodes keep their slots.
    pub fn relocate(
        &mut self,
        id: SlotId,
        new_parent: SlotId,
        new_label: &str,
    ) -> Result<(), IndexError> {
        if id == self.root() || self.get(id).is_none() || self.get(new_parent).is_none() {
            return Err(IndexError::StaleSlot);
        }
        if let Some(&occupant) = self.get(new_parent).and_then(|p| p.children.get(new_label)) {
            if occupant != id {
                return Err(IndexError::AlreadyBound(self.key_of(occupant)));
            }
        }

        let (old_parent, old_label) = {
            let slot = self.get(id).ok_or(IndexError::StaleSlot)?;
            (slot.parent, slot.label.clone())
        };
        if let Some(parent) = old_parent.and_then(|p| self.get_mut(p)) {
            parent.children.remove(&old_label);
        }
        if let Some(slot) = self.get_mut(id) {
            slot.label = new_label.to_string();
            slot.parent = Some(new_parent);
        }
        if let Some(parent) = self.get_mut(new_parent) {
            parent.children.insert(new_label.to_string(), id);
        }
        if let Some(old_parent) = old_parent {
            self.prune(old_parent);
        }
        Ok(())
    }

    /// Returns true if `id` is `ancestor` or lies below it.
    pub fn is_within(&self, id: SlotId, ancestor: SlotId) -> bool {
        let mut current = Some(id);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.parent(c);
        }
        false
    }

    /// Immediate child nodes of `id`, in label order.
    pub fn children(&self, id: SlotId) -> Vec<&Node> {
        let Some(slot) = self.get(id) else {
            return Vec::new();
        };
        slot.children
            .values()
            .filter_map(|&child| self.node(child))
            .collect()
    }

    /// Returns true if `id` has any child slot.
    pub fn has_children(&self, id: SlotId) -> bool {
        self.get(id).is_some_and(|s| !s.children.is_empty())
    }

    /// Immediate child nodes of `id` whose name equals `needle`.
    pub fn search_exact(&self, id: SlotId, needle: &str) -> Vec<&Node> {
        self.children(id)
            .into_iter()
            .filter(|n| self.name_of(n.slot()) == needle)
            .collect()
    }

    /// Lazy depth-first walk over every node strictly below `id`.
    pub fn descendants(&self, id: SlotId) -> Descendants<'_> {
        let mut stack = Vec::new();
        if let Some(slot) = self.get(id) {
            stack.extend(slot.children.values().rev().copied());
        }
        Descendants { index: self, stack }
    }

    /// First descendant of `id` whose name matches `pattern`.
    pub fn first_regex_match(&self, id: SlotId, pattern: &Regex) -> Option<SlotId> {
        self.descendants(id)
            .find(|node| pattern.is_match(self.name_of(node.slot())))
            .map(Node::slot)
    }

    /// Full key of `id`: directories end with the separator.
    pub fn key_of(&self, id: SlotId) -> String {
        let mut labels = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let Some(slot) = self.get(c) else { break };
            labels.push(slot.label.as_str());
            current = slot.parent;
        }
        labels.iter().rev().copied().collect()
    }

    /// Absolute path of `id`: the trailing separator is dropped except for
    /// the root.
    pub fn path_of(&self, id: SlotId) -> String {
        let key = self.key_of(id);
        match key.strip_suffix(SEPARATOR) {
            Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
            _ => key,
        }
    }

    /// Last segment of `id` without the trailing separator.
    pub fn name_of(&self, id: SlotId) -> &str {
        if id == self.root() {
            return ROOT;
        }
        match self.get(id) {
            Some(slot) => slot.label.strip_suffix(SEPARATOR).unwrap_or(&slot.label),
            None => "",
        }
    }
}

/// Explicit-stack depth-first iterator over a subtree, in label order.
///
/// Cloning the iterator restarts the remaining walk from the same point.
#[derive(Clone)]
pub struct Descendants<'a> {
    index: &'a PathIndex,
    stack: Vec<SlotId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(id) = self.stack.pop() {
            let Some(slot) = self.index.get(id) else {
                continue;
            };
            self.stack.extend(slot.children.values().rev().copied());
            if let Some(node) = slot.node.as_ref() {
                return Some(node);
            }
        }
        None
    }
}
