//! # shardfs-kernel
//!
//! In-memory hierarchical namespace for shardfs.
//!
//! A [`Namespace`] owns one [`PathIndex`] (a prefix tree keyed by path
//! segments) plus a shared current-directory cursor, and exposes the
//! filesystem operation set: create, remove, move, list, search and streamed
//! content I/O. File bytes live in [`FileContent`] buffers with their own
//! locks, so content streams never hold the namespace lock.
//!
//! The [`shard`] module describes how the keyspace is split across servers by
//! the first path character.

pub mod content;
pub mod error;
pub mod index;
pub mod namespace;
pub mod shard;
pub mod types;

pub use content::FileContent;
pub use error::{NamespaceError, NamespaceResult};
pub use index::{Descendants, IndexError, PathIndex, ROOT, SEPARATOR, SlotId};
pub use namespace::Namespace;
pub use shard::{ConfigError, ShardError, ShardRange, ShardSpec, ShardTable};
pub use types::{DirEntry, FileEntry, Listing, Node, NodeBody, NodeBuilder, NodeKind, Stat};
