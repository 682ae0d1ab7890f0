//! Server configuration constants.

use std::time::Duration;

/// Default TCP port for a shard server.
pub const DEFAULT_PORT: u16 = 7070;

/// Default bind address (localhost only).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Largest chunk pushed to a client's `ByteSink` per call.
pub const READ_CHUNK_SIZE: usize = 32 * 1024;

/// In-process pipe capacity between the RPC layer and the namespace streams.
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Pause after an accept failure that is not tied to a single peer.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
