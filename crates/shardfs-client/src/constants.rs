//! Client configuration constants.

/// Largest content chunk sent per `PayloadStream.send` call.
pub const WRITE_CHUNK_SIZE: usize = 32 * 1024;

/// Chunks a read may buffer before the server's next `ByteSink.write` waits.
pub const SINK_QUEUE_DEPTH: usize = 16;
