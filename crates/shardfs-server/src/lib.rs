//! shardfs shard server
//!
//! Serves one [`Namespace`](shardfs_kernel::Namespace) over Cap'n Proto RPC,
//! accepting only paths inside the shard's range.

pub mod constants;
pub mod listener;
pub mod rpc;
pub mod shard;

// Generated Cap'n Proto code
pub mod shardfs_capnp {
    include!(concat!(env!("OUT_DIR"), "/shardfs_capnp.rs"));
}

pub use listener::{ShardServer, ShardServerConfig, incoming, serve_stream};
pub use rpc::FileServerImpl;
pub use shard::{ServeError, Shard};
