//! shardfs RPC client library
//!
//! Provides a typed Cap'n Proto client for one shard server and a
//! [`ShardRouter`] that spreads a namespace across many of them.

pub mod constants;
pub mod router;
pub mod rpc;

// Generated Cap'n Proto code
pub mod shardfs_capnp {
    include!(concat!(env!("OUT_DIR"), "/shardfs_capnp.rs"));
}

pub use router::{RouterError, ShardRouter, route};
pub use rpc::{RemoteErrorKind, RpcError, ShardClient};

/// Connect to a shard server over TCP and return an RPC client
///
/// Must be called within a `tokio::task::LocalSet` context.
pub async fn connect_tcp(addr: &str) -> Result<ShardClient, ConnectError> {
    use tokio::net::TcpStream;
    use tokio_util::compat::TokioAsyncReadCompatExt;

    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let client = ShardClient::from_stream(stream.compat()).await?;
    Ok(client)
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
