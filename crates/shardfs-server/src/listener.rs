//! TCP listener for a shard server
//!
//! Accepts connections and serves Cap'n Proto RPC on each one. capnp-rpc is
//! `!Send`, so every connection gets its own thread running a current-thread
//! runtime and a `LocalSet`; all of them share the shard's namespace.

use std::io;
use std::net::SocketAddr;
use std::pin::pin;

use capnp_rpc::{RpcSystem, rpc_twoparty_capnp, twoparty};
use futures::{Stream, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{error, info, warn};

use shardfs_kernel::ShardRange;

use crate::constants::ACCEPT_BACKOFF;
use crate::rpc::FileServerImpl;
use crate::shard::Shard;
use crate::shardfs_capnp::file_server;

/// Shard server configuration
#[derive(Debug, Clone)]
pub struct ShardServerConfig {
    pub bind_addr: SocketAddr,
    pub range: ShardRange,
}

impl ShardServerConfig {
    pub fn new(bind_addr: SocketAddr, range: ShardRange) -> Self {
        Self { bind_addr, range }
    }

    /// Listen on localhost (for testing)
    pub fn local(port: u16, range: ShardRange) -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], port)), range)
    }
}

/// Shard server
pub struct ShardServer {
    config: ShardServerConfig,
    shard: Shard,
}

impl ShardServer {
    pub fn new(config: ShardServerConfig) -> Self {
        let shard = Shard::new(config.range);
        Self { config, shard }
    }

    pub fn shard(&self) -> &Shard {
        &self.shard
    }

    /// Bind the configured address and serve forever.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!(
            addr = %listener.local_addr()?,
            range = %self.shard.range(),
            "shard server listening"
        );
        self.serve_incoming(incoming(listener)).await;
        Ok(())
    }

    /// Serve every connection `incoming` yields. Accept failures are logged
    /// and skipped; only the end of the stream stops the loop.
    pub async fn serve_incoming<S>(&self, incoming: S)
    where
        S: Stream<Item = io::Result<(TcpStream, SocketAddr)>>,
    {
        let mut incoming = pin!(incoming);
        while let Some(accepted) = incoming.next().await {
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    if !is_connection_error(&e) {
                        // Listener-level failure such as EMFILE; back off.
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    continue;
                }
            };
            self.spawn_connection(stream, peer);
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%peer, "failed to set TCP_NODELAY: {}", e);
        }
        // Detach from this runtime's reactor; the connection thread
        // registers it with its own.
        let stream = match stream.into_std() {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, "failed to detach connection: {}", e);
                return;
            }
        };
        let shard = self.shard.clone();

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(%peer, "failed to create runtime for connection: {}", e);
                    return;
                }
            };
            let local = tokio::task::LocalSet::new();
            local.block_on(&rt, async move {
                let stream = match TcpStream::from_std(stream) {
                    Ok(s) => s,
                    Err(e) => {
                        error!(%peer, "failed to register connection: {}", e);
                        return;
                    }
                };
                info!(%peer, "connection opened");
                match serve_stream(stream.compat(), shard).await {
                    Ok(()) => info!(%peer, "connection closed"),
                    Err(e) => warn!(%peer, "connection ended with error: {}", e),
                }
            });
        });
    }
}

/// Endless stream of accepted connections.
pub fn incoming(listener: TcpListener) -> impl Stream<Item = io::Result<(TcpStream, SocketAddr)>> {
    futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    })
}

/// Failures tied to one peer rather than to the listener.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

/// Run the FileServer capability over any byte stream on the current
/// `LocalSet`, until the peer disconnects.
pub async fn serve_stream<S>(stream: S, shard: Shard) -> Result<(), capnp::Error>
where
    S: futures::AsyncRead + futures::AsyncWrite + Unpin + 'static,
{
    let (reader, writer) = futures::AsyncReadExt::split(stream);

    let client: file_server::Client = capnp_rpc::new_client(FileServerImpl::new(shard));

    let network = twoparty::VatNetwork::new(
        reader,
        writer,
        rpc_twoparty_capnp::Side::Server,
        Default::default(),
    );
    let rpc_system = RpcSystem::new(Box::new(network), Some(client.client));
    rpc_system.await
}
