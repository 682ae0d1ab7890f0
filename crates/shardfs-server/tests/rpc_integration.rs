//! Integration tests for shardfs RPC
//!
//! Single-shard tests run over real TCP connections; router failure tests run
//! shards over in-memory pipes so a shard can be killed mid-test.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, LocalSet};
use tokio::time::timeout;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tokio_util::sync::CancellationToken;

use shardfs_client::{
    RemoteErrorKind, RouterError, RpcError, ShardClient, ShardRouter, connect_tcp,
};
use shardfs_kernel::{ShardRange, ShardSpec, ShardTable};
use shardfs_server::constants::STREAM_BUFFER_SIZE;
use shardfs_server::{Shard, ShardServer, ShardServerConfig, incoming, serve_stream};

/// Helper to run async test code that requires LocalSet (for capnp-rpc)
fn run_local<F: std::future::Future<Output = ()>>(f: F) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let local = LocalSet::new();
    rt.block_on(local.run_until(f));
}

fn range(start: char, end: char) -> ShardRange {
    ShardRange::new(start, end).unwrap()
}

/// Start a shard server on an ephemeral port and return its address
async fn start_server(range: ShardRange) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ShardServer::new(ShardServerConfig::local(addr.port(), range));

    tokio::task::spawn_local(async move {
        if let Err(e) = server.serve(listener).await {
            tracing::error!("Server error: {}", e);
        }
    });

    addr
}

async fn connect_client(addr: SocketAddr) -> ShardClient {
    connect_tcp(&addr.to_string())
        .await
        .expect("TCP connect failed")
}

/// Serve a fresh shard over an in-memory pipe on the current LocalSet
async fn start_pipe_shard(range: ShardRange) -> (ShardClient, JoinHandle<()>) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let shard = Shard::new(range);
    let handle = tokio::task::spawn_local(async move {
        let _ = serve_stream(server_end.compat(), shard).await;
    });
    let client = ShardClient::from_stream(client_end.compat())
        .await
        .expect("RPC client init failed");
    (client, handle)
}

fn remote_kind(err: RpcError) -> Option<RemoteErrorKind> {
    err.remote_kind()
}

/// Yields `prefix` once, then fails every read.
struct FailingSource {
    prefix: Option<Vec<u8>>,
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.prefix.take() {
            Some(bytes) => {
                buf.put_slice(&bytes);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::other("source went away"))),
        }
    }
}

#[test]
fn test_crud_round_trip() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        client.make_dir("/bar").await.unwrap();
        client.make_dir("/bar/foo").await.unwrap();
        client.create_file("/bar/file1").await.unwrap();
        let written = client.write_file("/bar/file1", &mut &b"foobar"[..]).await.unwrap();
        assert_eq!(written, 6);

        let mut out = Vec::new();
        let read = client.read_file("/bar/file1", &mut out).await.unwrap();
        assert_eq!(read, 6);
        assert_eq!(out, b"foobar");

        let listing = client.list_dir("/bar").await.unwrap();
        assert_eq!(listing.dir_names(), vec!["foo"]);
        assert_eq!(listing.file_names(), vec!["file1"]);
        assert_eq!(listing.files[0].path, "/bar/file1");
        assert_eq!(listing.files[0].size, 6);

        let err = client.remove("/bar").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::DirectoryNotEmpty));

        client.remove("/bar/file1").await.unwrap();
        client.remove("/bar/foo").await.unwrap();
        client.remove("/bar").await.unwrap();
        assert!(client.list_dir("/").await.unwrap().is_empty());
    });
}

#[test]
fn test_engine_errors_are_typed() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        client.make_dir("/bar").await.unwrap();
        let err = client.make_dir("/bar").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::AlreadyExists));

        let err = client.make_dir("/nope/child").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::NotSupported));

        let mut out = Vec::new();
        let err = client.read_file("/missing", &mut out).await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::NotFound));

        let err = client.read_file("/bar", &mut out).await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::TypeMismatch));
        assert!(out.is_empty());

        let err = client.remove("/").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::NotSupported));
    });
}

#[test]
fn test_out_of_range_paths_rejected() {
    run_local(async {
        let addr = start_server(range('a', 'n')).await;
        let client = connect_client(addr).await;

        let err = client.make_dir("/zoo").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::InvalidArgument));

        let err = client.create_file("relative").await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::InvalidArgument));

        let err = client.write_file("/zoo", &mut &b"data"[..]).await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::InvalidArgument));

        assert!(client.list_dir("/").await.unwrap().is_empty());
    });
}

#[test]
fn test_large_stream_round_trip() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        let payload: Vec<u8> = (0..(1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();
        client.create_file("/big").await.unwrap();
        let written = client.write_file("/big", &mut &payload[..]).await.unwrap();
        assert_eq!(written, payload.len() as u64);

        let mut out = Vec::new();
        let read = client.read_file("/big", &mut out).await.unwrap();
        assert_eq!(read, payload.len() as u64);
        assert_eq!(out, payload);

        let listing = client.list_dir("/").await.unwrap();
        assert_eq!(listing.files[0].size, payload.len() as u64);
    });
}

#[test]
fn test_write_replaces_and_requires_existing_file() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        let err = client.write_file("/ghost", &mut &b"boo"[..]).await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::NotFound));

        client.create_file("/notes").await.unwrap();
        client.write_file("/notes", &mut &b"first draft"[..]).await.unwrap();
        client.write_file("/notes", &mut &b"final"[..]).await.unwrap();

        let mut out = Vec::new();
        client.read_file("/notes", &mut out).await.unwrap();
        assert_eq!(out, b"final");

        client.create_file("/empty").await.unwrap();
        let mut out = Vec::new();
        assert_eq!(client.read_file("/empty", &mut out).await.unwrap(), 0);
    });
}

#[test]
fn test_failed_source_keeps_previous_content() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        client.create_file("/notes").await.unwrap();
        client.write_file("/notes", &mut &b"original"[..]).await.unwrap();

        let mut source = FailingSource {
            prefix: Some(b"half a new ver".to_vec()),
        };
        let err = client.write_file("/notes", &mut source).await.unwrap_err();
        assert!(matches!(err, RpcError::Io(_)), "unexpected error: {err}");

        // The abandoned stream never commits.
        let mut out = Vec::new();
        client.read_file("/notes", &mut out).await.unwrap();
        assert_eq!(out, b"original");

        // Later writes are unaffected.
        client.write_file("/notes", &mut &b"revised"[..]).await.unwrap();
        let mut out = Vec::new();
        client.read_file("/notes", &mut out).await.unwrap();
        assert_eq!(out, b"revised");
    });
}

#[test]
fn test_large_write_to_missing_file() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let client = connect_client(addr).await;

        // Far more than the server buffers, so content keeps arriving after
        // the namespace write has already failed.
        let payload = vec![7u8; 4 * STREAM_BUFFER_SIZE];
        let err = client.write_file("/ghost", &mut &payload[..]).await.unwrap_err();
        assert_eq!(remote_kind(err), Some(RemoteErrorKind::NotFound));

        assert!(client.list_dir("/").await.unwrap().is_empty());
        client.create_file("/ghost").await.unwrap();
        let written = client.write_file("/ghost", &mut &payload[..]).await.unwrap();
        assert_eq!(written, payload.len() as u64);
    });
}

#[test]
fn test_accept_failure_keeps_serving() {
    run_local(async {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ShardServer::new(ShardServerConfig::local(addr.port(), range('a', 'z')));

        let failures = futures::stream::iter(vec![
            Err::<(TcpStream, SocketAddr), _>(io::Error::from(io::ErrorKind::ConnectionAborted)),
            Err(io::Error::other("too many open files")),
        ]);
        tokio::task::spawn_local(async move {
            server.serve_incoming(failures.chain(incoming(listener))).await;
        });

        let client = connect_client(addr).await;
        client.make_dir("/alive").await.unwrap();
        assert_eq!(client.list_dir("/").await.unwrap().dir_names(), vec!["alive"]);
    });
}

#[test]
fn test_connections_share_one_namespace() {
    run_local(async {
        let addr = start_server(range('a', 'z')).await;
        let first = connect_client(addr).await;
        let second = connect_client(addr).await;

        first.make_dir("/shared").await.unwrap();
        let listing = second.list_dir("/").await.unwrap();
        assert_eq!(listing.dir_names(), vec!["shared"]);
    });
}

#[test]
fn test_router_fan_out() {
    run_local(async {
        let s1 = start_server(range('a', 'n')).await;
        let s2 = start_server(range('n', 'z')).await;
        let table = ShardTable::new(vec![
            ShardSpec { range: range('a', 'n'), address: s1.to_string() },
            ShardSpec { range: range('n', 'z'), address: s2.to_string() },
        ]);
        let router = ShardRouter::connect(table).await.expect("router connect failed");

        router.make_dir("/apple").await.unwrap();
        router.make_dir("/nut").await.unwrap();
        router.create_file("/bar").await.unwrap();
        router.create_file("/yak").await.unwrap();
        router.write_file("/yak", &mut &b"hair"[..]).await.unwrap();

        let (a, b) = tokio::join!(router.list_dir("/"), router.list_dir("/"));
        for listing in [a.unwrap(), b.unwrap()] {
            assert_eq!(listing.dir_names(), vec!["apple", "nut"]);
            assert_eq!(listing.file_names(), vec!["bar", "yak"]);
        }

        let mut out = Vec::new();
        router.read_file("/yak", &mut out).await.unwrap();
        assert_eq!(out, b"hair");

        assert!(matches!(
            router.make_dir("/").await,
            Err(RouterError::Routing { shards: 2, .. })
        ));
        assert!(matches!(
            router.make_dir("/zebra").await,
            Err(RouterError::NoShard(_))
        ));
        assert!(matches!(
            router.make_dir("apple").await,
            Err(RouterError::RelativePath(_))
        ));
    });
}

#[test]
fn test_router_surfaces_shard_failure() {
    run_local(async {
        let (c1, _h1) = start_pipe_shard(range('a', 'n')).await;
        let (c2, h2) = start_pipe_shard(range('n', 'z')).await;
        let table = ShardTable::new(vec![
            ShardSpec { range: range('a', 'n'), address: "s1".into() },
            ShardSpec { range: range('n', 'z'), address: "s2".into() },
        ]);
        let router = ShardRouter::new(table, vec![c1, c2]).unwrap();

        router.make_dir("/apple").await.unwrap();
        router.make_dir("/nut").await.unwrap();
        assert_eq!(router.list_dir("/").await.unwrap().dirs.len(), 2);

        // Kill S2: its pipe closes and every call to it fails.
        h2.abort();
        let _ = h2.await;

        match router.list_dir("/").await {
            Err(RouterError::Shard { address, .. }) => assert_eq!(address, "s2"),
            other => panic!("expected shard failure, got {:?}", other.map(|l| l.dirs)),
        }

        // S1 keeps serving its own range.
        let listing = router.list_dir("/apple").await.unwrap();
        assert!(listing.is_empty());
        assert!(router.make_dir("/nest").await.is_err());
    });
}

#[test]
fn test_router_cancellation() {
    run_local(async {
        let (c1, _h1) = start_pipe_shard(range('a', 'n')).await;
        let (c2, _h2) = start_pipe_shard(range('n', 'z')).await;
        let table = ShardTable::new(vec![
            ShardSpec { range: range('a', 'n'), address: "s1".into() },
            ShardSpec { range: range('n', 'z'), address: "s2".into() },
        ]);
        let router = ShardRouter::new(table, vec![c1, c2]).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            router.list_dir_cancellable("/", cancel).await,
            Err(RouterError::Cancelled)
        ));

        // A fresh token leaves the router usable.
        assert!(router.list_dir("/").await.unwrap().is_empty());
    });
}

#[test]
fn test_router_stalled_shard_can_be_abandoned() {
    run_local(async {
        let (live, _h1) = start_pipe_shard(range('a', 'n')).await;
        // S2's far end is held open but never served, so its calls hang.
        let (client_end, _server_end) = tokio::io::duplex(64 * 1024);
        let stalled = ShardClient::from_stream(client_end.compat()).await.unwrap();
        let table = ShardTable::new(vec![
            ShardSpec { range: range('a', 'n'), address: "s1".into() },
            ShardSpec { range: range('n', 'z'), address: "s2".into() },
        ]);
        let router = ShardRouter::new(table, vec![live, stalled]).unwrap();

        let abandoned = timeout(Duration::from_millis(100), router.list_dir("/")).await;
        assert!(abandoned.is_err());

        // The healthy shard is still reachable through the same router.
        router.make_dir("/apple").await.unwrap();
        assert_eq!(router.list_dir("/apple").await.unwrap().dirs.len(), 0);
    });
}
