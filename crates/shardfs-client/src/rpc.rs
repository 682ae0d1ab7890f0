//! Cap'n Proto RPC client for one shard server
//!
//! Provides a typed interface to the FileServer capability.

use std::rc::Rc;

use capnp::capability::Promise;
use capnp_rpc::{RpcSystem, rpc_twoparty_capnp, twoparty};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::debug;

use shardfs_kernel::{DirEntry, FileEntry, Listing};

use crate::constants::{SINK_QUEUE_DEPTH, WRITE_CHUNK_SIZE};
use crate::shardfs_capnp::{ErrorCode, Status, byte_sink, file_server, status_response};

/// Failure kind reported by a shard server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    NotFound,
    AlreadyExists,
    InvalidName,
    NotSupported,
    DirectoryNotEmpty,
    TypeMismatch,
    Pattern,
    InvalidArgument,
    Io,
    Unknown,
}

impl From<ErrorCode> for RemoteErrorKind {
    fn from(code: ErrorCode) -> Self {
        match code {
            ErrorCode::NotFound => Self::NotFound,
            ErrorCode::AlreadyExists => Self::AlreadyExists,
            ErrorCode::InvalidName => Self::InvalidName,
            ErrorCode::NotSupported => Self::NotSupported,
            ErrorCode::DirectoryNotEmpty => Self::DirectoryNotEmpty,
            ErrorCode::TypeMismatch => Self::TypeMismatch,
            ErrorCode::Pattern => Self::Pattern,
            ErrorCode::InvalidArgument => Self::InvalidArgument,
            ErrorCode::Io => Self::Io,
            ErrorCode::None => Self::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Cap'n Proto error: {0}")]
    Capnp(#[from] capnp::Error),
    #[error("Not in schema: {0}")]
    NotInSchema(#[from] capnp::NotInSchema),
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server error ({code:?}): {reason}")]
    Remote { code: RemoteErrorKind, reason: String },
    #[error("Read stream ended without an end-of-stream marker")]
    MissingEndOfStream,
}

impl RpcError {
    /// The server-reported failure kind, if this is an application error.
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            RpcError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn check_status(status: status_response::Reader<'_>) -> Result<(), RpcError> {
    match status.get_status()? {
        Status::Success => Ok(()),
        Status::Failure => Err(RpcError::Remote {
            code: status.get_code()?.into(),
            reason: status.get_reason()?.to_string()?,
        }),
    }
}

enum SinkEvent {
    Chunk(Vec<u8>),
    Done,
}

/// ByteSink capability exported for one streamed read. Forwards chunks to
/// the reading task through a bounded channel, so a slow output sink slows
/// the server down instead of buffering without limit.
struct ByteSinkForwarder {
    event_tx: mpsc::Sender<SinkEvent>,
}

#[allow(refining_impl_trait)]
impl byte_sink::Server for ByteSinkForwarder {
    fn write(
        self: Rc<Self>,
        params: byte_sink::WriteParams,
        _results: byte_sink::WriteResults,
    ) -> Promise<(), capnp::Error> {
        let data = match params.get().and_then(|p| p.get_data()) {
            Ok(d) => d.to_vec(),
            Err(e) => return Promise::err(e),
        };
        Promise::from_future(async move {
            self.event_tx
                .send(SinkEvent::Chunk(data))
                .await
                .map_err(|_| capnp::Error::disconnected("reader went away".into()))
        })
    }

    fn done(
        self: Rc<Self>,
        _params: byte_sink::DoneParams,
        _results: byte_sink::DoneResults,
    ) -> Promise<(), capnp::Error> {
        Promise::from_future(async move {
            self.event_tx
                .send(SinkEvent::Done)
                .await
                .map_err(|_| capnp::Error::disconnected("reader went away".into()))
        })
    }
}

/// Copies forwarded chunks to the caller's output.
struct ReadProgress {
    copied: u64,
    finished: bool,
}

impl ReadProgress {
    async fn apply<W>(&mut self, event: SinkEvent, output: &mut W) -> Result<(), RpcError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match event {
            SinkEvent::Chunk(data) => {
                output.write_all(&data).await?;
                self.copied += data.len() as u64;
            }
            SinkEvent::Done => self.finished = true,
        }
        Ok(())
    }
}

/// RPC client for one shard server
///
/// Holds the FileServer capability bootstrapped from the server.
///
/// IMPORTANT: Must be created and used within a `tokio::task::LocalSet` context
/// because capnp-rpc's RpcSystem is not Send.
#[derive(Clone)]
pub struct ShardClient {
    server: file_server::Client,
}

impl ShardClient {
    /// Initialize RPC from any AsyncRead+AsyncWrite stream
    ///
    /// MUST be called within a `tokio::task::LocalSet::run_until()` context.
    pub async fn from_stream<S>(stream: S) -> Result<Self, RpcError>
    where
        S: futures::AsyncRead + futures::AsyncWrite + Unpin + 'static,
    {
        let (reader, writer) = futures::AsyncReadExt::split(stream);

        let rpc_network = Box::new(twoparty::VatNetwork::new(
            futures::io::BufReader::new(reader),
            futures::io::BufWriter::new(writer),
            rpc_twoparty_capnp::Side::Client,
            Default::default(),
        ));

        let mut rpc_system = RpcSystem::new(rpc_network, None);
        let server: file_server::Client = rpc_system.bootstrap(rpc_twoparty_capnp::Side::Server);

        // Spawn the RPC system to run in the background (requires LocalSet)
        tokio::task::spawn_local(rpc_system);

        Ok(Self { server })
    }

    /// Immediate children of a directory
    pub async fn list_dir(&self, path: &str) -> Result<Listing, RpcError> {
        debug!(path, "list_dir");
        let mut request = self.server.list_dir_request();
        request.get().set_path(path);
        let response = request.send().promise.await?;
        let reply = response.get()?;
        check_status(reply.get_status()?)?;

        let files = reply.get_files()?;
        let dirs = reply.get_dirs()?;
        let mut listing = Listing::default();
        for file in files.iter() {
            listing.files.push(FileEntry {
                name: file.get_name()?.to_string()?,
                path: file.get_path()?.to_string()?,
                size: file.get_size(),
            });
        }
        for dir in dirs.iter() {
            listing.dirs.push(DirEntry {
                name: dir.get_name()?.to_string()?,
                path: dir.get_path()?.to_string()?,
            });
        }
        Ok(listing)
    }

    pub async fn make_dir(&self, path: &str) -> Result<(), RpcError> {
        debug!(path, "make_dir");
        let mut request = self.server.make_dir_request();
        request.get().set_path(path);
        let response = request.send().promise.await?;
        check_status(response.get()?.get_status()?)
    }

    pub async fn remove(&self, path: &str) -> Result<(), RpcError> {
        debug!(path, "remove");
        let mut request = self.server.remove_request();
        request.get().set_path(path);
        let response = request.send().promise.await?;
        check_status(response.get()?.get_status()?)
    }

    pub async fn create_file(&self, path: &str) -> Result<(), RpcError> {
        debug!(path, "create_file");
        let mut request = self.server.create_file_request();
        request.get().set_path(path);
        let response = request.send().promise.await?;
        check_status(response.get()?.get_status()?)
    }

    /// Stream a remote file into `output`, returning the byte count.
    ///
    /// Chunks are written in arrival order. The output is flushed once the
    /// server confirms the read.
    pub async fn read_file<W>(&self, path: &str, output: &mut W) -> Result<u64, RpcError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        debug!(path, "read_file start");
        let (event_tx, mut event_rx) = mpsc::channel(SINK_QUEUE_DEPTH);
        let sink: byte_sink::Client = capnp_rpc::new_client(ByteSinkForwarder { event_tx });

        let mut request = self.server.read_file_request();
        {
            let mut params = request.get();
            params.set_path(path);
            params.set_sink(sink);
        }
        let mut call = request.send().promise;

        let mut progress = ReadProgress {
            copied: 0,
            finished: false,
        };
        let response = loop {
            tokio::select! {
                biased;
                event = event_rx.recv() => match event {
                    Some(event) => progress.apply(event, output).await?,
                    None => break (&mut call).await,
                },
                response = &mut call => break response,
            }
        };
        let response = response?;
        while let Ok(event) = event_rx.try_recv() {
            progress.apply(event, output).await?;
        }

        let reply = response.get()?;
        check_status(reply.get_status()?)?;
        if !progress.finished {
            return Err(RpcError::MissingEndOfStream);
        }
        output.flush().await?;
        debug!(path, size = reply.get_size(), copied = progress.copied, "read_file done");
        Ok(progress.copied)
    }

    /// Replace a remote file's content with everything `source` yields.
    ///
    /// The destination path travels first, then the content in chunks; the
    /// call completes when the server acknowledges the close.
    pub async fn write_file<R>(&self, path: &str, source: &mut R) -> Result<u64, RpcError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        debug!(path, "write_file start");
        let response = self.server.write_file_request().send().promise.await?;
        let stream = response.get()?.get_stream()?;

        let mut request = stream.send_request();
        request.get().init_payload().set_path(path);
        request.send().promise.await?;

        let mut buf = vec![0u8; WRITE_CHUNK_SIZE];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            let mut request = stream.send_request();
            request.get().init_payload().set_data(&buf[..n]);
            request.send().promise.await?;
        }

        let response = stream.close_and_recv_request().send().promise.await?;
        let reply = response.get()?;
        check_status(reply.get_status()?)?;
        debug!(path, size = reply.get_size(), "write_file done");
        Ok(reply.get_size())
    }
}
