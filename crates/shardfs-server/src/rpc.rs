//! Cap'n Proto RPC server implementation
//!
//! Implements the FileServer capability over one [`Shard`], plus the
//! PayloadStream capability handed out for client-streamed writes.
//! Application failures travel back in a `StatusResponse` with a typed
//! `ErrorCode`; capnp errors are reserved for transport and protocol faults.

#![allow(refining_impl_trait)]

use std::rc::Rc;

use capnp::capability::Promise;
use capnp_rpc::pry;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shardfs_kernel::NamespaceError;

use crate::constants::{READ_CHUNK_SIZE, STREAM_BUFFER_SIZE};
use crate::shard::{ServeError, Shard};
use crate::shardfs_capnp::{ErrorCode, Status, file_payload, file_server, payload_stream, status_response};

/// Helper to extract path string from capnp text reader
fn get_path_str(text: capnp::text::Reader<'_>) -> Result<String, capnp::Error> {
    text.to_str()
        .map(|s| s.to_owned())
        .map_err(|e| capnp::Error::failed(format!("invalid UTF-8: {}", e)))
}

/// Map a shard failure onto its wire code.
pub fn error_code(err: &ServeError) -> ErrorCode {
    match err {
        ServeError::Path(_) | ServeError::MissingPath => ErrorCode::InvalidArgument,
        ServeError::Namespace(e) => match e {
            NamespaceError::NotFound(_) => ErrorCode::NotFound,
            NamespaceError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            NamespaceError::InvalidName(_) => ErrorCode::InvalidName,
            NamespaceError::NotSupported(_) => ErrorCode::NotSupported,
            NamespaceError::DirectoryNotEmpty(_) => ErrorCode::DirectoryNotEmpty,
            NamespaceError::TypeMismatch(_) => ErrorCode::TypeMismatch,
            NamespaceError::Pattern(_) => ErrorCode::Pattern,
            NamespaceError::Io(_) => ErrorCode::Io,
        },
    }
}

fn set_ok(mut status: status_response::Builder<'_>) {
    status.set_status(Status::Success);
    status.set_code(ErrorCode::None);
}

fn set_err(mut status: status_response::Builder<'_>, err: &ServeError) {
    status.set_status(Status::Failure);
    status.set_code(error_code(err));
    status.set_reason(err.to_string().as_str());
}

fn set_outcome(status: status_response::Builder<'_>, op: &str, path: &str, outcome: Result<(), ServeError>) {
    match outcome {
        Ok(()) => set_ok(status),
        Err(e) => {
            warn!(op, path, error = %e, "request failed");
            set_err(status, &e);
        }
    }
}

/// FileServer capability over one shard.
pub struct FileServerImpl {
    shard: Shard,
}

impl FileServerImpl {
    pub fn new(shard: Shard) -> Self {
        Self { shard }
    }
}

impl file_server::Server for FileServerImpl {
    fn list_dir(
        self: Rc<Self>,
        params: file_server::ListDirParams,
        mut results: file_server::ListDirResults,
    ) -> Promise<(), capnp::Error> {
        let path = pry!(get_path_str(pry!(pry!(params.get()).get_path())));
        debug!(path, "list_dir");

        let mut builder = results.get();
        match self.shard.list_dir(&path) {
            Ok(listing) => {
                set_ok(builder.reborrow().init_status());
                let mut files = builder.reborrow().init_files(listing.files.len() as u32);
                for (i, file) in listing.files.iter().enumerate() {
                    let mut f = files.reborrow().get(i as u32);
                    f.set_name(file.name.as_str());
                    f.set_path(file.path.as_str());
                    f.set_size(file.size);
                }
                let mut dirs = builder.init_dirs(listing.dirs.len() as u32);
                for (i, dir) in listing.dirs.iter().enumerate() {
                    let mut d = dirs.reborrow().get(i as u32);
                    d.set_name(dir.name.as_str());
                    d.set_path(dir.path.as_str());
                }
            }
            Err(e) => {
                warn!(path, error = %e, "list_dir failed");
                set_err(builder.init_status(), &e);
            }
        }
        Promise::ok(())
    }

    fn make_dir(
        self: Rc<Self>,
        params: file_server::MakeDirParams,
        mut results: file_server::MakeDirResults,
    ) -> Promise<(), capnp::Error> {
        let path = pry!(get_path_str(pry!(pry!(params.get()).get_path())));
        debug!(path, "make_dir");
        let outcome = self.shard.make_dir(&path);
        set_outcome(results.get().init_status(), "make_dir", &path, outcome);
        Promise::ok(())
    }

    fn remove(
        self: Rc<Self>,
        params: file_server::RemoveParams,
        mut results: file_server::RemoveResults,
    ) -> Promise<(), capnp::Error> {
        let path = pry!(get_path_str(pry!(pry!(params.get()).get_path())));
        debug!(path, "remove");
        let outcome = self.shard.remove(&path);
        set_outcome(results.get().init_status(), "remove", &path, outcome);
        Promise::ok(())
    }

    fn create_file(
        self: Rc<Self>,
        params: file_server::CreateFileParams,
        mut results: file_server::CreateFileResults,
    ) -> Promise<(), capnp::Error> {
        let path = pry!(get_path_str(pry!(pry!(params.get()).get_path())));
        debug!(path, "create_file");
        let outcome = self.shard.create_file(&path);
        set_outcome(results.get().init_status(), "create_file", &path, outcome);
        Promise::ok(())
    }

    fn read_file(
        self: Rc<Self>,
        params: file_server::ReadFileParams,
        mut results: file_server::ReadFileResults,
    ) -> Promise<(), capnp::Error> {
        let params = pry!(params.get());
        let path = pry!(get_path_str(pry!(params.get_path())));
        let sink = pry!(params.get_sink());
        let shard = self.shard.clone();
        debug!(path, "read_file start");

        Promise::from_future(async move {
            if let Err(e) = shard.check(&path) {
                warn!(path, error = %e, "read_file rejected");
                set_err(results.get().init_status(), &e);
                return Ok(());
            }

            let (mut tx, mut rx) = tokio::io::duplex(STREAM_BUFFER_SIZE);
            let produce = async {
                let outcome = shard.read_file(&path, &mut tx).await;
                drop(tx);
                outcome
            };
            // Chunks are pushed one at a time, so they arrive in order.
            let sink_ref = &sink;
            let forward = async move {
                let mut buf = vec![0u8; READ_CHUNK_SIZE];
                loop {
                    let n = rx
                        .read(&mut buf)
                        .await
                        .map_err(|e| capnp::Error::failed(format!("read pipe: {e}")))?;
                    if n == 0 {
                        return Ok::<_, capnp::Error>(());
                    }
                    let mut req = sink_ref.write_request();
                    req.get().set_data(&buf[..n]);
                    req.send().promise.await?;
                }
            };
            let (outcome, forwarded) = tokio::join!(produce, forward);
            forwarded?;

            match outcome {
                Ok(size) => {
                    sink.done_request().send().promise.await?;
                    let mut builder = results.get();
                    set_ok(builder.reborrow().init_status());
                    builder.set_size(size);
                    debug!(path, size, "read_file done");
                }
                Err(e) => {
                    warn!(path, error = %e, "read_file failed");
                    set_err(results.get().init_status(), &e);
                }
            }
            Ok(())
        })
    }

    fn write_file(
        self: Rc<Self>,
        _params: file_server::WriteFileParams,
        mut results: file_server::WriteFileResults,
    ) -> Promise<(), capnp::Error> {
        debug!("write_file opened");
        let stream = PayloadStreamImpl::new(self.shard.clone());
        results.get().set_stream(capnp_rpc::new_client(stream));
        Promise::ok(())
    }
}

/// Progress of one client-streamed write.
enum WriteState {
    /// Nothing received yet; the next payload must be the path.
    AwaitingPath,
    /// Content flows through `tx` into the namespace write running in `task`.
    Streaming {
        path: String,
        tx: DuplexStream,
        task: JoinHandle<Result<u64, ServeError>>,
    },
    /// The namespace write stopped reading early; its result explains why.
    Draining {
        path: String,
        task: JoinHandle<Result<u64, ServeError>>,
    },
    /// The destination path was refused; later content is discarded.
    Rejected(ServeError),
    Closed,
}

enum Payload {
    Path(String),
    Data(Vec<u8>),
}

/// PayloadStream capability for one `writeFile` call.
pub struct PayloadStreamImpl {
    shard: Shard,
    // Held across awaits so payloads apply strictly in arrival order.
    state: Mutex<WriteState>,
}

impl PayloadStreamImpl {
    fn new(shard: Shard) -> Self {
        Self {
            shard,
            state: Mutex::new(WriteState::AwaitingPath),
        }
    }

    fn open(&self, path: String) -> WriteState {
        if let Err(e) = self.shard.check(&path) {
            warn!(path, error = %e, "write_file rejected");
            return WriteState::Rejected(e);
        }
        let (tx, mut rx) = tokio::io::duplex(STREAM_BUFFER_SIZE);
        let shard = self.shard.clone();
        let target = path.clone();
        let task = tokio::task::spawn_local(async move { shard.write_file(&target, &mut rx).await });
        debug!(path, "write_file streaming");
        WriteState::Streaming { path, tx, task }
    }
}

impl Drop for PayloadStreamImpl {
    fn drop(&mut self) {
        // An abandoned stream must not commit a truncated file.
        if let WriteState::Streaming { path, task, .. } = self.state.get_mut() {
            warn!(path = %path, "write stream dropped before close; discarding");
            task.abort();
        }
    }
}

async fn finish(task: JoinHandle<Result<u64, ServeError>>) -> Result<Result<u64, ServeError>, capnp::Error> {
    task.await
        .map_err(|e| capnp::Error::failed(format!("write task failed: {e}")))
}

impl payload_stream::Server for PayloadStreamImpl {
    fn send(
        self: Rc<Self>,
        params: payload_stream::SendParams,
        _results: payload_stream::SendResults,
    ) -> Promise<(), capnp::Error> {
        let payload = pry!(pry!(params.get()).get_payload());
        let payload = match pry!(payload.which()) {
            file_payload::Path(path) => Payload::Path(pry!(get_path_str(pry!(path)))),
            file_payload::Data(data) => Payload::Data(pry!(data).to_vec()),
        };

        Promise::from_future(async move {
            let mut state = self.state.lock().await;
            let current = std::mem::replace(&mut *state, WriteState::Closed);
            let (next, result) = match (current, payload) {
                (WriteState::AwaitingPath, Payload::Path(path)) => (self.open(path), Ok(())),
                (WriteState::AwaitingPath, Payload::Data(_)) => (
                    WriteState::AwaitingPath,
                    Err(capnp::Error::failed(ServeError::MissingPath.to_string())),
                ),
                (WriteState::Streaming { path, mut tx, task }, Payload::Data(chunk)) => {
                    match tx.write_all(&chunk).await {
                        Ok(()) => (WriteState::Streaming { path, tx, task }, Ok(())),
                        Err(_) => (WriteState::Draining { path, task }, Ok(())),
                    }
                }
                (s @ (WriteState::Draining { .. } | WriteState::Rejected(_)), Payload::Data(_)) => {
                    (s, Ok(()))
                }
                (WriteState::Closed, _) => (
                    WriteState::Closed,
                    Err(capnp::Error::failed("stream already closed".into())),
                ),
                (s, Payload::Path(_)) => (
                    s,
                    Err(capnp::Error::failed("destination path already set".into())),
                ),
            };
            *state = next;
            result
        })
    }

    fn close_and_recv(
        self: Rc<Self>,
        _params: payload_stream::CloseAndRecvParams,
        mut results: payload_stream::CloseAndRecvResults,
    ) -> Promise<(), capnp::Error> {
        Promise::from_future(async move {
            let mut state = self.state.lock().await;
            let (path, outcome) = match std::mem::replace(&mut *state, WriteState::Closed) {
                WriteState::AwaitingPath => (String::new(), Err(ServeError::MissingPath)),
                WriteState::Rejected(e) => (String::new(), Err(e)),
                WriteState::Streaming { path, tx, task } => {
                    // Dropping the pipe's write half is the end-of-input signal.
                    drop(tx);
                    (path, finish(task).await?)
                }
                WriteState::Draining { path, task } => (path, finish(task).await?),
                WriteState::Closed => {
                    return Err(capnp::Error::failed("stream already closed".into()));
                }
            };

            let mut builder = results.get();
            match outcome {
                Ok(size) => {
                    set_ok(builder.reborrow().init_status());
                    builder.set_size(size);
                    debug!(path, size, "write_file done");
                }
                Err(e) => {
                    warn!(path, error = %e, "write_file failed");
                    set_err(builder.init_status(), &e);
                }
            }
            Ok(())
        })
    }
}
