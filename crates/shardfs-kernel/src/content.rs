//! Per-file content buffers.
//!
//! Each file owns its bytes behind a `tokio::sync::RwLock` that is independent
//! of the namespace lock, so a slow stream against one file never blocks
//! structural operations or streams against other files. The lock is held for
//! the whole transfer: one writer or many readers per file.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::RwLock;

/// Byte content of a single file.
#[derive(Debug, Default)]
pub struct FileContent {
    data: RwLock<Vec<u8>>,
    // Mirrors data.len() so listings can report sizes without the content lock.
    len: AtomicU64,
}

impl FileContent {
    /// Create an empty file body.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a file body holding `data`.
    pub fn with_data(data: Vec<u8>) -> Self {
        let len = data.len() as u64;
        Self {
            data: RwLock::new(data),
            len: AtomicU64::new(len),
        }
    }

    /// Current size in bytes.
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Returns true if the file holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the content with everything `source` yields until end-of-input.
    ///
    /// Returns the number of bytes written. If the source fails part-way the
    /// previous content is left in place.
    pub async fn write_from<R>(&self, source: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut data = self.data.write().await;
        let mut incoming = Vec::new();
        let written = source.read_to_end(&mut incoming).await? as u64;
        *data = incoming;
        self.len.store(written, Ordering::Release);
        Ok(written)
    }

    /// Stream the whole content into `sink`.
    pub async fn read_to<W>(&self, sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let data = self.data.read().await;
        sink.write_all(&data).await?;
        sink.flush().await?;
        Ok(data.len() as u64)
    }

    /// Stream the content from byte `offset` into `sink`.
    ///
    /// An offset at or past the end yields `UnexpectedEof`.
    pub async fn read_at<W>(&self, sink: &mut W, offset: u64) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let data = self.data.read().await;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start >= data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("offset {} past end of {}-byte file", offset, data.len()),
            ));
        }
        let tail = &data[start..];
        sink.write_all(tail).await?;
        sink.flush().await?;
        Ok(tail.len() as u64)
    }
}
