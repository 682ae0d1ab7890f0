//! One shard: a namespace plus the range of paths it accepts.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use shardfs_kernel::{Listing, Namespace, NamespaceError, ShardError, ShardRange};

/// Failure of a single shard operation.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The path is empty, relative, or owned by another shard.
    #[error("invalid path: {0}")]
    Path(#[from] ShardError),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// A write stream carried content before its destination path.
    #[error("first message must be the path of the file to write to")]
    MissingPath,
}

/// A namespace that only accepts absolute paths inside `range`.
#[derive(Debug, Clone)]
pub struct Shard {
    namespace: Arc<Namespace>,
    range: ShardRange,
}

impl Shard {
    pub fn new(range: ShardRange) -> Self {
        Self::with_namespace(Arc::new(Namespace::new()), range)
    }

    pub fn with_namespace(namespace: Arc<Namespace>, range: ShardRange) -> Self {
        Self { namespace, range }
    }

    pub fn range(&self) -> ShardRange {
        self.range
    }

    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Reject paths this shard does not own, before touching the namespace.
    pub fn check(&self, path: &str) -> Result<(), ServeError> {
        Ok(self.range.check(path)?)
    }

    pub fn list_dir(&self, path: &str) -> Result<Listing, ServeError> {
        self.check(path)?;
        Ok(self.namespace.list(path)?)
    }

    pub fn make_dir(&self, path: &str) -> Result<(), ServeError> {
        self.check(path)?;
        Ok(self.namespace.make_dir(path)?)
    }

    pub fn remove(&self, path: &str) -> Result<(), ServeError> {
        self.check(path)?;
        Ok(self.namespace.remove(path)?)
    }

    pub fn create_file(&self, path: &str) -> Result<(), ServeError> {
        self.check(path)?;
        Ok(self.namespace.create_file(path)?)
    }

    pub async fn read_file<W>(&self, path: &str, sink: &mut W) -> Result<u64, ServeError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.check(path)?;
        Ok(self.namespace.read(path, sink).await?)
    }

    pub async fn write_file<R>(&self, path: &str, source: &mut R) -> Result<u64, ServeError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        self.check(path)?;
        Ok(self.namespace.write(path, source).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> Shard {
        Shard::new(ShardRange::new('a', 'n').unwrap())
    }

    #[test]
    fn test_out_of_range_leaves_namespace_untouched() {
        let shard = shard();
        assert!(matches!(
            shard.make_dir("/zoo"),
            Err(ServeError::Path(ShardError::OutOfRange { .. }))
        ));
        assert!(matches!(
            shard.make_dir("bar"),
            Err(ServeError::Path(ShardError::RelativePath(_)))
        ));
        assert!(shard.list_dir("/").unwrap().is_empty());
    }

    #[test]
    fn test_engine_errors_pass_through() {
        let shard = shard();
        shard.make_dir("/bar").unwrap();
        assert!(matches!(
            shard.make_dir("/bar"),
            Err(ServeError::Namespace(NamespaceError::AlreadyExists(_)))
        ));
        assert!(matches!(
            shard.remove("/"),
            Err(ServeError::Namespace(NamespaceError::NotSupported(_)))
        ));
    }

    #[tokio::test]
    async fn test_stream_round_trip() {
        let shard = shard();
        shard.create_file("/file").unwrap();
        let n = shard.write_file("/file", &mut &b"foobar"[..]).await.unwrap();
        assert_eq!(n, 6);

        let mut out = Vec::new();
        shard.read_file("/file", &mut out).await.unwrap();
        assert_eq!(out, b"foobar");
    }
}
