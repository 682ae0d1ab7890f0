//! Namespace error types.

use std::io;
use thiserror::Error;

/// Error returned by namespace operations.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// No node at the resolved path.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create or move target is occupied.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Empty name or a reserved `.`/`..` segment.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Multi-level create, root/current-directory removal, kind-changing move.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Directory still has children.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Operation applied to the wrong node kind.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Malformed regular expression.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O error while streaming content.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NamespaceError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an InvalidName error.
    pub fn invalid_name(path: impl Into<String>) -> Self {
        Self::InvalidName(path.into())
    }

    /// Create a NotSupported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create a TypeMismatch error.
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }
}

/// Convert NamespaceError to std::io::Error for compatibility.
impl From<NamespaceError> for io::Error {
    fn from(e: NamespaceError) -> Self {
        match e {
            NamespaceError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            NamespaceError::AlreadyExists(msg) => {
                io::Error::new(io::ErrorKind::AlreadyExists, msg)
            }
            NamespaceError::InvalidName(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            NamespaceError::NotSupported(msg) => io::Error::new(io::ErrorKind::Unsupported, msg),
            NamespaceError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            NamespaceError::TypeMismatch(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            NamespaceError::Pattern(e) => io::Error::new(io::ErrorKind::InvalidInput, e),
            NamespaceError::Io(e) => e,
        }
    }
}

/// Namespace result type.
pub type NamespaceResult<T> = Result<T, NamespaceError>;
