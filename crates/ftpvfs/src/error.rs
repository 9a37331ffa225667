//! VFS error types.

use std::io;

use ftpvfs_proto::FtpError;
use thiserror::Error;

use crate::data_conn::Mode;

/// VFS error type.
#[derive(Debug, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the open data connection.
    #[error("{actual} data connection cannot serve a {expected} operation")]
    ModeMismatch { expected: Mode, actual: Mode },

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Protocol-level failure reported by the FTP client.
    #[error(transparent)]
    Ftp(#[from] FtpError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Seek could not re-establish a data connection at the new offset.
    #[error("seek failed: {0}")]
    Seek(Box<VfsError>),

    /// The upload behind a write session failed. Reported by whatever
    /// closed the session; never counts as "not found", whatever the reply.
    #[error("upload of {path} failed: {source}")]
    Upload {
        path: String,
        #[source]
        source: Box<VfsError>,
    },

    /// The session was already closed.
    #[error("data connection is closed")]
    SessionClosed,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// True for a missing file, including a `550` reply from the server.
    pub fn is_not_found(&self) -> bool {
        match self {
            VfsError::NotFound(_) => true,
            VfsError::Ftp(e) => e.is_file_unavailable(),
            VfsError::Seek(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            e if e.is_not_found() => io::Error::new(io::ErrorKind::NotFound, e.to_string()),
            VfsError::InvalidPath(msg) => io::Error::new(io::ErrorKind::InvalidInput, msg),
            VfsError::Io(e) => e,
            VfsError::Ftp(FtpError::Io(e)) => e,
            VfsError::Ftp(FtpError::Timeout(d)) => {
                io::Error::new(io::ErrorKind::TimedOut, format!("timed out after {d:?}"))
            }
            VfsError::SessionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "data connection is closed")
            }
            other => io::Error::other(other.to_string()),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;
