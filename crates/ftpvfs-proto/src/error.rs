//! FTP protocol error types.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::reply::{status, Reply};

/// Errors produced by the control and data connections.
#[derive(Debug, Error)]
pub enum FtpError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS configuration or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connecting or logging in took longer than the configured timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a code the command does not accept.
    ///
    /// Displayed as `"<code> <text>"` so callers matching on the leading
    /// status code (e.g. `550`) keep working on the string form.
    #[error("{code} {text}")]
    UnexpectedReply { code: u16, text: String },

    /// The server sent something that is not a valid FTP reply.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The control connection is held by an in-flight transfer.
    #[error("control connection busy with another transfer")]
    Busy,

    /// The server closed the control connection.
    #[error("control connection closed by server")]
    Closed,
}

impl FtpError {
    /// Reply code carried by this error, if it came from the server.
    pub fn code(&self) -> Option<u16> {
        match self {
            FtpError::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True for the `550` "file unavailable" reply.
    pub fn is_file_unavailable(&self) -> bool {
        self.code() == Some(status::FILE_UNAVAILABLE)
    }
}

impl From<Reply> for FtpError {
    fn from(reply: Reply) -> Self {
        FtpError::UnexpectedReply {
            code: reply.code,
            text: reply.text(),
        }
    }
}

/// Result alias for protocol operations.
pub type FtpResult<T> = Result<T, FtpError>;
