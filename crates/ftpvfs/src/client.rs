//! The control-connection capability the filesystem is built on.
//!
//! [`Client`] is the narrow set of primitives a [`DataConnection`]
//! needs from an FTP session. [`Dialer`] produces logged-in clients and is
//! injected into the [`FileSystem`] so tests can substitute both.
//!
//! [`DataConnection`]: crate::DataConnection
//! [`FileSystem`]: crate::FileSystem

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use ftpvfs_proto::Entry;
use tokio::io::AsyncRead;

use crate::authority::Authority;
use crate::error::VfsResult;
use crate::options::FtpOptions;

/// Byte source handed to [`Client::stor_from`].
pub type ByteReader = Box<dyn AsyncRead + Send + Unpin>;

/// A download in progress.
///
/// Reading yields the remote bytes from the requested offset. `finish`
/// releases the data connection and reads the final transfer reply; it
/// is idempotent.
#[async_trait]
pub trait RetrieveStream: AsyncRead + Send + Unpin {
    async fn finish(&mut self) -> VfsResult<()>;
}

/// One logged-in control connection.
#[async_trait]
pub trait Client: Send + Sync {
    async fn delete(&self, path: &str) -> VfsResult<()>;

    /// Stat a single path.
    async fn get_entry(&self, path: &str) -> VfsResult<Entry>;

    /// Entries of a directory (or the single entry for a file path).
    async fn list(&self, path: &str) -> VfsResult<Vec<Entry>>;

    async fn make_dir(&self, path: &str) -> VfsResult<()>;

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()>;

    /// Start downloading `path` at byte `offset`.
    async fn retr_from(&self, path: &str, offset: u64) -> VfsResult<Box<dyn RetrieveStream>>;

    /// Upload everything `reader` yields to `path`, starting at `offset`.
    ///
    /// Returns once the server has accepted or rejected the data.
    async fn stor_from(&self, path: &str, offset: u64, reader: ByteReader) -> VfsResult<()>;

    fn is_set_time_supported(&self) -> bool;

    async fn set_time(&self, path: &str, time: SystemTime) -> VfsResult<()>;

    /// Whether directory listings carry exact modification times.
    fn is_time_precise_in_list(&self) -> bool;

    async fn quit(&self) -> VfsResult<()>;
}

/// Opens and logs in a [`Client`] for an authority.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, authority: &Authority, options: &FtpOptions) -> VfsResult<Arc<dyn Client>>;
}
