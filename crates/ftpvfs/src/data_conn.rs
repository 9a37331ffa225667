//! Data connections: the one open stream or single-op handle per authority.
//!
//! FTP carries one transfer at a time and has no random access, so each
//! [`DataConnection`] is fixed to a [`Mode`] for its whole life. Switching
//! mode or position means closing it and opening a new one.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use ftpvfs_proto::Entry;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::{Client, RetrieveStream};
use crate::error::{VfsError, VfsResult};
use crate::factory;

/// Capacity of the pipe between [`WriteSession::write`] and the uploader.
pub const PIPE_CAPACITY: usize = 64 * 1024;

/// What a data connection is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Read,
    Write,
    SingleOp,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Read => "read",
            Mode::Write => "write",
            Mode::SingleOp => "single-op",
        })
    }
}

/// A download from a fixed offset.
pub struct ReadSession {
    path: String,
    source: Option<Box<dyn RetrieveStream>>,
}

impl ReadSession {
    pub(crate) async fn open(client: &dyn Client, path: &str, offset: u64) -> VfsResult<Self> {
        let source = client.retr_from(path, offset).await?;
        debug!(path, offset, "read session open");
        Ok(Self {
            path: path.to_owned(),
            source: Some(source),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// `Ok(0)` at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let source = self.source.as_mut().ok_or(VfsError::SessionClosed)?;
        Ok(source.read(buf).await?)
    }

    pub async fn close(&mut self) -> VfsResult<()> {
        match self.source.take() {
            Some(mut source) => {
                debug!(path = %self.path, "read session closed");
                source.finish().await
            }
            None => Ok(()),
        }
    }
}

/// An upload fed through an in-process pipe.
///
/// Exactly one uploader task drains the pipe into
/// [`Client::stor_from`]. Its join handle is the completion slot: taken
/// and awaited once, by [`close`](Self::close).
pub struct WriteSession {
    path: String,
    sink: Option<DuplexStream>,
    uploader: Option<JoinHandle<VfsResult<()>>>,
}

impl WriteSession {
    pub(crate) fn start(client: Arc<dyn Client>, path: &str, offset: u64) -> Self {
        let (sink, source) = tokio::io::duplex(PIPE_CAPACITY);
        let task_path = path.to_owned();
        // The task owns the reading end; it is dropped when the upload
        // ends, so a writer whose upload failed gets a broken pipe.
        let uploader = tokio::spawn(async move {
            client
                .stor_from(&task_path, offset, Box::new(source))
                .await
        });
        debug!(path, offset, "write session open");

        Self {
            path: path.to_owned(),
            sink: Some(sink),
            uploader: Some(uploader),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Hand `data` to the uploader. Returns `data.len()`.
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let sink = self.sink.as_mut().ok_or(VfsError::SessionClosed)?;
        sink.write_all(data).await?;
        Ok(data.len())
    }

    /// Close the pipe, then wait for the uploader and return its result.
    ///
    /// The upload outcome is returned once; later calls return `Ok(())`.
    pub async fn close(&mut self) -> VfsResult<()> {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.shutdown().await {
                warn!(path = %self.path, "closing upload pipe: {e}");
            }
        }
        let Some(uploader) = self.uploader.take() else {
            return Ok(());
        };
        let result = match uploader.await {
            Ok(result) => result,
            Err(e) => Err(VfsError::other(format!("uploader task: {e}"))),
        }
        .map_err(|source| VfsError::Upload {
            path: self.path.clone(),
            source: Box::new(source),
        });
        debug!(path = %self.path, ok = result.is_ok(), "write session closed");
        result
    }
}

/// Metadata operations straight on the client.
#[derive(Clone)]
pub struct SingleOpSession {
    client: Arc<dyn Client>,
}

impl SingleOpSession {
    pub(crate) fn new(client: Arc<dyn Client>) -> Self {
        Self { client }
    }

    pub async fn delete(&self, path: &str) -> VfsResult<()> {
        self.client.delete(path).await
    }

    pub async fn get_entry(&self, path: &str) -> VfsResult<Entry> {
        self.client.get_entry(path).await
    }

    pub async fn list(&self, path: &str) -> VfsResult<Vec<Entry>> {
        self.client.list(path).await
    }

    pub async fn make_dir(&self, path: &str) -> VfsResult<()> {
        self.client.make_dir(path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.client.rename(from, to).await
    }

    pub async fn set_time(&self, path: &str, time: SystemTime) -> VfsResult<()> {
        self.client.set_time(path, time).await
    }

    pub fn is_set_time_supported(&self) -> bool {
        self.client.is_set_time_supported()
    }

    pub fn is_time_precise_in_list(&self) -> bool {
        self.client.is_time_precise_in_list()
    }

    pub async fn dir_exists(&self, dir: &str) -> VfsResult<bool> {
        factory::dir_exists(self.client.as_ref(), dir).await
    }

    /// Create `dir` and any missing ancestors.
    pub async fn ensure_dir(&self, dir: &str) -> VfsResult<()> {
        factory::ensure_dir(self.client.as_ref(), dir).await
    }
}

/// The open data connection for one authority.
pub enum DataConnection {
    Read(ReadSession),
    Write(WriteSession),
    SingleOp(SingleOpSession),
}

impl fmt::Debug for DataConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConnection")
            .field("mode", &self.mode())
            .field("path", &self.path())
            .finish()
    }
}

impl DataConnection {
    pub fn mode(&self) -> Mode {
        match self {
            DataConnection::Read(_) => Mode::Read,
            DataConnection::Write(_) => Mode::Write,
            DataConnection::SingleOp(_) => Mode::SingleOp,
        }
    }

    /// File a stream session is bound to. `None` for single-op.
    pub fn path(&self) -> Option<&str> {
        match self {
            DataConnection::Read(s) => Some(s.path()),
            DataConnection::Write(s) => Some(s.path()),
            DataConnection::SingleOp(_) => None,
        }
    }

    fn mismatch(&self, expected: Mode) -> VfsError {
        VfsError::ModeMismatch {
            expected,
            actual: self.mode(),
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        match self {
            DataConnection::Read(s) => s.read(buf).await,
            other => Err(other.mismatch(Mode::Read)),
        }
    }

    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        match self {
            DataConnection::Write(s) => s.write(data).await,
            other => Err(other.mismatch(Mode::Write)),
        }
    }

    /// Release the connection. Idempotent; never blocks the second time.
    pub async fn close(&mut self) -> VfsResult<()> {
        match self {
            DataConnection::Read(s) => s.close().await,
            DataConnection::Write(s) => s.close().await,
            DataConnection::SingleOp(_) => Ok(()),
        }
    }

    pub fn as_single_op(&self) -> VfsResult<&SingleOpSession> {
        match self {
            DataConnection::SingleOp(s) => Ok(s),
            other => Err(other.mismatch(Mode::SingleOp)),
        }
    }

    pub async fn delete(&self, path: &str) -> VfsResult<()> {
        self.as_single_op()?.delete(path).await
    }

    pub async fn get_entry(&self, path: &str) -> VfsResult<Entry> {
        self.as_single_op()?.get_entry(path).await
    }

    pub async fn list(&self, path: &str) -> VfsResult<Vec<Entry>> {
        self.as_single_op()?.list(path).await
    }

    pub async fn make_dir(&self, path: &str) -> VfsResult<()> {
        self.as_single_op()?.make_dir(path).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.as_single_op()?.rename(from, to).await
    }

    pub async fn set_time(&self, path: &str, time: SystemTime) -> VfsResult<()> {
        self.as_single_op()?.set_time(path, time).await
    }

    pub fn is_set_time_supported(&self) -> VfsResult<bool> {
        Ok(self.as_single_op()?.is_set_time_supported())
    }

    pub fn is_time_precise_in_list(&self) -> VfsResult<bool> {
        Ok(self.as_single_op()?.is_time_precise_in_list())
    }
}
