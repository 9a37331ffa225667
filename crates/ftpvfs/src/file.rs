//! Seekable files on top of stream-only FTP transfers.
//!
//! A [`File`] keeps its own byte cursor. Reads and writes go through the
//! filesystem's data connection for the file's authority; a seek closes
//! that connection and reopens it at the new offset with `REST`.

use std::io::SeekFrom;
use std::time::{SystemTime, UNIX_EPOCH};

use ftpvfs_proto::Entry;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::authority::Authority;
use crate::data_conn::{Mode, SingleOpSession};
use crate::error::{VfsError, VfsResult};
use crate::factory::Cursor;
use crate::filesystem::FileSystem;
use crate::location::Location;
use crate::path;

/// Chunk size for copies.
const COPY_BUF_SIZE: usize = 32 * 1024;

/// A file on an FTP server.
#[derive(Debug)]
pub struct File {
    fs: FileSystem,
    authority: Authority,
    path: String,
    cursor: Cursor,
}

impl File {
    pub(crate) fn new(fs: FileSystem, authority: Authority, path: String) -> Self {
        Self {
            fs,
            authority,
            path,
            cursor: Cursor::default(),
        }
    }

    pub fn name(&self) -> &str {
        path::base_name(&self.path)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn uri(&self) -> String {
        format!("{}://{}{}", self.authority.scheme(), self.authority, self.path)
    }

    pub fn file_system(&self) -> &FileSystem {
        &self.fs
    }

    /// The directory containing this file.
    pub fn location(&self) -> Location {
        Location::new(
            self.fs.clone(),
            self.authority.clone(),
            path::parent_dir(&self.path).to_owned(),
        )
    }

    /// Byte offset the next read or write starts at.
    pub fn offset(&self) -> u64 {
        self.cursor.offset
    }

    // =========================================================================
    // Streaming
    // =========================================================================

    /// Read from the cursor. `Ok(0)` at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> VfsResult<usize> {
        let n = self
            .fs
            .data_conn(&self.authority, &self.path, Mode::Read, &mut self.cursor)
            .await?
            .read(buf)
            .await?;
        self.cursor.offset += n as u64;
        Ok(n)
    }

    /// Write at the cursor. The upload is only complete once
    /// [`close`](Self::close) returns `Ok`.
    pub async fn write(&mut self, data: &[u8]) -> VfsResult<usize> {
        let n = self
            .fs
            .data_conn(&self.authority, &self.path, Mode::Write, &mut self.cursor)
            .await?
            .write(data)
            .await?;
        self.cursor.offset += n as u64;
        Ok(n)
    }

    /// Read everything from the cursor to the end of the file.
    pub async fn read_to_end(&mut self, out: &mut Vec<u8>) -> VfsResult<usize> {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut total = 0;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&buf[..n]);
            total += n;
        }
    }

    /// Move the cursor and reopen the data connection there.
    ///
    /// `SeekFrom::End(n)` counts `|n|` bytes back from the end of the
    /// file. Positions clamp at 0. If the file does not exist the cursor
    /// becomes 0 and no error is returned. Any other failure, including
    /// an upload that failed when the open session was closed, resets the
    /// cursor to 0 and returns [`VfsError::Seek`].
    #[tracing::instrument(skip(self), fields(path = %self.path), name = "file.seek")]
    pub async fn seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        match self.try_seek(pos).await {
            Ok(offset) => Ok(offset),
            Err(e) => {
                self.cursor = Cursor {
                    offset: 0,
                    reset: true,
                };
                match e {
                    // Closing the old session failed; never a missing file.
                    VfsError::Seek(_) => Err(e),
                    e if e.is_not_found() => {
                        debug!("seek on missing file, offset 0");
                        Ok(0)
                    }
                    e => Err(VfsError::Seek(Box::new(e))),
                }
            }
        }
    }

    async fn try_seek(&mut self, pos: SeekFrom) -> VfsResult<u64> {
        let mode = self
            .fs
            .owned_mode(&self.authority, &self.path)
            .await
            .unwrap_or(Mode::Read);

        // Finish a pending upload before anything else touches the
        // connection, so its outcome is reported here.
        self.fs
            .close_owned(&self.authority, &self.path)
            .await
            .map_err(|e| VfsError::Seek(Box::new(e)))?;

        let offset = match pos {
            SeekFrom::Start(n) => n,
            SeekFrom::Current(delta) => self.cursor.offset.saturating_add_signed(delta),
            SeekFrom::End(back) => match self.size().await {
                Ok(size) => size.saturating_sub(back.unsigned_abs()),
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            },
        };

        self.fs
            .close_owned(&self.authority, &self.path)
            .await
            .map_err(|e| VfsError::Seek(Box::new(e)))?;
        self.cursor = Cursor {
            offset,
            reset: true,
        };
        drop(
            self.fs
                .data_conn(&self.authority, &self.path, mode, &mut self.cursor)
                .await?,
        );
        Ok(offset)
    }

    /// Close this file's data connection and rewind.
    ///
    /// For a write this waits for the upload and returns its outcome. The
    /// cursor is 0 afterwards even if closing failed.
    #[tracing::instrument(skip(self), fields(path = %self.path), name = "file.close")]
    pub async fn close(&mut self) -> VfsResult<()> {
        let result = self.fs.close_owned(&self.authority, &self.path).await;
        self.cursor = Cursor {
            offset: 0,
            reset: true,
        };
        result
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    async fn single_op(&mut self) -> VfsResult<SingleOpSession> {
        self.fs
            .single_op(&self.authority, &self.path, &mut self.cursor)
            .await
    }

    async fn stat(&mut self) -> VfsResult<Entry> {
        let session = self.single_op().await?;
        if session.is_time_precise_in_list() {
            let entry = session.get_entry(&self.path).await?;
            if entry.is_dir() {
                return Err(VfsError::not_found(&self.path));
            }
            return Ok(entry);
        }
        let name = self.name();
        session
            .list(path::remote(path::parent_dir(&self.path)))
            .await?
            .into_iter()
            .find(|entry| entry.name == name && !entry.is_dir())
            .ok_or_else(|| VfsError::not_found(&self.path))
    }

    /// Whether the file exists. Never fails for a missing file.
    pub async fn exists(&mut self) -> VfsResult<bool> {
        match self.stat().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn size(&mut self) -> VfsResult<u64> {
        Ok(self.stat().await?.size)
    }

    /// Modification time, if the server reports one.
    pub async fn last_modified(&mut self) -> VfsResult<Option<SystemTime>> {
        Ok(self.stat().await?.modified)
    }

    /// Create the file empty, or bump its modification time.
    pub async fn touch(&mut self) -> VfsResult<()> {
        if !self.exists().await? {
            self.write(&[]).await?;
            return self.close().await;
        }

        let session = self.single_op().await?;
        if session.is_set_time_supported() {
            return session.set_time(&self.path, SystemTime::now()).await;
        }

        // No MFMT: a rename round trip makes the server restamp the file.
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let temp = format!("{}.{nanos}", self.path);
        session.rename(&self.path, &temp).await?;
        session.rename(&temp, &self.path).await
    }

    pub async fn delete(&mut self) -> VfsResult<()> {
        let session = self.single_op().await?;
        session.delete(&self.path).await?;
        self.cursor = Cursor {
            offset: 0,
            reset: true,
        };
        Ok(())
    }

    // =========================================================================
    // Copy and move
    // =========================================================================

    /// Copy the whole file into `target`, then close both.
    ///
    /// The source is closed and rewound first, so a pending upload is
    /// finished and the copy starts at byte 0 wherever the cursor was.
    /// Files on the same server cannot stream into each other over one
    /// control connection, so the bytes are staged in a local temp file.
    #[tracing::instrument(skip_all, fields(from = %self.uri(), to = %target.uri()), name = "file.copy")]
    pub async fn copy_to_file(&mut self, target: &mut File) -> VfsResult<()> {
        self.close().await?;
        if self.authority.same_server(&target.authority) {
            self.copy_via_temp(target).await
        } else {
            self.copy_direct(target).await
        }
    }

    async fn copy_via_temp(&mut self, target: &mut File) -> VfsResult<()> {
        let temp = tempfile::NamedTempFile::new()?;
        let mut local = tokio::fs::File::from_std(temp.reopen()?);

        let copied = self.drain_into(&mut local).await;
        let closed = self.close().await;
        let copied = copied?;
        closed?;
        local.flush().await?;
        local.seek(SeekFrom::Start(0)).await?;
        debug!(bytes = copied, temp = %temp.path().display(), "staged copy locally");

        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0;
        loop {
            let n = local.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            target.write(&buf[..n]).await?;
            written += n;
        }
        if written == 0 {
            // An empty source still has to create the target.
            target.write(&[]).await?;
        }
        target.close().await?;

        drop(local);
        temp.close()?;
        Ok(())
    }

    async fn copy_direct(&mut self, target: &mut File) -> VfsResult<()> {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let streamed: VfsResult<()> = async {
            let mut written = 0;
            loop {
                let n = self.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                target.write(&buf[..n]).await?;
                written += n;
            }
            if written == 0 {
                target.write(&[]).await?;
            }
            target.close().await
        }
        .await;

        match streamed {
            Ok(()) => self.close().await,
            Err(e) => {
                if let Err(close_err) = self.close().await {
                    warn!("closing copy source: {close_err}");
                }
                Err(e)
            }
        }
    }

    async fn drain_into<W>(&mut self, out: &mut W) -> VfsResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut total = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(total);
            }
            out.write_all(&buf[..n]).await?;
            total += n as u64;
        }
    }

    /// Move to `target`: a rename on the same server, otherwise copy and
    /// delete.
    #[tracing::instrument(skip_all, fields(from = %self.uri(), to = %target.uri()), name = "file.move")]
    pub async fn move_to_file(&mut self, target: &mut File) -> VfsResult<()> {
        if !self.authority.same_server(&target.authority) {
            self.copy_to_file(target).await?;
            return self.delete().await;
        }

        self.close().await?;
        let session = self.single_op().await?;
        session.ensure_dir(path::parent_dir(&target.path)).await?;
        session.rename(&self.path, &target.path).await?;
        target.cursor = Cursor {
            offset: 0,
            reset: true,
        };
        Ok(())
    }

    /// Copy into a file of the same name in `location`.
    pub async fn copy_to_location(&mut self, location: &Location) -> VfsResult<File> {
        let mut target = location.new_file(self.name())?;
        self.copy_to_file(&mut target).await?;
        Ok(target)
    }

    /// Move into a file of the same name in `location`.
    pub async fn move_to_location(&mut self, location: &Location) -> VfsResult<File> {
        let mut target = location.new_file(self.name())?;
        self.move_to_file(&mut target).await?;
        Ok(target)
    }
}
