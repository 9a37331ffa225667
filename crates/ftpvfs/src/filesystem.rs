//! The composition root: clients and data connections per authority.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::authority::{Authority, SCHEME};
use crate::client::{Client, Dialer};
use crate::data_conn::{DataConnection, Mode, SingleOpSession};
use crate::error::{VfsError, VfsResult};
use crate::factory::{Cursor, DataConnectionFactory, Slot};
use crate::file::File;
use crate::ftp::FtpDialer;
use crate::location::Location;
use crate::options::FtpOptions;
use crate::path;

/// Human-readable name of the backend.
pub const NAME: &str = "File Transfer Protocol";

struct FsState {
    dialer: Arc<dyn Dialer>,
    options: FtpOptions,
    slots: HashMap<Authority, Slot>,
}

/// An FTP filesystem.
///
/// Holds at most one client and one [`DataConnection`] per authority.
/// Cloning is cheap and yields a handle to the same state, which is how
/// [`File`] and [`Location`] values refer back to it. Files sharing a
/// filesystem share its data connection: reading one file and then
/// writing another closes the read first.
#[derive(Clone)]
pub struct FileSystem {
    inner: Arc<Mutex<FsState>>,
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem").finish_non_exhaustive()
    }
}

impl Default for FileSystem {
    fn default() -> Self {
        Self::new(FtpOptions::default())
    }
}

impl FileSystem {
    /// A filesystem dialing real servers.
    pub fn new(options: FtpOptions) -> Self {
        Self::with_dialer(options, Arc::new(FtpDialer))
    }

    /// A filesystem whose clients come from `dialer`.
    pub fn with_dialer(options: FtpOptions, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FsState {
                dialer,
                options,
                slots: HashMap::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        NAME
    }

    pub fn scheme(&self) -> &'static str {
        SCHEME
    }

    pub async fn options(&self) -> FtpOptions {
        self.inner.lock().await.options.clone()
    }

    /// Replace the options. Open data connections are closed and clients
    /// discarded so the next operation dials with the new settings.
    ///
    /// The options are replaced even if closing fails; the first close
    /// error is returned.
    #[tracing::instrument(skip_all, name = "fs.set_options")]
    pub async fn set_options(&self, options: FtpOptions) -> VfsResult<()> {
        let mut state = self.inner.lock().await;
        let result = shutdown_slots(&mut state.slots).await;
        state.options = options;
        result
    }

    /// Close every data connection and log every client out.
    #[tracing::instrument(skip_all, name = "fs.shutdown")]
    pub async fn shutdown(&self) -> VfsResult<()> {
        let mut state = self.inner.lock().await;
        shutdown_slots(&mut state.slots).await
    }

    /// Handle for the file at absolute `path` (must not end in `/`).
    pub fn new_file(&self, authority: &Authority, path: &str) -> VfsResult<File> {
        let path = path::validate_file_path(path)?;
        Ok(File::new(self.clone(), authority.clone(), path))
    }

    /// Handle for the directory at absolute `path` (must end in `/`).
    pub fn new_location(&self, authority: &Authority, path: &str) -> VfsResult<Location> {
        let path = path::validate_dir_path(path)?;
        Ok(Location::new(self.clone(), authority.clone(), path))
    }

    /// The logged-in client for `authority`, dialing on first use.
    pub async fn client(&self, authority: &Authority) -> VfsResult<Arc<dyn Client>> {
        let mut state = self.inner.lock().await;
        let FsState {
            dialer,
            options,
            slots,
        } = &mut *state;
        let factory = DataConnectionFactory {
            dialer: dialer.as_ref(),
            options,
        };
        factory
            .client(authority, slots.entry(authority.clone()).or_default())
            .await
    }

    /// The data connection for `path` in `mode` at `cursor.offset`.
    ///
    /// Reuses the open connection when it fits, otherwise closes it and
    /// opens a new one. The filesystem stays locked while the returned
    /// guard lives.
    #[tracing::instrument(skip(self, authority, cursor), fields(%authority), level = "debug", name = "fs.data_conn")]
    pub async fn data_conn(
        &self,
        authority: &Authority,
        path: &str,
        mode: Mode,
        cursor: &mut Cursor,
    ) -> VfsResult<MappedMutexGuard<'_, DataConnection>> {
        let mut state = self.inner.lock().await;
        {
            let FsState {
                dialer,
                options,
                slots,
            } = &mut *state;
            let factory = DataConnectionFactory {
                dialer: dialer.as_ref(),
                options,
            };
            let slot = slots.entry(authority.clone()).or_default();
            factory.acquire(authority, slot, path, mode, cursor).await?;
        }
        MutexGuard::try_map(state, |s| {
            s.slots.get_mut(authority).and_then(|slot| slot.conn.as_mut())
        })
        .map_err(|_| VfsError::SessionClosed)
    }

    /// A single-op session, released from the filesystem lock.
    pub(crate) async fn single_op(
        &self,
        authority: &Authority,
        path: &str,
        cursor: &mut Cursor,
    ) -> VfsResult<SingleOpSession> {
        let conn = self.data_conn(authority, path, Mode::SingleOp, cursor).await?;
        conn.as_single_op().cloned()
    }

    /// Mode of the connection `path` would reuse: its own stream session,
    /// or a single-op session.
    pub(crate) async fn owned_mode(&self, authority: &Authority, path: &str) -> Option<Mode> {
        let state = self.inner.lock().await;
        let conn = state.slots.get(authority)?.conn.as_ref()?;
        owns(conn, path).then(|| conn.mode())
    }

    /// Close the connection if `path` owns it. Another file's stream
    /// session is left alone.
    pub(crate) async fn close_owned(&self, authority: &Authority, path: &str) -> VfsResult<()> {
        let mut state = self.inner.lock().await;
        let Some(slot) = state.slots.get_mut(authority) else {
            return Ok(());
        };
        match &slot.conn {
            Some(conn) if owns(conn, path) => {
                debug!(path, mode = %conn.mode(), "closing data connection");
                slot.close_conn().await
            }
            _ => Ok(()),
        }
    }
}

fn owns(conn: &DataConnection, path: &str) -> bool {
    conn.path().is_none_or(|p| p == path)
}

async fn shutdown_slots(slots: &mut HashMap<Authority, Slot>) -> VfsResult<()> {
    let mut first_error = None;
    for (authority, mut slot) in slots.drain() {
        if let Err(e) = slot.close_conn().await {
            warn!(%authority, "closing data connection: {e}");
            first_error.get_or_insert(e);
        }
        if let Some(client) = slot.client.take() {
            if let Err(e) = client.quit().await {
                warn!(%authority, "logging out: {e}");
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}
