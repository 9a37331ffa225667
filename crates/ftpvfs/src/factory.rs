//! Reuse, replace or create the data connection a file operation needs.

use std::sync::Arc;

use tracing::debug;

use crate::authority::Authority;
use crate::client::{Client, Dialer};
use crate::data_conn::{DataConnection, Mode, ReadSession, SingleOpSession, WriteSession};
use crate::error::VfsResult;
use crate::options::FtpOptions;
use crate::path;

/// Per-file position state consulted when opening a data connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Byte offset the next session starts at.
    pub offset: u64,
    /// Force the next request to open a fresh data connection.
    pub reset: bool,
}

/// Client and data connection for one authority.
#[derive(Default)]
pub(crate) struct Slot {
    pub(crate) client: Option<Arc<dyn Client>>,
    pub(crate) conn: Option<DataConnection>,
}

impl Slot {
    /// Take and close the open connection, if any.
    pub(crate) async fn close_conn(&mut self) -> VfsResult<()> {
        match self.conn.take() {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

pub(crate) struct DataConnectionFactory<'a> {
    pub(crate) dialer: &'a dyn Dialer,
    pub(crate) options: &'a FtpOptions,
}

impl DataConnectionFactory<'_> {
    /// The cached client, dialing and logging in on first use.
    pub(crate) async fn client(
        &self,
        authority: &Authority,
        slot: &mut Slot,
    ) -> VfsResult<Arc<dyn Client>> {
        if let Some(client) = &slot.client {
            return Ok(client.clone());
        }
        let client = self.dialer.dial(authority, self.options).await?;
        slot.client = Some(client.clone());
        Ok(client)
    }

    /// Make `slot.conn` a `mode` connection for `path` at `cursor.offset`.
    ///
    /// An open connection is kept only if it has the same mode, serves the
    /// same file and the cursor does not demand a reset. Otherwise it is
    /// closed first and its error returned.
    pub(crate) async fn acquire(
        &self,
        authority: &Authority,
        slot: &mut Slot,
        path: &str,
        mode: Mode,
        cursor: &mut Cursor,
    ) -> VfsResult<()> {
        if let Some(conn) = &slot.conn {
            let foreign = conn.path().is_some_and(|p| p != path);
            if conn.mode() != mode || foreign || cursor.reset {
                debug!(
                    from = %conn.mode(),
                    to = %mode,
                    path,
                    reset = cursor.reset,
                    "replacing data connection"
                );
                slot.close_conn().await?;
            }
        }

        if slot.conn.is_none() {
            let client = self.client(authority, slot).await?;
            let conn = match mode {
                Mode::Read => {
                    DataConnection::Read(ReadSession::open(client.as_ref(), path, cursor.offset).await?)
                }
                Mode::Write => {
                    ensure_dir(client.as_ref(), path::parent_dir(path)).await?;
                    DataConnection::Write(WriteSession::start(client, path, cursor.offset))
                }
                Mode::SingleOp => DataConnection::SingleOp(SingleOpSession::new(client)),
            };
            slot.conn = Some(conn);
        }

        cursor.reset = false;
        Ok(())
    }
}

/// Whether `dir` exists, judged from its parent's listing.
pub(crate) async fn dir_exists(client: &dyn Client, dir: &str) -> VfsResult<bool> {
    if path::remote(dir) == "/" {
        return Ok(true);
    }
    let name = path::base_name(dir);
    match client.list(path::remote(path::parent_dir(dir))).await {
        Ok(entries) => Ok(entries.iter().any(|e| e.is_dir() && e.name == name)),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create `dir` and any missing ancestors, top down.
pub(crate) async fn ensure_dir(client: &dyn Client, dir: &str) -> VfsResult<()> {
    if dir_exists(client, dir).await? {
        return Ok(());
    }

    let mut missing = vec![path::remote(dir).to_owned()];
    let mut current = path::parent_dir(dir);
    while !dir_exists(client, current).await? {
        missing.push(path::remote(current).to_owned());
        current = path::parent_dir(current);
    }

    for dir in missing.iter().rev() {
        debug!(dir, "creating missing directory");
        client.make_dir(dir).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockDialer};

    fn authority() -> Authority {
        Authority::new("ftp.test")
    }

    async fn acquire(
        dialer: &MockDialer,
        slot: &mut Slot,
        path: &str,
        mode: Mode,
        cursor: &mut Cursor,
    ) -> VfsResult<()> {
        let options = FtpOptions::default();
        let factory = DataConnectionFactory {
            dialer,
            options: &options,
        };
        factory.acquire(&authority(), slot, path, mode, cursor).await
    }

    #[tokio::test]
    async fn test_client_is_dialed_once() {
        let client = MockClient::new();
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a", Mode::SingleOp, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/b", Mode::SingleOp, &mut cursor).await.unwrap();
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn test_same_mode_is_reused() {
        let client = MockClient::new();
        client.put("/a", b"abc");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        assert_eq!(client.count("retr /a 0"), 1);
    }

    #[tokio::test]
    async fn test_mode_switch_closes_previous_exactly_once() {
        let client = MockClient::new();
        client.put("/a", b"abc");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/a", Mode::SingleOp, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/a", Mode::Write, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();

        let calls = client.calls();
        let finish = calls.iter().position(|c| c == "finish /a").unwrap();
        let stor = calls.iter().position(|c| c.starts_with("stor /a")).unwrap();
        let stored = calls.iter().position(|c| c.starts_with("stored /a")).unwrap();
        let second_retr = calls.iter().rposition(|c| c == "retr /a 0").unwrap();
        assert!(finish < stor);
        assert!(stored < second_retr);
        assert_eq!(client.count("finish /a"), 1);
        assert_eq!(client.count("stored /a 0"), 1);
    }

    #[tokio::test]
    async fn test_reset_forces_new_session_and_is_cleared() {
        let client = MockClient::new();
        client.put("/a", b"abcdef");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        cursor = Cursor {
            offset: 3,
            reset: true,
        };
        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        assert!(!cursor.reset);
        assert_eq!(client.count("retr /a 3"), 1);
        assert_eq!(client.count("finish /a"), 1);
    }

    #[tokio::test]
    async fn test_other_files_session_is_replaced() {
        let client = MockClient::new();
        client.put("/a", b"a");
        client.put("/b", b"b");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a", Mode::Read, &mut cursor).await.unwrap();
        acquire(&dialer, &mut slot, "/b", Mode::Read, &mut cursor).await.unwrap();
        assert_eq!(slot.conn.as_ref().and_then(|c| c.path()), Some("/b"));
        assert_eq!(client.count("finish /a"), 1);
    }

    #[tokio::test]
    async fn test_read_of_missing_file_fails_synchronously() {
        let client = MockClient::new();
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        let err = acquire(&dialer, &mut slot, "/missing", Mode::Read, &mut cursor)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(slot.conn.is_none());
    }

    #[tokio::test]
    async fn test_write_creates_missing_parents() {
        let client = MockClient::new();
        client.mkdir("/a");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a/b/c/file.txt", Mode::Write, &mut cursor)
            .await
            .unwrap();
        slot.close_conn().await.unwrap();

        let mkdirs: Vec<_> = client
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("mkdir"))
            .collect();
        assert_eq!(mkdirs, vec!["mkdir /a/b", "mkdir /a/b/c"]);
        assert!(client.get("/a/b/c/file.txt").is_some());
    }

    #[tokio::test]
    async fn test_write_in_existing_dir_makes_no_dirs() {
        let client = MockClient::new();
        client.mkdir("/a");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/a/file.txt", Mode::Write, &mut cursor)
            .await
            .unwrap();
        slot.close_conn().await.unwrap();
        assert_eq!(client.count_prefix("mkdir"), 0);
    }

    #[tokio::test]
    async fn test_close_error_propagates_on_mode_switch() {
        let client = MockClient::new();
        client.fail_stor("552 quota exceeded");
        let dialer = MockDialer::new(client.clone());
        let mut slot = Slot::default();
        let mut cursor = Cursor::default();

        acquire(&dialer, &mut slot, "/f", Mode::Write, &mut cursor).await.unwrap();
        let err = acquire(&dialer, &mut slot, "/f", Mode::SingleOp, &mut cursor)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("552"));
        assert!(slot.conn.is_none());
    }
}
