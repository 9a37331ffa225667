//! Directories on an FTP server.

use regex::Regex;

use crate::authority::Authority;
use crate::data_conn::SingleOpSession;
use crate::error::{VfsError, VfsResult};
use crate::factory::Cursor;
use crate::file::File;
use crate::filesystem::FileSystem;
use crate::path;

/// A directory on one authority. The path always ends in `/`.
#[derive(Debug, Clone)]
pub struct Location {
    fs: FileSystem,
    authority: Authority,
    path: String,
}

impl Location {
    pub(crate) fn new(fs: FileSystem, authority: Authority, path: String) -> Self {
        Self {
            fs,
            authority,
            path,
        }
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

    async fn single_op(&self) -> VfsResult<SingleOpSession> {
        // Directory operations carry no offset of their own.
        let mut cursor = Cursor::default();
        self.fs
            .single_op(&self.authority, &self.path, &mut cursor)
            .await
    }

    /// Names of the files directly in this directory. A missing
    /// directory lists as empty.
    #[tracing::instrument(skip(self), fields(path = %self.path), name = "location.list")]
    pub async fn list(&self) -> VfsResult<Vec<String>> {
        let session = self.single_op().await?;
        match session.list(path::remote(&self.path)).await {
            Ok(entries) => Ok(entries
                .into_iter()
                .filter(|e| !e.is_dir())
                .map(|e| e.name)
                .collect()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// File names starting with `prefix`.
    pub async fn list_by_prefix(&self, prefix: &str) -> VfsResult<Vec<String>> {
        if prefix.contains('/') {
            return Err(VfsError::invalid_path(format!(
                "prefix may not contain a slash: {prefix}"
            )));
        }
        let mut names = self.list().await?;
        names.retain(|name| name.starts_with(prefix));
        Ok(names)
    }

    /// File names matching `pattern`.
    pub async fn list_by_regex(&self, pattern: &Regex) -> VfsResult<Vec<String>> {
        let mut names = self.list().await?;
        names.retain(|name| pattern.is_match(name));
        Ok(names)
    }

    /// Whether the directory exists. The root always does.
    pub async fn exists(&self) -> VfsResult<bool> {
        if self.path == "/" {
            return Ok(true);
        }
        self.single_op().await?.dir_exists(&self.path).await
    }

    /// Handle for the file `name` relative to this directory.
    pub fn new_file(&self, name: &str) -> VfsResult<File> {
        self.fs
            .new_file(&self.authority, &path::join(&self.path, name))
    }

    /// Handle for the directory `relative` to this one.
    pub fn new_location(&self, relative: &str) -> VfsResult<Location> {
        let joined = path::join(&self.path, relative);
        let joined = if joined.ends_with('/') {
            joined
        } else {
            format!("{joined}/")
        };
        self.fs.new_location(&self.authority, &joined)
    }

    /// Delete the file `name` in this directory.
    pub async fn delete_file(&self, name: &str) -> VfsResult<()> {
        self.new_file(name)?.delete().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockDialer};
    use std::sync::Arc;

    fn setup() -> (Arc<MockClient>, FileSystem, Authority) {
        let client = MockClient::new();
        client.put("/logs/app.log", b"1");
        client.put("/logs/app.log.1", b"2");
        client.put("/logs/db.log", b"3");
        client.put("/logs/archive/old.log", b"4");
        let fs = FileSystem::with_dialer(Default::default(), Arc::new(MockDialer::new(client.clone())));
        (client, fs, Authority::new("ftp.test"))
    }

    #[tokio::test]
    async fn test_list_excludes_directories() {
        let (_, fs, authority) = setup();
        let logs = fs.new_location(&authority, "/logs/").unwrap();
        let mut names = logs.list().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["app.log", "app.log.1", "db.log"]);
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let (_, fs, authority) = setup();
        let missing = fs.new_location(&authority, "/nope/").unwrap();
        assert!(missing.list().await.unwrap().is_empty());
        assert!(!missing.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_list_by_prefix_and_regex() {
        let (_, fs, authority) = setup();
        let logs = fs.new_location(&authority, "/logs/").unwrap();

        let mut app = logs.list_by_prefix("app").await.unwrap();
        app.sort();
        assert_eq!(app, vec!["app.log", "app.log.1"]);
        assert!(logs.list_by_prefix("a/b").await.is_err());

        let re = Regex::new(r"\.log$").unwrap();
        let mut logs_only = logs.list_by_regex(&re).await.unwrap();
        logs_only.sort();
        assert_eq!(logs_only, vec!["app.log", "db.log"]);
    }

    #[tokio::test]
    async fn test_exists() {
        let (_, fs, authority) = setup();
        assert!(fs.new_location(&authority, "/").unwrap().exists().await.unwrap());
        assert!(fs.new_location(&authority, "/logs/").unwrap().exists().await.unwrap());
        assert!(
            fs.new_location(&authority, "/logs/archive/")
                .unwrap()
                .exists()
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_new_file_and_location() {
        let (_, fs, authority) = setup();
        let logs = fs.new_location(&authority, "/logs/").unwrap();
        assert_eq!(logs.new_file("db.log").unwrap().path(), "/logs/db.log");
        assert_eq!(logs.new_location("archive").unwrap().path(), "/logs/archive/");
        assert_eq!(logs.new_location("../other/").unwrap().path(), "/other/");
        assert!(logs.new_location("../../escape/").is_err());
        assert_eq!(logs.uri(), "ftp://ftp.test/logs/");
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (client, fs, authority) = setup();
        let logs = fs.new_location(&authority, "/logs/").unwrap();
        logs.delete_file("db.log").await.unwrap();
        assert!(client.get("/logs/db.log").is_none());
        assert!(logs.delete_file("db.log").await.unwrap_err().is_not_found());
    }
}
