//! An in-memory FTP server for tests.
//!
//! Listens on `127.0.0.1` with an ephemeral port, accepts any login and
//! serves files from a shared map. Every command line received is logged
//! so tests can assert on the wire conversation.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::entry::{format_timeval, parse_timeval};

/// Toggles for the extensions the server advertises.
#[derive(Debug, Clone)]
pub struct FakeServerOptions {
    pub mlst: bool,
    pub mfmt: bool,
    pub epsv: bool,
    /// Reject every upload with `552` after draining the data connection.
    pub fail_stor: bool,
}

impl Default for FakeServerOptions {
    fn default() -> Self {
        Self {
            mlst: true,
            mfmt: true,
            epsv: true,
            fail_stor: false,
        }
    }
}

struct FakeFile {
    data: Vec<u8>,
    modified: SystemTime,
}

#[derive(Default)]
struct State {
    files: BTreeMap<String, FakeFile>,
    dirs: BTreeSet<String>,
    commands: Vec<String>,
    logins: usize,
}

impl State {
    fn add_parents(&mut self, path: &str) {
        let mut dir = parent(path);
        while dir != "/" && self.dirs.insert(dir.to_owned()) {
            dir = parent(dir);
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        path == "/" || self.dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Vec<(String, Option<&FakeFile>)> {
        let dirs = self
            .dirs
            .iter()
            .filter(|d| parent(d) == dir)
            .map(|d| (name(d).to_owned(), None));
        let files = self
            .files
            .iter()
            .filter(|(f, _)| parent(f) == dir)
            .map(|(f, file)| (name(f).to_owned(), Some(file)));
        dirs.chain(files).collect()
    }
}

/// Handle to a running fake server. The server stops when dropped.
pub struct FakeServer {
    port: u16,
    state: Arc<Mutex<State>>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> io::Result<Self> {
        Self::start_with(FakeServerOptions::default()).await
    }

    pub async fn start_with(options: FakeServerOptions) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let state = Arc::new(Mutex::new(State::default()));

        let task = {
            let state = state.clone();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let state = state.clone();
                    let options = options.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(socket, state, options).await {
                            tracing::debug!("fake server session ended: {e}");
                        }
                    });
                }
            })
        };

        Ok(Self { port, state, task })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store a file, creating its parent directories.
    pub fn put(&self, path: &str, data: &[u8]) {
        let mut state = self.state();
        state.add_parents(path);
        state.files.insert(
            path.to_owned(),
            FakeFile {
                data: data.to_vec(),
                modified: SystemTime::now(),
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(path).map(|f| f.data.clone())
    }

    pub fn mkdir(&self, path: &str) {
        let mut state = self.state();
        state.add_parents(path);
        state.dirs.insert(path.to_owned());
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state().is_dir(path)
    }

    pub fn modified(&self, path: &str) -> Option<SystemTime> {
        self.state().files.get(path).map(|f| f.modified)
    }

    pub fn set_modified(&self, path: &str, time: SystemTime) {
        if let Some(file) = self.state().files.get_mut(path) {
            file.modified = time;
        }
    }

    /// Every command line received so far, across all sessions.
    pub fn commands(&self) -> Vec<String> {
        self.state().commands.clone()
    }

    /// Number of successful logins so far.
    pub fn logins(&self) -> usize {
        self.state().logins
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) | None => "/",
        Some((dir, _)) => dir,
    }
}

fn name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

async fn send(out: &mut OwnedWriteHalf, line: &str) -> io::Result<()> {
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\r\n").await
}

async fn accept(passive: &mut Option<TcpListener>) -> io::Result<TcpStream> {
    let listener = passive
        .take()
        .ok_or_else(|| io::Error::other("no passive listener"))?;
    let (socket, _) = listener.accept().await?;
    Ok(socket)
}

async fn serve(
    socket: TcpStream,
    state: Arc<Mutex<State>>,
    options: FakeServerOptions,
) -> io::Result<()> {
    let lock = || state.lock().unwrap_or_else(|e| e.into_inner());
    let (read, mut out) = socket.into_split();
    let mut lines = BufReader::new(read).lines();
    send(&mut out, "220 fake ftp ready").await?;

    let mut passive: Option<TcpListener> = None;
    let mut rest: u64 = 0;
    let mut rename_from: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        let (cmd, arg) = match line.split_once(' ') {
            Some((cmd, arg)) => (cmd.to_ascii_uppercase(), arg.to_owned()),
            None => (line.to_ascii_uppercase(), String::new()),
        };
        lock().commands.push(line.clone());

        let reply = match cmd.as_str() {
            "USER" => "331 password required".to_owned(),
            "PASS" => {
                lock().logins += 1;
                "230 logged in".to_owned()
            }
            "TYPE" | "PBSZ" | "PROT" => "200 ok".to_owned(),
            "FEAT" => {
                let mut feat = vec!["211-Features:".to_owned()];
                if options.mlst {
                    feat.push(" MLST type*;size*;modify*;".to_owned());
                }
                if options.mfmt {
                    feat.push(" MFMT".to_owned());
                }
                if options.epsv {
                    feat.push(" EPSV".to_owned());
                }
                feat.push(" REST STREAM".to_owned());
                feat.push("211 End".to_owned());
                feat.join("\r\n")
            }
            "EPSV" if options.epsv => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                format!("229 Entering Extended Passive Mode (|||{port}|)")
            }
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let port = listener.local_addr()?.port();
                passive = Some(listener);
                format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    port >> 8,
                    port & 0xff
                )
            }
            "REST" => match arg.parse() {
                Ok(offset) => {
                    rest = offset;
                    format!("350 restarting at {offset}")
                }
                Err(_) => "501 bad offset".to_owned(),
            },
            "RETR" => {
                let offset = std::mem::take(&mut rest);
                let data = lock().files.get(&arg).map(|f| f.data.clone());
                match data {
                    None => "550 no such file".to_owned(),
                    Some(data) => {
                        send(&mut out, "150 opening data connection").await?;
                        let mut socket = accept(&mut passive).await?;
                        let start = (offset as usize).min(data.len());
                        // The client may hang up early; that is its business.
                        let _ = socket.write_all(&data[start..]).await;
                        let _ = socket.shutdown().await;
                        "226 transfer complete".to_owned()
                    }
                }
            }
            "STOR" => {
                let offset = std::mem::take(&mut rest);
                if !lock().is_dir(parent(&arg)) {
                    "553 no such directory".to_owned()
                } else {
                    send(&mut out, "150 ok to send data").await?;
                    let mut socket = accept(&mut passive).await?;
                    let mut received = Vec::new();
                    socket.read_to_end(&mut received).await?;
                    if options.fail_stor {
                        "552 exceeded storage allocation".to_owned()
                    } else {
                        let mut state = lock();
                        let mut data = state
                            .files
                            .remove(&arg)
                            .map(|f| f.data)
                            .unwrap_or_default();
                        data.truncate(offset as usize);
                        data.resize(offset as usize, 0);
                        data.extend_from_slice(&received);
                        state.files.insert(
                            arg.clone(),
                            FakeFile {
                                data,
                                modified: SystemTime::now(),
                            },
                        );
                        "226 transfer complete".to_owned()
                    }
                }
            }
            "DELE" => match lock().files.remove(&arg) {
                Some(_) => "250 deleted".to_owned(),
                None => "550 no such file".to_owned(),
            },
            "MKD" => {
                let mut state = lock();
                if state.is_dir(&arg) || state.files.contains_key(&arg) {
                    "550 already exists".to_owned()
                } else if !state.is_dir(parent(&arg)) {
                    "550 no such parent".to_owned()
                } else {
                    state.dirs.insert(arg.clone());
                    format!("257 \"{arg}\" created")
                }
            }
            "RNFR" => {
                let state = lock();
                if state.files.contains_key(&arg) || state.dirs.contains(&arg) {
                    rename_from = Some(arg.clone());
                    "350 ready for destination".to_owned()
                } else {
                    "550 no such file".to_owned()
                }
            }
            "RNTO" => match rename_from.take() {
                None => "503 RNFR first".to_owned(),
                Some(from) => {
                    let mut state = lock();
                    if !state.is_dir(parent(&arg)) {
                        "553 no such directory".to_owned()
                    } else if let Some(file) = state.files.remove(&from) {
                        state.files.insert(arg.clone(), file);
                        "250 renamed".to_owned()
                    } else if state.dirs.remove(&from) {
                        state.dirs.insert(arg.clone());
                        "250 renamed".to_owned()
                    } else {
                        "550 no such file".to_owned()
                    }
                }
            },
            "MLST" if options.mlst => {
                let state = lock();
                let facts = match state.files.get(&arg) {
                    Some(file) => Some(file_facts(file)),
                    None if state.is_dir(&arg) => Some(dir_facts()),
                    None => None,
                };
                match facts {
                    Some(facts) => format!("250-Listing {arg}\r\n {facts} {arg}\r\n250 End"),
                    None => "550 no such file".to_owned(),
                }
            }
            "MLSD" if options.mlst => {
                let listing = {
                    let state = lock();
                    state.is_dir(&arg).then(|| {
                        let mut rows = vec!["type=cdir; .".to_owned()];
                        for (name, file) in state.children(&arg) {
                            let facts = file.map(file_facts).unwrap_or_else(dir_facts);
                            rows.push(format!("{facts} {name}"));
                        }
                        rows
                    })
                };
                match listing {
                    None => "550 no such directory".to_owned(),
                    Some(listing) => transfer_lines(&mut out, &mut passive, &listing).await?,
                }
            }
            "LIST" => {
                let listing = {
                    let state = lock();
                    if let Some(file) = state.files.get(&arg) {
                        Some(vec![list_line(name(&arg), Some(file))])
                    } else if state.is_dir(&arg) {
                        Some(
                            state
                                .children(&arg)
                                .into_iter()
                                .map(|(name, file)| list_line(&name, file))
                                .collect(),
                        )
                    } else {
                        None
                    }
                };
                match listing {
                    None => "550 no such directory".to_owned(),
                    Some(listing) => transfer_lines(&mut out, &mut passive, &listing).await?,
                }
            }
            "MFMT" if options.mfmt => {
                let parsed = arg
                    .split_once(' ')
                    .and_then(|(ts, path)| Some((parse_timeval(ts)?, path.to_owned())));
                match parsed {
                    None => "501 bad arguments".to_owned(),
                    Some((time, path)) => match lock().files.get_mut(&path) {
                        Some(file) => {
                            file.modified = time;
                            format!("213 Modify={}; {path}", format_timeval(time))
                        }
                        None => "550 no such file".to_owned(),
                    },
                }
            }
            "QUIT" => {
                send(&mut out, "221 bye").await?;
                return Ok(());
            }
            _ => "502 command not implemented".to_owned(),
        };
        send(&mut out, &reply).await?;
    }
    Ok(())
}

async fn transfer_lines(
    out: &mut OwnedWriteHalf,
    passive: &mut Option<TcpListener>,
    lines: &[String],
) -> io::Result<String> {
    send(out, "150 here comes the listing").await?;
    let mut socket = accept(passive).await?;
    for line in lines {
        socket.write_all(line.as_bytes()).await?;
        socket.write_all(b"\r\n").await?;
    }
    socket.shutdown().await?;
    Ok("226 listing sent".to_owned())
}

fn file_facts(file: &FakeFile) -> String {
    format!(
        "type=file;size={};modify={};",
        file.data.len(),
        format_timeval(file.modified)
    )
}

fn dir_facts() -> String {
    format!("type=dir;modify={};", format_timeval(UNIX_EPOCH))
}

fn list_line(name: &str, file: Option<&FakeFile>) -> String {
    let (perms, size, modified) = match file {
        Some(file) => ("-rw-r--r--", file.data.len(), file.modified),
        None => ("drwxr-xr-x", 4096, UNIX_EPOCH),
    };
    let date = DateTime::<Utc>::from(modified).format("%b %d  %Y");
    format!("{perms} 1 ftp ftp {size:>12} {date} {name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_and_name() {
        assert_eq!(parent("/a/b.txt"), "/a");
        assert_eq!(parent("/b.txt"), "/");
        assert_eq!(parent("/a/b/"), "/a");
        assert_eq!(name("/a/b.txt"), "b.txt");
    }

    #[test]
    fn test_list_line_parses_back() {
        let file = FakeFile {
            data: vec![0; 42],
            modified: UNIX_EPOCH,
        };
        let entry = crate::entry::parse_list(&list_line("x y.bin", Some(&file))).unwrap();
        assert_eq!(entry.name, "x y.bin");
        assert_eq!(entry.size, 42);
    }

    #[tokio::test]
    async fn test_put_creates_parents() {
        let server = FakeServer::start().await.unwrap();
        server.put("/a/b/c.txt", b"c");
        assert!(server.is_dir("/a"));
        assert!(server.is_dir("/a/b"));
        assert_eq!(server.get("/a/b/c.txt").unwrap(), b"c");
    }
}
