//! In-memory [`Client`] and [`Dialer`] that record every call.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use ftpvfs_proto::{Entry, FtpError};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::authority::Authority;
use crate::client::{ByteReader, Client, Dialer, RetrieveStream};
use crate::error::{VfsError, VfsResult};
use crate::options::FtpOptions;
use crate::path;

type CallLog = Arc<Mutex<Vec<String>>>;

enum StorFailure {
    /// Drain the upload, then fail.
    AfterData(String),
    /// Fail without reading anything.
    Immediately(String),
}

struct State {
    files: BTreeMap<String, (Vec<u8>, SystemTime)>,
    dirs: BTreeSet<String>,
    precise_list: bool,
    set_time_supported: bool,
    stor_failure: Option<StorFailure>,
}

pub(crate) struct MockClient {
    state: Mutex<State>,
    calls: CallLog,
}

/// `"550 gone"` as the error a server reply would produce.
fn reply_error(reply: &str) -> VfsError {
    let (code, text) = reply.split_once(' ').unwrap_or((reply, ""));
    VfsError::Ftp(FtpError::UnexpectedReply {
        code: code.parse().unwrap_or(550),
        text: text.to_owned(),
    })
}

fn unavailable() -> VfsError {
    reply_error("550 file unavailable")
}

fn parent(p: &str) -> &str {
    path::remote(path::parent_dir(p))
}

impl MockClient {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                files: BTreeMap::new(),
                dirs: BTreeSet::new(),
                precise_list: false,
                set_time_supported: true,
                stor_failure: None,
            }),
            calls: CallLog::default(),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn is_dir(state: &State, p: &str) -> bool {
        p == "/" || state.dirs.contains(p)
    }

    pub(crate) fn put(&self, p: &str, data: &[u8]) {
        let mut state = self.state();
        let mut dir = parent(p).to_owned();
        while dir != "/" && state.dirs.insert(dir.clone()) {
            dir = parent(&dir).to_owned();
        }
        state
            .files
            .insert(p.to_owned(), (data.to_vec(), SystemTime::now()));
    }

    pub(crate) fn get(&self, p: &str) -> Option<Vec<u8>> {
        self.state().files.get(p).map(|(data, _)| data.clone())
    }

    pub(crate) fn mkdir(&self, p: &str) {
        let p = path::remote(p);
        self.put_dir(p);
    }

    fn put_dir(&self, p: &str) {
        let mut state = self.state();
        let mut dir = p.to_owned();
        while dir != "/" && state.dirs.insert(dir.clone()) {
            dir = parent(&dir).to_owned();
        }
    }

    pub(crate) fn modified(&self, p: &str) -> Option<SystemTime> {
        self.state().files.get(p).map(|(_, m)| *m)
    }

    pub(crate) fn set_modified(&self, p: &str, time: SystemTime) {
        if let Some(file) = self.state().files.get_mut(p) {
            file.1 = time;
        }
    }

    pub(crate) fn set_precise_list(&self, precise: bool) {
        self.state().precise_list = precise;
    }

    pub(crate) fn set_time_supported(&self, supported: bool) {
        self.state().set_time_supported = supported;
    }

    /// Accept the upload data, then fail with `reply`.
    pub(crate) fn fail_stor(&self, reply: &str) {
        self.state().stor_failure = Some(StorFailure::AfterData(reply.to_owned()));
    }

    /// Fail uploads with `reply` before reading any data.
    pub(crate) fn reject_stor(&self, reply: &str) {
        self.state().stor_failure = Some(StorFailure::Immediately(reply.to_owned()));
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub(crate) fn count_prefix(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn entry(state: &State, p: &str) -> Option<Entry> {
        if let Some((data, modified)) = state.files.get(p) {
            return Some(Entry::file(path::base_name(p), data.len() as u64).with_modified(*modified));
        }
        (p != "/" && state.dirs.contains(p)).then(|| Entry::dir(path::base_name(p)))
    }
}

#[async_trait]
impl Client for MockClient {
    async fn delete(&self, p: &str) -> VfsResult<()> {
        self.log(format!("delete {p}"));
        match self.state().files.remove(p) {
            Some(_) => Ok(()),
            None => Err(unavailable()),
        }
    }

    async fn get_entry(&self, p: &str) -> VfsResult<Entry> {
        self.log(format!("entry {p}"));
        Self::entry(&self.state(), p).ok_or_else(unavailable)
    }

    async fn list(&self, p: &str) -> VfsResult<Vec<Entry>> {
        self.log(format!("list {p}"));
        let state = self.state();
        if !Self::is_dir(&state, p) {
            return Self::entry(&state, p).map(|e| vec![e]).ok_or_else(unavailable);
        }
        let children = state
            .dirs
            .iter()
            .chain(state.files.keys())
            .filter(|child| child.as_str() != "/" && parent(child) == p)
            .filter_map(|child| Self::entry(&state, child))
            .collect();
        Ok(children)
    }

    async fn make_dir(&self, p: &str) -> VfsResult<()> {
        self.log(format!("mkdir {p}"));
        let mut state = self.state();
        if Self::is_dir(&state, p) || !Self::is_dir(&state, parent(p)) {
            return Err(unavailable());
        }
        state.dirs.insert(p.to_owned());
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        self.log(format!("rename {from} {to}"));
        let mut state = self.state();
        if !Self::is_dir(&state, parent(to)) {
            return Err(reply_error("553 no such directory"));
        }
        match state.files.remove(from) {
            Some(file) => {
                state.files.insert(to.to_owned(), file);
                Ok(())
            }
            None => Err(unavailable()),
        }
    }

    async fn retr_from(&self, p: &str, offset: u64) -> VfsResult<Box<dyn RetrieveStream>> {
        self.log(format!("retr {p} {offset}"));
        let data = self.get(p).ok_or_else(unavailable)?;
        let start = (offset as usize).min(data.len());
        Ok(Box::new(MockRetrieve {
            path: p.to_owned(),
            data: io::Cursor::new(data[start..].to_vec()),
            calls: self.calls.clone(),
            finished: false,
        }))
    }

    async fn stor_from(&self, p: &str, offset: u64, mut reader: ByteReader) -> VfsResult<()> {
        self.log(format!("stor {p} {offset}"));
        if !Self::is_dir(&self.state(), parent(p)) {
            return Err(reply_error("553 no such directory"));
        }
        let failure = match &self.state().stor_failure {
            Some(StorFailure::Immediately(reply)) => return Err(reply_error(reply)),
            Some(StorFailure::AfterData(reply)) => Some(reply.clone()),
            None => None,
        };

        let mut received = Vec::new();
        reader.read_to_end(&mut received).await?;
        drop(reader);

        if let Some(reply) = failure {
            self.log(format!("stor-failed {p} {offset}"));
            return Err(reply_error(&reply));
        }

        let mut state = self.state();
        let mut data = state.files.remove(p).map(|(d, _)| d).unwrap_or_default();
        data.truncate(offset as usize);
        data.resize(offset as usize, 0);
        data.extend_from_slice(&received);
        state.files.insert(p.to_owned(), (data, SystemTime::now()));
        drop(state);

        self.log(format!("stored {p} {offset}"));
        Ok(())
    }

    fn is_set_time_supported(&self) -> bool {
        self.state().set_time_supported
    }

    async fn set_time(&self, p: &str, time: SystemTime) -> VfsResult<()> {
        self.log(format!("set_time {p}"));
        match self.state().files.get_mut(p) {
            Some(file) => {
                file.1 = time;
                Ok(())
            }
            None => Err(unavailable()),
        }
    }

    fn is_time_precise_in_list(&self) -> bool {
        self.state().precise_list
    }

    async fn quit(&self) -> VfsResult<()> {
        self.log("quit".to_owned());
        Ok(())
    }
}

struct MockRetrieve {
    path: String,
    data: io::Cursor<Vec<u8>>,
    calls: CallLog,
    finished: bool,
}

impl AsyncRead for MockRetrieve {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().data).poll_read(cx, buf)
    }
}

#[async_trait]
impl RetrieveStream for MockRetrieve {
    async fn finish(&mut self) -> VfsResult<()> {
        if !std::mem::replace(&mut self.finished, true) {
            self.calls.lock().unwrap().push(format!("finish {}", self.path));
        }
        Ok(())
    }
}

/// Hands out mock clients by host, counting dials.
pub(crate) struct MockDialer {
    default: Arc<MockClient>,
    hosts: HashMap<String, Arc<MockClient>>,
    dials: AtomicUsize,
}

impl MockDialer {
    pub(crate) fn new(default: Arc<MockClient>) -> Self {
        Self {
            default,
            hosts: HashMap::new(),
            dials: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with_host(mut self, host: &str, client: Arc<MockClient>) -> Self {
        self.hosts.insert(host.to_owned(), client);
        self
    }

    pub(crate) fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, authority: &Authority, _options: &FtpOptions) -> VfsResult<Arc<dyn Client>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let client: Arc<dyn Client> = self
            .hosts
            .get(authority.host())
            .unwrap_or(&self.default)
            .clone();
        Ok(client)
    }
}
