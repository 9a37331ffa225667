//! [`Client`] and [`Dialer`] backed by a real FTP control connection.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::SystemTime;

use async_trait::async_trait;
use ftpvfs_proto::{DataStream, Entry, Features, FtpError, FtpStream};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::authority::Authority;
use crate::client::{ByteReader, Client, Dialer, RetrieveStream};
use crate::error::{VfsError, VfsResult};
use crate::options::FtpOptions;
use crate::path;

/// A logged-in [`FtpStream`] shared between single ops and transfers.
///
/// The stream serves one command at a time. A running download holds it
/// until finished; anything issued meanwhile fails with
/// [`FtpError::Busy`] instead of waiting on a transfer that only the
/// caller can complete.
pub struct FtpClient {
    stream: Arc<Mutex<FtpStream>>,
    features: Features,
}

impl FtpClient {
    pub fn new(stream: FtpStream) -> Self {
        let features = stream.features().clone();
        Self {
            stream: Arc::new(Mutex::new(stream)),
            features,
        }
    }

    fn lock(&self) -> VfsResult<OwnedMutexGuard<FtpStream>> {
        self.stream
            .clone()
            .try_lock_owned()
            .map_err(|_| FtpError::Busy.into())
    }
}

#[async_trait]
impl Client for FtpClient {
    async fn delete(&self, path: &str) -> VfsResult<()> {
        Ok(self.lock()?.rm(path).await?)
    }

    async fn get_entry(&self, path: &str) -> VfsResult<Entry> {
        let mut stream = self.lock()?;
        if self.features.mlst {
            return Ok(stream.mlst(path).await?);
        }
        let name = path::base_name(path);
        stream
            .list(path)
            .await?
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| VfsError::not_found(path))
    }

    async fn list(&self, path: &str) -> VfsResult<Vec<Entry>> {
        Ok(self.lock()?.list(path).await?)
    }

    async fn make_dir(&self, path: &str) -> VfsResult<()> {
        Ok(self.lock()?.mkdir(path).await?)
    }

    async fn rename(&self, from: &str, to: &str) -> VfsResult<()> {
        Ok(self.lock()?.rename(from, to).await?)
    }

    async fn retr_from(&self, path: &str, offset: u64) -> VfsResult<Box<dyn RetrieveStream>> {
        let mut stream = self.lock()?;
        let data = stream.retr(path, offset).await?;
        Ok(Box::new(FtpRetrieve {
            stream,
            data: Some(data),
        }))
    }

    async fn stor_from(&self, path: &str, offset: u64, mut reader: ByteReader) -> VfsResult<()> {
        let mut stream = self.lock()?;
        let result = stream.stor(path, offset, &mut reader).await;
        drop(reader);
        let bytes = result?;
        debug!(path, offset, bytes, "upload stored");
        Ok(())
    }

    fn is_set_time_supported(&self) -> bool {
        self.features.mfmt
    }

    async fn set_time(&self, path: &str, time: SystemTime) -> VfsResult<()> {
        Ok(self.lock()?.mfmt(path, time).await?)
    }

    fn is_time_precise_in_list(&self) -> bool {
        self.features.mlst
    }

    async fn quit(&self) -> VfsResult<()> {
        Ok(self.lock()?.quit().await?)
    }
}

/// Download stream that keeps the control connection locked until finished.
struct FtpRetrieve {
    stream: OwnedMutexGuard<FtpStream>,
    data: Option<DataStream>,
}

impl AsyncRead for FtpRetrieve {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut().data.as_mut() {
            Some(data) => Pin::new(data).poll_read(cx, buf),
            None => Poll::Ready(Ok(())),
        }
    }
}

#[async_trait]
impl RetrieveStream for FtpRetrieve {
    async fn finish(&mut self) -> VfsResult<()> {
        if self.data.take().is_none() {
            return Ok(());
        }
        // The caller may stop before end of file, so "aborted" is accepted.
        self.stream.abort_transfer().await?;
        Ok(())
    }
}

/// Dials with [`FtpStream`]: connect, secure, log in.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpDialer;

#[async_trait]
impl Dialer for FtpDialer {
    #[tracing::instrument(skip_all, fields(%authority), name = "ftp.dial")]
    async fn dial(&self, authority: &Authority, options: &FtpOptions) -> VfsResult<Arc<dyn Client>> {
        let (user, password) = options.credentials(authority);
        let timeout = options.dial_timeout();

        let login = async {
            let mut stream =
                FtpStream::connect(authority.host(), authority.port(), options.connect_config())
                    .await?;
            stream.login(&user, &password).await?;
            Ok::<_, FtpError>(stream)
        };
        let stream = tokio::time::timeout(timeout, login)
            .await
            .map_err(|_| FtpError::Timeout(timeout))??;

        debug!(user = %user, protocol = ?options.protocol, "FTP client ready");
        Ok(Arc::new(FtpClient::new(stream)))
    }
}
