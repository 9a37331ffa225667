//! Transport for control and data connections: plain TCP or TLS.

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::{FtpError, FtpResult};

/// Lowest TLS protocol version the client will negotiate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

/// TLS settings for FTPS and FTPES.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub min_version: TlsVersion,
    /// Name to verify the server certificate against. Defaults to the host.
    pub server_name: Option<String>,
}

/// A TCP stream, optionally wrapped in TLS.
pub enum NetStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

/// Data connections use the same transport as the control connection.
pub type DataStream = NetStream;

impl NetStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, NetStream::Tls(_))
    }
}

impl AsyncRead for NetStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_flush(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            NetStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// Connector plus the verified server name, reused for every data connection.
#[derive(Clone)]
pub(crate) struct Tls {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Tls {
    pub(crate) fn new(host: &str, config: &TlsConfig) -> FtpResult<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let versions: Vec<&'static rustls::SupportedProtocolVersion> = match config.min_version {
            TlsVersion::Tls12 => vec![&rustls::version::TLS13, &rustls::version::TLS12],
            TlsVersion::Tls13 => vec![&rustls::version::TLS13],
        };

        let client_config = ClientConfig::builder_with_protocol_versions(&versions)
            .with_root_certificates(roots)
            .with_no_client_auth();

        let name = config.server_name.as_deref().unwrap_or(host).to_owned();
        let server_name = ServerName::try_from(name)
            .map_err(|e| FtpError::Tls(format!("invalid server name: {e}")))?;

        Ok(Self {
            connector: TlsConnector::from(Arc::new(client_config)),
            server_name,
        })
    }

    pub(crate) async fn wrap(&self, tcp: TcpStream) -> FtpResult<NetStream> {
        let stream = self
            .connector
            .connect(self.server_name.clone(), tcp)
            .await
            .map_err(|e| FtpError::Tls(format!("handshake failed: {e}")))?;
        Ok(NetStream::Tls(Box::new(stream)))
    }
}

/// Open a TCP connection, bounded by `timeout`.
pub(crate) async fn connect_tcp(host: &str, port: u16, timeout: Duration) -> FtpResult<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(stream) => {
            let stream = stream?;
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Err(_) => Err(FtpError::Timeout(timeout)),
    }
}
