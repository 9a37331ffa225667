//! Connection settings for [`FtpStream`](crate::FtpStream).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::net::TlsConfig;

/// Default time allowed for TCP connect and each login round-trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the control connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Security {
    /// Plain FTP.
    #[default]
    None,
    /// FTPS: TLS from the first byte.
    Implicit,
    /// FTPES: plain connect, then `AUTH TLS`.
    Explicit,
}

/// Receives every control-channel line, prefixed with `> ` (sent) or
/// `< ` (received). Passwords are masked before the sink sees them.
#[derive(Clone)]
pub struct TraceSink(Arc<dyn Fn(&str) + Send + Sync>);

impl TraceSink {
    pub fn new(f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub(crate) fn emit(&self, line: &str) {
        (self.0)(line)
    }
}

impl fmt::Debug for TraceSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TraceSink(..)")
    }
}

/// Everything needed to open and secure a control connection.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub security: Security,
    pub tls: TlsConfig,
    /// Use `PASV` instead of `EPSV` for data connections.
    pub disable_epsv: bool,
    pub timeout: Duration,
    pub trace: Option<TraceSink>,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            security: Security::None,
            tls: TlsConfig::default(),
            disable_epsv: false,
            timeout: DEFAULT_TIMEOUT,
            trace: None,
        }
    }
}
