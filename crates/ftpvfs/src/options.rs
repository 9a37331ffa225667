//! Dial, login and TLS settings.
//!
//! Options deserialize from TOML:
//!
//! ```toml
//! username = "deploy"
//! protocol = "ftpes"
//! disable_epsv = true
//! dial_timeout_secs = 30
//!
//! [tls]
//! min_version = "1.3"
//! server_name = "ftp.internal.example.com"
//! ```

use std::time::Duration;

use ftpvfs_proto::{ConnectConfig, Security, TlsConfig, TlsVersion, TraceSink};
use serde::{Deserialize, Serialize};

use crate::authority::Authority;
use crate::error::{VfsError, VfsResult};

/// Environment variable consulted for the login name.
pub const USERNAME_ENV: &str = "VFS_FTP_USERNAME";
/// Environment variable consulted for the password.
pub const PASSWORD_ENV: &str = "VFS_FTP_PASSWORD";

const ANONYMOUS: &str = "anonymous";
const DEFAULT_DIAL_TIMEOUT_SECS: u64 = 10;

/// Control-connection security.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Plain FTP.
    #[default]
    Ftp,
    /// Implicit TLS.
    Ftps,
    /// Explicit TLS via `AUTH TLS`.
    Ftpes,
}

impl From<Protocol> for Security {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Ftp => Security::None,
            Protocol::Ftps => Security::Implicit,
            Protocol::Ftpes => Security::Explicit,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinTlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    Tls13,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub min_version: MinTlsVersion,
    /// Certificate name to verify instead of the authority host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

/// Everything a [`Dialer`](crate::client::Dialer) needs besides the authority.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FtpOptions {
    /// Login name; beats the authority user and the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password; beats the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub protocol: Protocol,

    /// Use `PASV` instead of `EPSV` for data connections.
    pub disable_epsv: bool,

    /// Upper bound for connect plus login.
    pub dial_timeout_secs: u64,

    pub tls: TlsOptions,

    /// Receives every control-channel line, password masked.
    #[serde(skip)]
    pub debug: Option<TraceSink>,
}

impl Default for FtpOptions {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            protocol: Protocol::Ftp,
            disable_epsv: false,
            dial_timeout_secs: DEFAULT_DIAL_TIMEOUT_SECS,
            tls: TlsOptions::default(),
            debug: None,
        }
    }
}

impl FtpOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a TOML document.
    pub fn from_toml_str(s: &str) -> VfsResult<Self> {
        toml::from_str(s).map_err(|e| VfsError::config(e.to_string()))
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_disable_epsv(mut self, disable: bool) -> Self {
        self.disable_epsv = disable;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn with_tls(mut self, tls: TlsOptions) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_debug(mut self, sink: TraceSink) -> Self {
        self.debug = Some(sink);
        self
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// Resolve the login from the process environment.
    pub fn credentials(&self, authority: &Authority) -> (String, String) {
        self.credentials_with(authority, |key| std::env::var(key).ok())
    }

    /// Resolve the login: explicit option, then environment, then the
    /// authority user, then `anonymous`.
    pub fn credentials_with(
        &self,
        authority: &Authority,
        env: impl Fn(&str) -> Option<String>,
    ) -> (String, String) {
        let non_empty = |v: String| (!v.is_empty()).then_some(v);

        let username = self
            .username
            .clone()
            .or_else(|| env(USERNAME_ENV).and_then(non_empty))
            .or_else(|| authority.user().map(str::to_owned))
            .unwrap_or_else(|| ANONYMOUS.to_owned());
        let password = self
            .password
            .clone()
            .or_else(|| env(PASSWORD_ENV).and_then(non_empty))
            .unwrap_or_else(|| ANONYMOUS.to_owned());

        (username, password)
    }

    /// Settings for [`FtpStream::connect`](ftpvfs_proto::FtpStream::connect).
    pub fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            security: self.protocol.into(),
            tls: TlsConfig {
                min_version: match self.tls.min_version {
                    MinTlsVersion::Tls12 => TlsVersion::Tls12,
                    MinTlsVersion::Tls13 => TlsVersion::Tls13,
                },
                server_name: self.tls.server_name.clone(),
            },
            disable_epsv: self.disable_epsv,
            timeout: self.dial_timeout(),
            trace: self.debug.clone(),
        }
    }
}
