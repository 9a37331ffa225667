//! Connection targets.

use std::fmt;
use std::str::FromStr;

use crate::error::{VfsError, VfsResult};

/// URI scheme served by this filesystem.
pub const SCHEME: &str = "ftp";

/// Default FTP control port.
pub const DEFAULT_PORT: u16 = 21;

/// One FTP endpoint: optional user, host and port.
///
/// Parsed from `[user@]host[:port]`, optionally prefixed with `ftp://`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Authority {
    user: Option<String>,
    host: String,
    port: u16,
}

impl Authority {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            user: None,
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn scheme(&self) -> &'static str {
        SCHEME
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same user, host and port, so both sides share one control
    /// connection.
    ///
    /// Files on the same server can be renamed into each other and must not
    /// hold a read and a write open at once.
    pub fn same_server(&self, other: &Authority) -> bool {
        self.user == other.user
            && self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if self.port != DEFAULT_PORT {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

impl FromStr for Authority {
    type Err = VfsError;

    fn from_str(s: &str) -> VfsResult<Self> {
        let bad = || VfsError::config(format!("invalid authority: {s:?}"));
        let rest = s.strip_prefix("ftp://").unwrap_or(s).trim_end_matches('/');

        let (user, hostport) = match rest.rsplit_once('@') {
            Some((user, hostport)) if !user.is_empty() => (Some(user.to_owned()), hostport),
            Some(_) => return Err(bad()),
            None => (None, rest),
        };

        let (host, port) = if let Some(v6) = hostport.strip_prefix('[') {
            let (host, tail) = v6.split_once(']').ok_or_else(bad)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(bad()),
            }
        } else {
            match hostport.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (hostport, None),
            }
        };

        if host.is_empty() || host.contains('/') {
            return Err(bad());
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| bad())?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            user,
            host: host.to_owned(),
            port,
        })
    }
}
