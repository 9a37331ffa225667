//! Async FTP client for the ftpvfs data-connection engine.
//!
//! Covers what a virtual filesystem needs from a server: login over plain
//! TCP, FTPS or FTPES, passive data connections, offset transfers via
//! `REST`, and directory listings from `MLSD` or `LIST`.
//!
//! ```no_run
//! use ftpvfs_proto::{ConnectConfig, FtpStream};
//!
//! # async fn demo() -> ftpvfs_proto::FtpResult<()> {
//! let mut ftp = FtpStream::connect("ftp.example.com", 21, ConnectConfig::default()).await?;
//! ftp.login("anonymous", "anonymous").await?;
//! for entry in ftp.list("/pub").await? {
//!     println!("{} {}", entry.name, entry.size);
//! }
//! ftp.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod error;
pub mod net;
pub mod reply;
pub mod stream;

#[cfg(any(test, feature = "test-server"))]
pub mod testing;

pub use config::{ConnectConfig, Security, TraceSink, DEFAULT_TIMEOUT};
pub use entry::{Entry, EntryKind};
pub use error::{FtpError, FtpResult};
pub use net::{DataStream, NetStream, TlsConfig, TlsVersion};
pub use reply::{status, Reply};
pub use stream::{Features, FtpStream};
