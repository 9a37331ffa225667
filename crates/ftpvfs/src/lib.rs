//! Seekable virtual files over FTP, FTPS and FTPES.
//!
//! FTP transfers are streams: one at a time per control connection, no
//! random access, no reading and writing at once. This crate hides that
//! behind [`File`] values that read, write and seek like local files.
//!
//! A [`FileSystem`] keeps one logged-in [`Client`] and one
//! [`DataConnection`] per [`Authority`]. Each file operation asks for a
//! connection in the [`Mode`] it needs; an open connection in another
//! mode, or serving another file, is closed first. Seeking closes the
//! current transfer and restarts it at the new offset with `REST`.
//!
//! ```no_run
//! use std::io::SeekFrom;
//! use ftpvfs::{Authority, FileSystem, FtpOptions};
//!
//! # async fn demo() -> ftpvfs::VfsResult<()> {
//! let fs = FileSystem::new(FtpOptions::new().with_username("alice"));
//! let authority: Authority = "ftp.example.com".parse()?;
//!
//! let mut file = fs.new_file(&authority, "/reports/2024.csv")?;
//! file.seek(SeekFrom::End(100)).await?;
//! let mut tail = Vec::new();
//! file.read_to_end(&mut tail).await?;
//! file.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod authority;
pub mod client;
pub mod data_conn;
pub mod error;
pub mod file;
pub mod filesystem;
pub mod ftp;
pub mod location;
pub mod options;
pub mod path;

mod factory;

#[cfg(test)]
mod mock;

pub use authority::{Authority, DEFAULT_PORT, SCHEME};
pub use client::{ByteReader, Client, Dialer, RetrieveStream};
pub use data_conn::{DataConnection, Mode, ReadSession, SingleOpSession, WriteSession};
pub use error::{VfsError, VfsResult};
pub use factory::Cursor;
pub use file::File;
pub use filesystem::{FileSystem, NAME};
pub use ftp::{FtpClient, FtpDialer};
pub use location::Location;
pub use options::{FtpOptions, MinTlsVersion, Protocol, TlsOptions};

pub use ftpvfs_proto::{Entry, EntryKind, TraceSink};
