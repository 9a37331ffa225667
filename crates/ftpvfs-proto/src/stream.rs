//! The FTP control connection.
//!
//! [`FtpStream`] speaks the command/reply protocol and opens passive data
//! connections on demand. Only one transfer may be in flight: after
//! [`FtpStream::retr`] hands out a data stream the caller must drop it and
//! call [`FtpStream::finish_transfer`] (or [`FtpStream::abort_transfer`])
//! before issuing the next command. A forgotten finish is repaired lazily:
//! the next command first consumes the stale transfer reply.

use std::borrow::Cow;
use std::future::Future;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufStream};

use crate::config::{ConnectConfig, Security, TraceSink};
use crate::entry::{format_timeval, parse_list, parse_mlsx, Entry};
use crate::error::{FtpError, FtpResult};
use crate::net::{connect_tcp, DataStream, NetStream, Tls};
use crate::reply::{read_reply, status, Reply};

const WIRE: &str = "ftpvfs_proto::wire";

/// Optional extensions advertised by `FEAT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Features {
    pub mlst: bool,
    pub mfmt: bool,
    pub epsv: bool,
}

impl Features {
    pub(crate) fn parse(lines: &[String]) -> Self {
        let mut features = Features::default();
        for line in lines {
            let Some(name) = line.split_whitespace().next() else {
                continue;
            };
            match name.to_ascii_uppercase().as_str() {
                "MLST" => features.mlst = true,
                "MFMT" => features.mfmt = true,
                "EPSV" => features.epsv = true,
                _ => {}
            }
        }
        features
    }
}

/// An authenticated (or about to be) FTP control connection.
pub struct FtpStream {
    control: BufStream<NetStream>,
    host: String,
    tls: Option<Tls>,
    protect_data: bool,
    disable_epsv: bool,
    timeout: Duration,
    trace: Option<TraceSink>,
    features: Features,
    transfer_pending: bool,
}

impl FtpStream {
    /// Connect, read the greeting and, for FTPS/FTPES, secure the channel.
    pub async fn connect(host: &str, port: u16, config: ConnectConfig) -> FtpResult<Self> {
        let tcp = connect_tcp(host, port, config.timeout).await?;
        let tls = match config.security {
            Security::None => None,
            Security::Implicit | Security::Explicit => Some(Tls::new(host, &config.tls)?),
        };

        let io = match (&tls, config.security) {
            (Some(tls), Security::Implicit) => within(config.timeout, tls.wrap(tcp)).await?,
            _ => NetStream::Plain(tcp),
        };
        let mut control = BufStream::new(io);
        let trace = config.trace.as_ref();

        within(config.timeout, recv_reply(&mut control, trace))
            .await?
            .expect(&[status::READY])?;

        if let (Security::Explicit, Some(tls)) = (config.security, &tls) {
            send_line(&mut control, trace, "AUTH TLS").await?;
            within(config.timeout, recv_reply(&mut control, trace))
                .await?
                .expect(&[status::AUTH_OK])?;
            let tcp = match control.into_inner() {
                NetStream::Plain(tcp) => tcp,
                NetStream::Tls(_) => return Err(FtpError::Tls("channel already secured".into())),
            };
            control = BufStream::new(within(config.timeout, tls.wrap(tcp)).await?);
        }

        tracing::debug!(host, port, security = ?config.security, "FTP control connection open");

        Ok(Self {
            control,
            host: host.to_owned(),
            protect_data: tls.is_some(),
            tls,
            disable_epsv: config.disable_epsv,
            timeout: config.timeout,
            trace: config.trace,
            features: Features::default(),
            transfer_pending: false,
        })
    }

    /// Authenticate, switch to binary mode and query server features.
    pub async fn login(&mut self, user: &str, password: &str) -> FtpResult<()> {
        let reply = self.command(&format!("USER {user}")).await?;
        match reply.code {
            status::LOGGED_IN => {}
            status::NEED_PASSWORD => {
                self.command(&format!("PASS {password}"))
                    .await?
                    .expect(&[status::LOGGED_IN, status::COMMAND_SUPERFLUOUS])?;
            }
            _ => return Err(reply.into()),
        }

        if self.protect_data {
            self.command("PBSZ 0").await?.expect(&[status::COMMAND_OK])?;
            self.command("PROT P").await?.expect(&[status::COMMAND_OK])?;
        }
        self.command("TYPE I").await?.expect(&[status::COMMAND_OK])?;

        let reply = self.command("FEAT").await?;
        self.features = if reply.code == status::SYSTEM_STATUS {
            Features::parse(&reply.lines)
        } else {
            Features::default()
        };

        tracing::debug!(user, features = ?self.features, "FTP login complete");
        Ok(())
    }

    pub fn features(&self) -> &Features {
        &self.features
    }

    /// Whether a data connection is open and its final reply not yet read.
    pub fn transfer_pending(&self) -> bool {
        self.transfer_pending
    }

    /// Send a raw command and return whatever the server replies.
    pub async fn command(&mut self, cmd: &str) -> FtpResult<Reply> {
        if self.transfer_pending {
            self.transfer_pending = false;
            let stale = self.reply().await?;
            tracing::debug!(code = stale.code, "discarded unfinished transfer reply");
        }
        send_line(&mut self.control, self.trace.as_ref(), cmd).await?;
        self.reply().await
    }

    async fn reply(&mut self) -> FtpResult<Reply> {
        recv_reply(&mut self.control, self.trace.as_ref()).await
    }

    // =========================================================================
    // Single-reply commands
    // =========================================================================

    pub async fn rm(&mut self, path: &str) -> FtpResult<()> {
        self.command(&format!("DELE {path}"))
            .await?
            .expect(&[status::FILE_ACTION_OK])?;
        Ok(())
    }

    pub async fn mkdir(&mut self, path: &str) -> FtpResult<()> {
        self.command(&format!("MKD {path}"))
            .await?
            .expect(&[status::PATH_CREATED])?;
        Ok(())
    }

    pub async fn rename(&mut self, from: &str, to: &str) -> FtpResult<()> {
        self.command(&format!("RNFR {from}"))
            .await?
            .expect(&[status::FILE_ACTION_PENDING])?;
        self.command(&format!("RNTO {to}"))
            .await?
            .expect(&[status::FILE_ACTION_OK])?;
        Ok(())
    }

    /// Set the modification time (`MFMT`, draft-somers-ftp-mfxx).
    pub async fn mfmt(&mut self, path: &str, time: SystemTime) -> FtpResult<()> {
        self.command(&format!("MFMT {} {path}", format_timeval(time)))
            .await?
            .expect(&[status::FILE_STATUS])?;
        Ok(())
    }

    /// Facts for a single path (`MLST`).
    pub async fn mlst(&mut self, path: &str) -> FtpResult<Entry> {
        let reply = self
            .command(&format!("MLST {path}"))
            .await?
            .expect(&[status::FILE_ACTION_OK])?;
        reply
            .lines
            .iter()
            .skip(1)
            .find_map(|line| parse_mlsx(line).ok().flatten())
            .ok_or_else(|| FtpError::MalformedReply(format!("MLST: {}", reply.text())))
    }

    pub async fn quit(&mut self) -> FtpResult<()> {
        self.command("QUIT").await?.expect(&[status::CLOSING])?;
        self.control.shutdown().await?;
        Ok(())
    }

    // =========================================================================
    // Transfers
    // =========================================================================

    /// List a directory: `MLSD` when the server has `MLST`, else `LIST`.
    pub async fn list(&mut self, path: &str) -> FtpResult<Vec<Entry>> {
        if self.features.mlst {
            let lines = self.list_lines(&format!("MLSD {path}")).await?;
            let mut entries = Vec::with_capacity(lines.len());
            for line in &lines {
                if let Some(entry) = parse_mlsx(line)? {
                    entries.push(entry);
                }
            }
            Ok(entries)
        } else {
            let lines = self.list_lines(&format!("LIST {path}")).await?;
            Ok(lines.iter().filter_map(|line| parse_list(line)).collect())
        }
    }

    async fn list_lines(&mut self, cmd: &str) -> FtpResult<Vec<String>> {
        let data = self.open_data().await?;
        let reply = self.command(cmd).await?;
        if reply.code == status::FILE_BUSY {
            // Some servers answer "450 No files found" for an empty directory.
            return Ok(Vec::new());
        }
        reply.expect(&[status::DATA_CONNECTION_OPEN, status::ABOUT_TO_SEND])?;
        self.transfer_pending = true;

        let mut lines = Vec::new();
        let mut reader = BufReader::new(data).lines();
        let read: FtpResult<()> = async {
            while let Some(line) = reader.next_line().await? {
                if !line.is_empty() {
                    lines.push(line);
                }
            }
            Ok(())
        }
        .await;
        drop(reader);

        self.finish_transfer().await?;
        read.map(|_| lines)
    }

    /// Start a download at `offset`. The returned stream yields the file
    /// contents; finish with [`finish_transfer`](Self::finish_transfer).
    pub async fn retr(&mut self, path: &str, offset: u64) -> FtpResult<DataStream> {
        let data = self.open_data().await?;
        if offset > 0 {
            self.command(&format!("REST {offset}"))
                .await?
                .expect(&[status::FILE_ACTION_PENDING])?;
        }
        self.command(&format!("RETR {path}"))
            .await?
            .expect(&[status::DATA_CONNECTION_OPEN, status::ABOUT_TO_SEND])?;
        self.transfer_pending = true;
        Ok(data)
    }

    /// Upload everything `reader` yields, writing from `offset` onwards.
    ///
    /// Returns once the server has confirmed (or refused) the stored data.
    pub async fn stor<R>(&mut self, path: &str, offset: u64, reader: &mut R) -> FtpResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut data = self.open_data().await?;
        if offset > 0 {
            self.command(&format!("REST {offset}"))
                .await?
                .expect(&[status::FILE_ACTION_PENDING])?;
        }
        self.command(&format!("STOR {path}"))
            .await?
            .expect(&[status::DATA_CONNECTION_OPEN, status::ABOUT_TO_SEND])?;
        self.transfer_pending = true;

        let copied = tokio::io::copy(reader, &mut data).await;
        let shutdown = data.shutdown().await;
        drop(data);

        self.finish_transfer().await?;
        let copied = copied?;
        shutdown?;
        Ok(copied)
    }

    /// Read the final reply of a completed transfer.
    pub async fn finish_transfer(&mut self) -> FtpResult<()> {
        if !self.transfer_pending {
            return Ok(());
        }
        self.transfer_pending = false;
        self.reply()
            .await?
            .expect(&[status::TRANSFER_COMPLETE, status::FILE_ACTION_OK])?;
        Ok(())
    }

    /// Like [`finish_transfer`](Self::finish_transfer), for a download the
    /// caller stopped reading early. "Transfer aborted" replies are accepted.
    pub async fn abort_transfer(&mut self) -> FtpResult<()> {
        if !self.transfer_pending {
            return Ok(());
        }
        self.transfer_pending = false;
        self.reply().await?.expect(&[
            status::TRANSFER_COMPLETE,
            status::FILE_ACTION_OK,
            status::TRANSFER_ABORTED,
            status::LOCAL_ERROR,
        ])?;
        Ok(())
    }

    async fn open_data(&mut self) -> FtpResult<DataStream> {
        let port = if self.disable_epsv {
            self.pasv().await?
        } else {
            match self.epsv().await {
                Ok(port) => port,
                Err(FtpError::UnexpectedReply { code, .. }) if code >= 500 => {
                    tracing::debug!(code, "EPSV refused, falling back to PASV");
                    self.disable_epsv = true;
                    self.pasv().await?
                }
                Err(e) => return Err(e),
            }
        };

        // The advertised PASV address is ignored: servers behind NAT
        // routinely report an unreachable private address.
        let tcp = connect_tcp(&self.host, port, self.timeout).await?;
        match (&self.tls, self.protect_data) {
            (Some(tls), true) => within(self.timeout, tls.wrap(tcp)).await,
            _ => Ok(NetStream::Plain(tcp)),
        }
    }

    async fn epsv(&mut self) -> FtpResult<u16> {
        let reply = self
            .command("EPSV")
            .await?
            .expect(&[status::EXTENDED_PASSIVE_MODE])?;
        parse_epsv(&reply.text())
    }

    async fn pasv(&mut self) -> FtpResult<u16> {
        let reply = self.command("PASV").await?.expect(&[status::PASSIVE_MODE])?;
        parse_pasv(&reply.text())
    }
}

/// Port from `229 Entering Extended Passive Mode (|||6446|)`.
pub(crate) fn parse_epsv(text: &str) -> FtpResult<u16> {
    let malformed = || FtpError::MalformedReply(format!("EPSV: {text}"));
    let start = text.find('(').ok_or_else(malformed)?;
    let end = text.rfind(')').ok_or_else(malformed)?;
    let inner = text.get(start + 1..end).ok_or_else(malformed)?;
    let delim = inner.chars().next().ok_or_else(malformed)?;
    inner
        .split(delim)
        .nth(3)
        .and_then(|port| port.parse().ok())
        .ok_or_else(malformed)
}

/// Port from `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
pub(crate) fn parse_pasv(text: &str) -> FtpResult<u16> {
    let malformed = || FtpError::MalformedReply(format!("PASV: {text}"));
    let inner = match (text.find('('), text.find(')')) {
        (Some(start), Some(end)) if start < end => &text[start + 1..end],
        _ => text
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .trim_end_matches(|c: char| !c.is_ascii_digit()),
    };
    let numbers: Vec<u8> = inner
        .split(',')
        .map(|n| n.trim().parse())
        .collect::<Result<_, _>>()
        .map_err(|_| malformed())?;
    match numbers.as_slice() {
        [_, _, _, _, hi, lo] => Ok(u16::from(*hi) << 8 | u16::from(*lo)),
        _ => Err(malformed()),
    }
}

fn mask(cmd: &str) -> Cow<'_, str> {
    match cmd.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("PASS ") => Cow::Borrowed("PASS ****"),
        _ => Cow::Borrowed(cmd),
    }
}

async fn send_line<S>(io: &mut S, trace: Option<&TraceSink>, cmd: &str) -> FtpResult<()>
where
    S: AsyncWrite + Unpin,
{
    let shown = mask(cmd);
    tracing::trace!(target: WIRE, "> {shown}");
    if let Some(trace) = trace {
        trace.emit(&format!("> {shown}"));
    }
    io.write_all(cmd.as_bytes()).await?;
    io.write_all(b"\r\n").await?;
    io.flush().await?;
    Ok(())
}

async fn recv_reply(
    io: &mut BufStream<NetStream>,
    trace: Option<&TraceSink>,
) -> FtpResult<Reply> {
    read_reply(io, |line| {
        tracing::trace!(target: WIRE, "< {line}");
        if let Some(trace) = trace {
            trace.emit(&format!("< {line}"));
        }
    })
    .await
}

async fn within<T, F>(timeout: Duration, fut: F) -> FtpResult<T>
where
    F: Future<Output = FtpResult<T>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| FtpError::Timeout(timeout))?
}
