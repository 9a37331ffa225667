//! Control-channel replies.
//!
//! A reply is a three-digit code followed by either a space (single line)
//! or a dash (first line of a multi-line reply terminated by a line that
//! starts with the same code and a space).

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{FtpError, FtpResult};

/// Reply codes used by the client.
pub mod status {
    pub const DATA_CONNECTION_OPEN: u16 = 125;
    pub const ABOUT_TO_SEND: u16 = 150;
    pub const COMMAND_OK: u16 = 200;
    pub const COMMAND_SUPERFLUOUS: u16 = 202;
    pub const SYSTEM_STATUS: u16 = 211;
    pub const FILE_STATUS: u16 = 213;
    pub const READY: u16 = 220;
    pub const CLOSING: u16 = 221;
    pub const TRANSFER_COMPLETE: u16 = 226;
    pub const PASSIVE_MODE: u16 = 227;
    pub const EXTENDED_PASSIVE_MODE: u16 = 229;
    pub const LOGGED_IN: u16 = 230;
    pub const AUTH_OK: u16 = 234;
    pub const FILE_ACTION_OK: u16 = 250;
    pub const PATH_CREATED: u16 = 257;
    pub const NEED_PASSWORD: u16 = 331;
    pub const FILE_ACTION_PENDING: u16 = 350;
    pub const TRANSFER_ABORTED: u16 = 426;
    pub const FILE_BUSY: u16 = 450;
    pub const LOCAL_ERROR: u16 = 451;
    pub const FILE_UNAVAILABLE: u16 = 550;
}

/// A complete server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    /// Reply text, one element per line, with the code prefix removed from
    /// the first and last lines. Intermediate lines are kept verbatim.
    pub lines: Vec<String>,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![text.into()],
        }
    }

    /// All lines joined with `\n`.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// 1xx: the action is starting, another reply follows.
    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    /// 2xx: the action completed.
    pub fn is_completion(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Turn the reply into an error unless its code is one of `expected`.
    pub fn expect(self, expected: &[u16]) -> FtpResult<Self> {
        if expected.contains(&self.code) {
            Ok(self)
        } else {
            Err(self.into())
        }
    }
}

/// Split a reply line into code, continuation marker and text.
///
/// Returns `None` when the line does not start with a three-digit code
/// followed by a space, a dash, or nothing.
pub(crate) fn split_line(line: &str) -> Option<(u16, bool, &str)> {
    let head = line.get(..3)?;
    if !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let code = head.parse().ok()?;
    match line.as_bytes().get(3) {
        None => Some((code, false, "")),
        Some(b' ') => Some((code, false, &line[4..])),
        Some(b'-') => Some((code, true, &line[4..])),
        Some(_) => None,
    }
}

/// Read one raw line, stripping the CRLF terminator.
pub(crate) async fn read_line<R>(reader: &mut R) -> FtpResult<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(FtpError::Closed);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(line)
}

/// Read a full (possibly multi-line) reply.
///
/// `on_line` sees every raw line as received, for wire tracing.
pub(crate) async fn read_reply<R, F>(reader: &mut R, mut on_line: F) -> FtpResult<Reply>
where
    R: AsyncBufRead + Unpin,
    F: FnMut(&str),
{
    let first = read_line(reader).await?;
    on_line(&first);
    let (code, mut more, text) =
        split_line(&first).ok_or_else(|| FtpError::MalformedReply(first.clone()))?;
    let mut lines = vec![text.to_owned()];

    while more {
        let line = read_line(reader).await?;
        on_line(&line);
        match split_line(&line) {
            Some((c, false, text)) if c == code => {
                lines.push(text.to_owned());
                more = false;
            }
            _ => lines.push(line),
        }
    }

    Ok(Reply { code, lines })
}
