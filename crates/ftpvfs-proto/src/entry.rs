//! Directory entries from MLST/MLSD facts and LIST output.

use std::time::SystemTime;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::error::{FtpError, FtpResult};

/// Kind of a listed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Link,
}

/// One file or directory as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Base name (never a full path).
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            size,
            modified: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Dir,
            size: 0,
            modified: None,
        }
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Last path segment, ignoring a trailing slash.
pub(crate) fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Parse an RFC 3659 fact line: `type=file;size=12;modify=20240101120000; name`.
///
/// Returns `Ok(None)` for the `cdir`/`pdir` pseudo entries.
pub fn parse_mlsx(line: &str) -> FtpResult<Option<Entry>> {
    let line = line.trim_start();
    let (facts, name) = line
        .split_once(' ')
        .ok_or_else(|| FtpError::MalformedReply(format!("fact line without name: {line}")))?;

    let mut kind = None;
    let mut size = 0;
    let mut modified = None;

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => Some(EntryKind::File),
                    "dir" => Some(EntryKind::Dir),
                    "cdir" | "pdir" => return Ok(None),
                    v if v.starts_with("os.unix=symlink") || v.starts_with("os.unix=slink") => {
                        Some(EntryKind::Link)
                    }
                    _ => Some(EntryKind::File),
                }
            }
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_timeval(value),
            _ => {}
        }
    }

    Ok(Some(Entry {
        name: base_name(name).to_owned(),
        kind: kind.unwrap_or(EntryKind::File),
        size,
        modified,
    }))
}

/// Parse one line of `LIST` output, in Unix `ls -l` or DOS/IIS format.
pub fn parse_list(line: &str) -> Option<Entry> {
    parse_unix_list(line, Utc::now()).or_else(|| parse_dos_list(line))
}

/// Split off `count` whitespace-separated fields, returning them and the
/// untouched remainder of the line.
fn split_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut rest = line.trim_start();
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

fn parse_unix_list(line: &str, now: DateTime<Utc>) -> Option<Entry> {
    let (fields, rest) = split_fields(line, 8)?;

    let kind = match fields[0].chars().next()? {
        'd' => EntryKind::Dir,
        'l' => EntryKind::Link,
        '-' => EntryKind::File,
        _ => return None,
    };
    let size = fields[4].parse().ok()?;

    let month_day = format!("{} {}", fields[5], fields[6]);
    let modified = if fields[7].contains(':') {
        let time = NaiveTime::parse_from_str(fields[7], "%H:%M").ok()?;
        let mut date =
            NaiveDate::parse_from_str(&format!("{month_day} {}", now.year()), "%b %d %Y").ok()?;
        // Entries without a year are within the last six months.
        if date > now.date_naive() + chrono::Days::new(1) {
            date = date.with_year(now.year() - 1)?;
        }
        date.and_time(time)
    } else {
        NaiveDate::parse_from_str(&format!("{month_day} {}", fields[7]), "%b %d %Y")
            .ok()?
            .and_time(NaiveTime::from_hms_opt(0, 0, 0)?)
    };

    let name = match kind {
        EntryKind::Link => rest.split(" -> ").next().unwrap_or(rest),
        _ => rest,
    };

    Some(Entry {
        name: name.to_owned(),
        kind,
        size,
        modified: Some(modified.and_utc().into()),
    })
}

fn parse_dos_list(line: &str) -> Option<Entry> {
    let (fields, name) = split_fields(line, 3)?;
    let date = NaiveDate::parse_from_str(fields[0], "%m-%d-%y").ok()?;
    let time = NaiveTime::parse_from_str(fields[1], "%I:%M%p").ok()?;

    let (kind, size) = if fields[2].eq_ignore_ascii_case("<DIR>") {
        (EntryKind::Dir, 0)
    } else {
        (EntryKind::File, fields[2].parse().ok()?)
    };

    Some(Entry {
        name: name.trim_end().to_owned(),
        kind,
        size,
        modified: Some(date.and_time(time).and_utc().into()),
    })
}

/// Parse an RFC 3659 time-val, `YYYYMMDDHHMMSS[.sss]`, always UTC.
pub fn parse_timeval(value: &str) -> Option<SystemTime> {
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (value, None),
    };
    let naive = NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S").ok()?;

    let nanos = match fraction {
        Some(digits) if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
            let digits = &digits[..digits.len().min(9)];
            let scale = 10u32.pow(9 - digits.len() as u32);
            digits.parse::<u32>().ok()? * scale
        }
        Some(_) => return None,
        None => 0,
    };

    let time = naive.and_utc() + chrono::Duration::nanoseconds(i64::from(nanos));
    Some(time.into())
}

/// Format a time-val for `MFMT`.
pub fn format_timeval(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y%m%d%H%M%S")
        .to_string()
}
