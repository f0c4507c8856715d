//! Status line parsing, including recovery from HTTP/0.9-style proxies.

use std::fmt;

use once_cell::sync::Lazy;
use regex::bytes::{Captures, Regex};
use tracing::{debug, info, warn};

use crate::error::{Result, TunnelError};
use crate::line::{trim_terminator, LineReader};
use crate::stream::TunnelStream;

static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)^(?P<version>HTTP/\d\.\d)\s+(?P<status>\d+)(?:\s+(?P<message>.*))?$")
        .expect("status line pattern compiles")
});

static STATUS_LINE_ANYWHERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u)(?P<version>HTTP/\d\.\d)\s+(?P<status>\d+)(?:\s+(?P<message>.*))?$")
        .expect("status line pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub code: u16,
    pub message: String,
}

impl StatusLine {
    pub fn is_success(&self) -> bool {
        self.code == 200
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.version, self.code, self.message)
    }
}

fn from_captures(caps: &Captures<'_>) -> Option<StatusLine> {
    let code: u16 = std::str::from_utf8(&caps["status"]).ok()?.parse().ok()?;
    if !(100..=999).contains(&code) {
        return None;
    }
    let message = caps
        .name("message")
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
        .unwrap_or_default();
    Some(StatusLine {
        version: String::from_utf8_lossy(&caps["version"]).into_owned(),
        code,
        message,
    })
}

/// Parse a response line of the form `HTTP/x.y code message`.
pub fn parse(line: &[u8]) -> Option<StatusLine> {
    let caps = STATUS_LINE.captures(trim_terminator(line))?;
    from_captures(&caps)
}

/// Find a status line anywhere inside `line`.
pub fn search(line: &[u8]) -> Option<StatusLine> {
    let trimmed = trim_terminator(line);
    let mut start = 0;
    while let Some(caps) = STATUS_LINE_ANYWHERE.captures_at(trimmed, start) {
        if let Some(status) = from_captures(&caps) {
            return Some(status);
        }
        // The message group runs to the end of the line; retry past this match.
        start = caps.get(0).map_or(trimmed.len(), |m| m.start() + 1);
    }
    None
}

/// Read the status line of one response.
///
/// When the first line is not a status line the proxy is assumed to speak
/// HTTP/0.9 and up to `max_recovery_lines` further lines are scanned for one.
pub fn read_status_line<S: TunnelStream + ?Sized>(
    reader: &mut LineReader<'_, S>,
    max_recovery_lines: usize,
) -> Result<StatusLine> {
    let first = reader.read_line()?;
    if let Some(status) = parse(&first) {
        info!(version = %status.version, code = status.code, message = %status.message, "< status line");
        return Ok(status);
    }

    warn!(
        first_line = %String::from_utf8_lossy(trim_terminator(&first)),
        "server response used outdated HTTP version: HTTP/0.9"
    );
    for _ in 0..max_recovery_lines {
        let line = match reader.read_line() {
            Ok(line) => line,
            Err(TunnelError::ConnectionClosed) => break,
            Err(e) => return Err(e),
        };
        debug!(line = %String::from_utf8_lossy(trim_terminator(&line)), "< scanning for status line");
        if let Some(status) = search(&line) {
            info!(
                from = %String::from_utf8_lossy(trim_terminator(&first)),
                to = %status,
                "changed status line"
            );
            return Ok(status);
        }
    }

    warn!("could not handle HTTP/0.9 server response");
    Err(TunnelError::MalformedStatusLine)
}
