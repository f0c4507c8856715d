//! Header block and body accounting for one proxy response.

use tracing::{debug, warn};

use crate::error::Result;
use crate::line::{is_blank, trim_terminator, LineReader};
use crate::stream::TunnelStream;

/// Literal prefix proxies emit for an NTLM challenge.
pub const NTLM_CHALLENGE_PREFIX: &[u8] = b"Proxy-Authenticate: NTLM ";

const CONTENT_LENGTH: &str = "content-length";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEvent {
    Header(String, String),
    /// Raw base64 token following `Proxy-Authenticate: NTLM `.
    ProxyAuthenticateChallenge(String),
    BlankLine,
    /// Total body bytes consumed so far.
    BodyByteCountUpdate(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBlockState {
    pub content_length: Option<u64>,
    pub body_bytes: u64,
    pub challenge: Option<String>,
    pub saw_blank_line: bool,
    /// Consecutive blank (or idle) lines, the header terminator included.
    pub(crate) blank_run: u32,
}

/// Whether the bytes after the header terminator belong to this response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    /// Consume the body (a 407 on a kept-alive connection).
    Consume,
    /// Stop at the blank line; what follows is tunnel payload.
    Skip,
}

#[derive(Debug, Default)]
pub struct HeaderAccumulator {
    state: HeaderBlockState,
}

impl HeaderAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &HeaderBlockState {
        &self.state
    }

    pub fn into_state(self) -> HeaderBlockState {
        self.state
    }

    pub fn in_body(&self) -> bool {
        self.state.saw_blank_line
    }

    /// Body bytes still owed under `Content-Length`, if one was announced.
    pub fn remaining_body(&self) -> Option<u64> {
        self.state
            .content_length
            .map(|len| len.saturating_sub(self.state.body_bytes))
    }

    /// True once the header block and its body have been consumed.
    pub fn is_complete(&self) -> bool {
        if !self.state.saw_blank_line {
            return false;
        }
        match self.state.content_length {
            Some(len) => self.state.body_bytes >= len,
            None => self.state.blank_run >= 2,
        }
    }

    pub fn feed(&mut self, line: &[u8]) -> HeaderEvent {
        let blank = is_blank(line);
        if self.state.saw_blank_line {
            self.state.body_bytes += line.len() as u64;
            self.state.blank_run = if blank { self.state.blank_run + 1 } else { 0 };
            return HeaderEvent::BodyByteCountUpdate(self.state.body_bytes);
        }

        if blank {
            self.state.saw_blank_line = true;
            self.state.blank_run = 1;
            return HeaderEvent::BlankLine;
        }

        if let Some(token) = line.strip_prefix(NTLM_CHALLENGE_PREFIX) {
            let token = String::from_utf8_lossy(trim_terminator(token))
                .trim()
                .to_string();
            self.state.challenge = Some(token.clone());
            return HeaderEvent::ProxyAuthenticateChallenge(token);
        }

        let text = String::from_utf8_lossy(trim_terminator(line));
        let (name, value) = match text.split_once(':') {
            Some((name, value)) => (name.trim().to_string(), value.trim().to_string()),
            None => (text.trim().to_string(), String::new()),
        };
        if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
            match value.parse::<u64>() {
                Ok(len) => self.state.content_length = Some(len),
                Err(_) => warn!(%value, "ignoring unparsable Content-Length"),
            }
        }
        HeaderEvent::Header(name, value)
    }

    /// A poll interval passed without data; counts as a blank body line.
    pub fn feed_idle(&mut self) -> HeaderEvent {
        if self.state.saw_blank_line {
            self.state.blank_run += 1;
        } else {
            self.state.saw_blank_line = true;
            self.state.blank_run = 1;
        }
        HeaderEvent::BlankLine
    }
}

fn log_event(event: &HeaderEvent) {
    match event {
        HeaderEvent::Header(name, value) => debug!(%name, %value, "< header"),
        HeaderEvent::ProxyAuthenticateChallenge(token) => {
            debug!(token_len = token.len(), "< Proxy-Authenticate: NTLM challenge")
        }
        HeaderEvent::BlankLine => debug!("< blank line"),
        HeaderEvent::BodyByteCountUpdate(n) => debug!(body_bytes = n, "< body"),
    }
}

/// Consume the headers following a status line, and the body when asked to.
pub fn read_header_block<S: TunnelStream + ?Sized>(
    reader: &mut LineReader<'_, S>,
    policy: BodyPolicy,
) -> Result<HeaderBlockState> {
    let mut acc = HeaderAccumulator::new();
    loop {
        match policy {
            BodyPolicy::Skip if acc.in_body() => break,
            BodyPolicy::Consume if acc.is_complete() => break,
            _ => {}
        }

        let event = if !acc.in_body() {
            let line = reader.read_line()?;
            acc.feed(&line)
        } else if let Some(remaining) = acc.remaining_body() {
            let line = reader.read_body_line(remaining)?;
            acc.feed(&line)
        } else {
            match reader.poll_line()? {
                Some(line) => acc.feed(&line),
                None => acc.feed_idle(),
            }
        };
        log_event(&event);
    }

    let state = acc.into_state();
    debug!(
        content_length = ?state.content_length,
        body_bytes = state.body_bytes,
        has_challenge = state.challenge.is_some(),
        "header block complete"
    );
    Ok(state)
}
