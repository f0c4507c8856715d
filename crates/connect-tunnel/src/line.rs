//! Bounded, unbuffered line reads from the proxy socket.
//!
//! Bytes are pulled one at a time so that nothing past the terminating `\n`
//! is ever consumed; whatever follows the handshake (the TLS session) stays
//! in the socket for the caller.

use std::io::{self, Read};

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, TunnelError};
use crate::stream::TunnelStream;

/// Maximal line length accepted from a proxy.
pub const MAX_LINE: usize = 65536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    /// Keep polling until a line arrives.
    Block,
    /// Give up after one idle poll if nothing of the line has arrived yet.
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    Fail,
    Return,
}

fn is_idle(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

fn fill<S: Read + ?Sized>(
    stream: &mut S,
    max_len: usize,
    limit: usize,
    wait: Wait,
    overflow: Overflow,
) -> Result<Option<Bytes>> {
    let mut line = BytesMut::with_capacity(limit.min(256));
    let mut byte = [0u8; 1];
    loop {
        if line.len() >= limit {
            return match overflow {
                Overflow::Fail => Err(TunnelError::LineTooLong { limit: max_len }),
                Overflow::Return => Ok(Some(line.freeze())),
            };
        }
        match stream.read(&mut byte) {
            Ok(0) if line.is_empty() => return Err(TunnelError::ConnectionClosed),
            // Peer closed mid-line; hand back what arrived.
            Ok(0) => return Ok(Some(line.freeze())),
            Ok(_) => {
                line.put_u8(byte[0]);
                if byte[0] == b'\n' {
                    return Ok(Some(line.freeze()));
                }
            }
            Err(e) if is_idle(&e) => {
                if line.is_empty() && wait == Wait::Poll {
                    return Ok(None);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Read one `\n`-terminated line of at most `max_len` bytes.
///
/// Poll timeouts are retried; a read of zero bytes before anything of the
/// line arrived is `ConnectionClosed`.
pub fn read_line<S: Read + ?Sized>(stream: &mut S, max_len: usize) -> Result<Bytes> {
    match fill(stream, max_len, max_len, Wait::Block, Overflow::Fail)? {
        Some(line) => Ok(line),
        None => Err(TunnelError::ConnectionClosed),
    }
}

/// True for lines that carry nothing but whitespace, including an empty read.
pub fn is_blank(line: &[u8]) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

/// Strip a trailing `\r\n` or `\n`.
pub fn trim_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Line reader bound to a socket for the length of one handshake.
pub struct LineReader<'s, S: TunnelStream + ?Sized> {
    stream: &'s mut S,
    max_len: usize,
}

impl<'s, S: TunnelStream + ?Sized> LineReader<'s, S> {
    pub fn new(stream: &'s mut S, max_len: usize) -> Self {
        Self { stream, max_len }
    }

    /// Block (poll after poll) until a whole line arrives.
    pub fn read_line(&mut self) -> Result<Bytes> {
        read_line(&mut *self.stream, self.max_len)
    }

    /// `Ok(None)` when a poll interval passes with no data at a line boundary.
    pub fn poll_line(&mut self) -> Result<Option<Bytes>> {
        fill(
            &mut *self.stream,
            self.max_len,
            self.max_len,
            Wait::Poll,
            Overflow::Fail,
        )
    }

    /// Read a body line, never consuming more than `remaining` bytes.
    pub fn read_body_line(&mut self, remaining: u64) -> Result<Bytes> {
        let remaining = usize::try_from(remaining).unwrap_or(usize::MAX);
        let (limit, overflow) = if remaining <= self.max_len {
            (remaining, Overflow::Return)
        } else {
            (self.max_len, Overflow::Fail)
        };
        match fill(&mut *self.stream, self.max_len, limit, Wait::Block, overflow)? {
            Some(line) => Ok(line),
            None => Err(TunnelError::ConnectionClosed),
        }
    }
}
