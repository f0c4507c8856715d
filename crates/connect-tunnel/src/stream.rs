//! Socket abstraction the tunnel handshake runs over.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// A blocking byte stream whose reads can be bounded by a poll timeout.
///
/// A read that times out must fail with `WouldBlock` or `TimedOut`; the line
/// reader treats those as "no data yet" and `Ok(0)` as the peer closing.
pub trait TunnelStream: Read + Write {
    fn poll_timeout(&self) -> io::Result<Option<Duration>>;

    fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl TunnelStream for TcpStream {
    fn poll_timeout(&self) -> io::Result<Option<Duration>> {
        self.read_timeout()
    }

    fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout)
    }
}

impl<S: TunnelStream + ?Sized> TunnelStream for &mut S {
    fn poll_timeout(&self) -> io::Result<Option<Duration>> {
        (**self).poll_timeout()
    }

    fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_poll_timeout(timeout)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod scripted {
    //! In-memory proxy that replays a fixed response script.

    use super::TunnelStream;
    use std::collections::VecDeque;
    use std::io::{self, Read, Write};
    use std::time::Duration;

    #[derive(Debug, Clone)]
    pub enum Step {
        /// Bytes made available to the reader, possibly over several reads.
        Data(Vec<u8>),
        /// One poll interval passes without any data.
        Idle,
    }

    #[derive(Debug, Default)]
    pub struct ScriptedStream {
        steps: VecDeque<Step>,
        current: VecDeque<u8>,
        writes: Vec<Vec<u8>>,
        read_calls: usize,
        timeout: Option<Duration>,
    }

    impl ScriptedStream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn data(mut self, bytes: impl AsRef<[u8]>) -> Self {
            self.steps.push_back(Step::Data(bytes.as_ref().to_vec()));
            self
        }

        pub fn idle(mut self) -> Self {
            self.steps.push_back(Step::Idle);
            self
        }

        /// Every buffer handed to `write`, in order.
        pub fn writes(&self) -> &[Vec<u8>] {
            &self.writes
        }

        pub fn read_calls(&self) -> usize {
            self.read_calls
        }

        /// Bytes the handshake left unread, idle markers skipped.
        pub fn unread(&self) -> Vec<u8> {
            let mut out: Vec<u8> = self.current.iter().copied().collect();
            for step in &self.steps {
                if let Step::Data(bytes) = step {
                    out.extend_from_slice(bytes);
                }
            }
            out
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read_calls += 1;
            if buf.is_empty() {
                return Ok(0);
            }
            while self.current.is_empty() {
                match self.steps.pop_front() {
                    Some(Step::Data(bytes)) => self.current.extend(bytes),
                    Some(Step::Idle) => {
                        return Err(io::Error::new(io::ErrorKind::WouldBlock, "idle"))
                    }
                    None => return Ok(0),
                }
            }
            let n = buf.len().min(self.current.len());
            for (slot, byte) in buf.iter_mut().zip(self.current.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.writes.push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl TunnelStream for ScriptedStream {
        fn poll_timeout(&self) -> io::Result<Option<Duration>> {
            Ok(self.timeout)
        }

        fn set_poll_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
            self.timeout = timeout;
            Ok(())
        }
    }
}
