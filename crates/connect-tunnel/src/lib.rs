//! HTTP CONNECT tunnel establishment through NTLM-authenticating proxies.
//!
//! The crate opens one tunnel over a caller-owned socket and stops right
//! before the TLS session would begin:
//!
//! 1. `CONNECT host:port` is written with an NTLM negotiate token.
//! 2. The response is read line by line ([`line`]), its status line parsed
//!    with an HTTP/0.9 fallback ([`status`]) and its headers and body
//!    accounted for ([`headers`]).
//! 3. A `407` challenge is answered with a second CONNECT carrying the
//!    authenticate token ([`ntlm`]); a `200` finishes the handshake.
//!
//! NTLM message construction is left to an [`NtlmContext`] implementation.
//!
//! ```ignore
//! use connect_tunnel::{TunnelConfig, TunnelController};
//!
//! let config = TunnelConfig::from_env();
//! let request = config.request("example.com", 443);
//! let mut sock = std::net::TcpStream::connect("proxy.corp:3128")?;
//! TunnelController::new(config).establish(&mut sock, request, &mut my_ntlm)?;
//! // sock is now a raw pipe to example.com:443
//! ```

pub mod config;
pub mod error;
pub mod headers;
pub mod line;
pub mod ntlm;
pub mod request;
pub mod status;
pub mod stream;
pub mod tunnel;

pub use config::{ConfigError, TunnelConfig};
pub use error::{Result, TunnelError};
pub use headers::{HeaderAccumulator, HeaderBlockState, HeaderEvent};
pub use line::{read_line, LineReader, MAX_LINE};
pub use ntlm::{NtlmContext, NtlmError, NtlmHandshakeDriver, NtlmRoundState};
pub use request::{HttpVersion, TunnelRequest};
pub use status::StatusLine;
pub use stream::TunnelStream;
pub use tunnel::{establish, TunnelController};
