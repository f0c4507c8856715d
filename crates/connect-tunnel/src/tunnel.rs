//! Tunnel controller: drives one CONNECT handshake over a borrowed socket.

use tracing::{error, info, warn};

use crate::config::TunnelConfig;
use crate::error::Result;
use crate::headers::{read_header_block, BodyPolicy};
use crate::line::LineReader;
use crate::ntlm::{NextStep, NtlmContext, NtlmHandshakeDriver};
use crate::request::TunnelRequest;
use crate::status::read_status_line;
use crate::stream::TunnelStream;

#[derive(Debug, Clone, Default)]
pub struct TunnelController {
    config: TunnelConfig,
}

impl TunnelController {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    /// Open a tunnel to the request's target through the proxy on `stream`.
    ///
    /// On success the socket is positioned right after the proxy's final
    /// header block, ready for a TLS ClientHello. On failure the caller is
    /// expected to close it. The socket's previous read timeout is restored
    /// either way.
    pub fn establish<S: TunnelStream + ?Sized>(
        &self,
        stream: &mut S,
        request: TunnelRequest,
        ntlm: &mut dyn NtlmContext,
    ) -> Result<()> {
        let previous = stream.poll_timeout()?;
        stream.set_poll_timeout(Some(self.config.poll_timeout()))?;

        let result = self.handshake(stream, request, ntlm);

        if let Err(e) = stream.set_poll_timeout(previous) {
            warn!(error = %e, "failed to restore socket read timeout");
            if result.is_ok() {
                return Err(e.into());
            }
        }
        if let Err(e) = &result {
            error!(error = %e, kind = e.type_name(), "Tunnel connection failed");
        }
        result
    }

    fn handshake<S: TunnelStream + ?Sized>(
        &self,
        stream: &mut S,
        mut request: TunnelRequest,
        ntlm: &mut dyn NtlmContext,
    ) -> Result<()> {
        info!(
            target = %request.authority(),
            version = %request.version(),
            "attempting to open tunnel using HTTP CONNECT"
        );

        let mut driver = NtlmHandshakeDriver::new(ntlm);
        request.set_proxy_authorization(Some(driver.negotiate_header()?));

        let mut round = 1u32;
        loop {
            stream.write_all(&request.to_bytes())?;
            stream.flush()?;
            info!(round, state = ?driver.state(), "CONNECT sent");

            let mut reader = LineReader::new(&mut *stream, self.config.max_line_len);
            let status = read_status_line(&mut reader, self.config.max_recovery_lines)?;

            match driver.on_status(&status)? {
                NextStep::Established => {
                    read_header_block(&mut reader, BodyPolicy::Skip)?;
                    info!(round, target = %request.authority(), "tunnel established");
                    return Ok(());
                }
                NextStep::ReadChallenge => {
                    let block = read_header_block(&mut reader, BodyPolicy::Consume)?;
                    let authenticate = driver.on_challenge(&block)?;
                    request.set_proxy_authorization(Some(authenticate));
                    round += 1;
                }
            }
        }
    }
}

/// Establish a tunnel with the default configuration.
pub fn establish<S: TunnelStream + ?Sized>(
    stream: &mut S,
    request: TunnelRequest,
    ntlm: &mut dyn NtlmContext,
) -> Result<()> {
    TunnelController::default().establish(stream, request, ntlm)
}
