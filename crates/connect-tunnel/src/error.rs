//! Tunnel establishment error types.

use thiserror::Error;

use crate::ntlm::NtlmError;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Proxy closed the connection")]
    ConnectionClosed,

    #[error("Response line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("No HTTP status line found in proxy response")]
    MalformedStatusLine,

    #[error("Tunnel connection failed: {0} {1}")]
    TunnelRejected(u16, String),

    #[error("Proxy answered 407 without a Proxy-Authenticate: NTLM challenge")]
    NtlmChallengeMissing,

    #[error("NTLM context error: {0}")]
    Ntlm(#[from] NtlmError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Get type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            TunnelError::ConnectionClosed => "connection_closed",
            TunnelError::LineTooLong { .. } => "line_too_long",
            TunnelError::MalformedStatusLine => "malformed_status_line",
            TunnelError::TunnelRejected(..) => "tunnel_rejected",
            TunnelError::NtlmChallengeMissing => "ntlm_challenge_missing",
            TunnelError::Ntlm(_) => "ntlm_error",
            TunnelError::Io(_) => "io_error",
        }
    }

    /// Status code the proxy answered with, when the failure came from one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TunnelError::TunnelRejected(code, _) => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
