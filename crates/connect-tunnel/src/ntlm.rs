//! NTLM round sequencing over CONNECT.
//!
//! The token bytes themselves come from an [`NtlmContext`]; this module only
//! decides which token goes into which request and when the handshake is over.
//!
//! ```text
//! AwaitingChallenge --200--> Authenticated
//! AwaitingChallenge --407 + challenge--> HaveChallenge --200--> Authenticated
//! anything else --> TunnelRejected / NtlmChallengeMissing
//! ```

use thiserror::Error;
use tracing::{debug, info};

use crate::error::{Result, TunnelError};
use crate::headers::HeaderBlockState;
use crate::status::StatusLine;

pub const PROXY_AUTHENTICATION_REQUIRED: u16 = 407;

#[derive(Debug, Error)]
pub enum NtlmError {
    #[error("NTLM helper failed: {0}")]
    Helper(String),

    #[error("NTLM helper IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No challenge has been received")]
    NoChallenge,
}

/// Source and sink of NTLM tokens, as full header values (`NTLM <base64>`).
pub trait NtlmContext {
    /// Type-1 (negotiate) header value.
    fn get_negotiate_header(&mut self) -> std::result::Result<String, NtlmError>;

    /// Hand over the proxy's `Proxy-Authenticate` value, e.g. `NTLM <base64>`.
    fn set_challenge_from_header(
        &mut self,
        header_value: &str,
    ) -> std::result::Result<(), NtlmError>;

    /// Type-3 (authenticate) header value for the challenge last set.
    fn get_authenticate_header(&mut self) -> std::result::Result<String, NtlmError>;
}

impl<C: NtlmContext + ?Sized> NtlmContext for &mut C {
    fn get_negotiate_header(&mut self) -> std::result::Result<String, NtlmError> {
        (**self).get_negotiate_header()
    }

    fn set_challenge_from_header(
        &mut self,
        header_value: &str,
    ) -> std::result::Result<(), NtlmError> {
        (**self).set_challenge_from_header(header_value)
    }

    fn get_authenticate_header(&mut self) -> std::result::Result<String, NtlmError> {
        (**self).get_authenticate_header()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NtlmRoundState {
    AwaitingChallenge,
    HaveChallenge,
    Authenticated,
}

/// What the controller has to do after a status line was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The tunnel is open; drain the remaining headers.
    Established,
    /// A 407 arrived; read the whole response and hand it to `on_challenge`.
    ReadChallenge,
}

pub struct NtlmHandshakeDriver<'c> {
    ntlm: &'c mut dyn NtlmContext,
    state: NtlmRoundState,
}

impl<'c> NtlmHandshakeDriver<'c> {
    pub fn new(ntlm: &'c mut dyn NtlmContext) -> Self {
        Self {
            ntlm,
            state: NtlmRoundState::AwaitingChallenge,
        }
    }

    pub fn state(&self) -> NtlmRoundState {
        self.state
    }

    fn advance(&mut self, next: NtlmRoundState) {
        debug_assert!(next > self.state, "NTLM rounds only move forward");
        debug!(from = ?self.state, to = ?next, "NTLM round state");
        self.state = next;
    }

    /// `Proxy-Authorization` value for the first CONNECT.
    pub fn negotiate_header(&mut self) -> Result<String> {
        Ok(self.ntlm.get_negotiate_header()?)
    }

    pub fn on_status(&mut self, status: &StatusLine) -> Result<NextStep> {
        match (self.state, status.code) {
            (NtlmRoundState::AwaitingChallenge, 200) => {
                info!("proxy accepted CONNECT without authentication");
                self.advance(NtlmRoundState::Authenticated);
                Ok(NextStep::Established)
            }
            (NtlmRoundState::AwaitingChallenge, PROXY_AUTHENTICATION_REQUIRED) => {
                info!("proxy requires authentication");
                Ok(NextStep::ReadChallenge)
            }
            (NtlmRoundState::HaveChallenge, 200) => {
                info!("proxy accepted NTLM authentication");
                self.advance(NtlmRoundState::Authenticated);
                Ok(NextStep::Established)
            }
            _ => Err(TunnelError::TunnelRejected(
                status.code,
                status.message.trim().to_string(),
            )),
        }
    }

    /// Feed the 407's challenge to the context; returns the authenticate header.
    pub fn on_challenge(&mut self, block: &HeaderBlockState) -> Result<String> {
        if self.state != NtlmRoundState::AwaitingChallenge {
            return Err(TunnelError::NtlmChallengeMissing);
        }
        let token = block
            .challenge
            .as_deref()
            .ok_or(TunnelError::NtlmChallengeMissing)?;
        self.ntlm.set_challenge_from_header(&format!("NTLM {token}"))?;
        let authenticate = self.ntlm.get_authenticate_header()?;
        self.advance(NtlmRoundState::HaveChallenge);
        Ok(authenticate)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fixed {
    //! Canned NTLM context for exercising the handshake without credentials.

    use super::{NtlmContext, NtlmError};

    #[derive(Debug, Clone)]
    pub struct FixedNtlmContext {
        negotiate: String,
        authenticate: String,
        challenges: Vec<String>,
    }

    impl FixedNtlmContext {
        pub fn new(negotiate: impl Into<String>, authenticate: impl Into<String>) -> Self {
            Self {
                negotiate: negotiate.into(),
                authenticate: authenticate.into(),
                challenges: Vec::new(),
            }
        }

        /// Every challenge header value received, in order.
        pub fn challenges(&self) -> &[String] {
            &self.challenges
        }
    }

    impl NtlmContext for FixedNtlmContext {
        fn get_negotiate_header(&mut self) -> Result<String, NtlmError> {
            Ok(self.negotiate.clone())
        }

        fn set_challenge_from_header(&mut self, header_value: &str) -> Result<(), NtlmError> {
            self.challenges.push(header_value.to_string());
            Ok(())
        }

        fn get_authenticate_header(&mut self) -> Result<String, NtlmError> {
            if self.challenges.is_empty() {
                return Err(NtlmError::NoChallenge);
            }
            Ok(self.authenticate.clone())
        }
    }
}
