//! CONNECT request construction.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;

pub const PROXY_AUTHORIZATION: &str = "Proxy-Authorization";
const PROXY_CONNECTION: &str = "Proxy-Connection";
const HOST: &str = "Host";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    #[default]
    #[serde(rename = "HTTP/1.0")]
    Http10,
    #[serde(rename = "HTTP/1.1")]
    Http11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }
}

impl FromStr for HttpVersion {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "HTTP/1.0" => Ok(HttpVersion::Http10),
            "HTTP/1.1" => Ok(HttpVersion::Http11),
            other => Err(ConfigError::UnsupportedHttpVersion(other.to_string())),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse "host:port" string into components.
///
/// IPv6 literals may be bracketed (`[::1]:443`).
pub fn parse_host_port(target: &str) -> Result<(String, u16), ConfigError> {
    let invalid = || ConfigError::InvalidTarget(target.to_string());

    // rsplit keeps IPv6 colons on the host side
    let (host, port_str) = target.rsplit_once(':').ok_or_else(invalid)?;
    let port: u16 = port_str.parse().map_err(|_| invalid())?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}

/// One tunnel attempt: where to connect and what to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    host: String,
    port: u16,
    version: HttpVersion,
    headers: Vec<(String, String)>,
    proxy_authorization: Option<String>,
}

impl TunnelRequest {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            version: HttpVersion::default(),
            headers: Vec::new(),
            proxy_authorization: None,
        }
    }

    pub fn from_target(target: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_host_port(target)?;
        Ok(Self::new(host, port))
    }

    pub fn with_version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    /// Add an extra header; a header of the same name is replaced in place.
    pub fn with_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let value = value.into();
        if name.is_empty() || name.bytes().any(|b| b == b':' || b.is_ascii_whitespace()) {
            return Err(ConfigError::InvalidHeader {
                name,
                reason: "not a valid header name".to_string(),
            });
        }
        if value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ConfigError::InvalidHeader {
                name,
                reason: "value contains a line break".to_string(),
            });
        }

        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
        Ok(self)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn version(&self) -> HttpVersion {
        self.version
    }

    pub fn proxy_authorization(&self) -> Option<&str> {
        self.proxy_authorization.as_deref()
    }

    pub fn set_proxy_authorization(&mut self, value: Option<String>) {
        self.proxy_authorization = value;
    }

    /// `host:port` as it appears on the request line and in `Host`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn request_line(&self) -> String {
        format!("CONNECT {} {}\r\n", self.authority(), self.version)
    }

    /// Extra headers plus the injected ones, sorted by name.
    pub fn headers(&self) -> Vec<(String, String)> {
        let injected: Vec<(&str, String)> = [
            Some((HOST, self.authority())),
            Some((PROXY_CONNECTION, "Keep-Alive".to_string())),
            self.proxy_authorization
                .clone()
                .map(|token| (PROXY_AUTHORIZATION, token)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .filter(|(name, _)| {
                !injected
                    .iter()
                    .any(|(injected_name, _)| name.eq_ignore_ascii_case(injected_name))
            })
            .cloned()
            .collect();
        headers.extend(
            injected
                .into_iter()
                .map(|(name, value)| (name.to_string(), value)),
        );
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        headers
    }

    /// Serialize the CONNECT request for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        let request_line = self.request_line();
        debug!(line = %request_line.trim_end(), "> request line");
        let mut out = request_line;
        for (name, value) in self.headers() {
            if name == PROXY_AUTHORIZATION {
                debug!(%name, value_len = value.len(), "> header");
            } else {
                debug!(%name, %value, "> header");
            }
            out.push_str(&name);
            out.push_str(": ");
            out.push_str(&value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out.into_bytes()
    }
}
