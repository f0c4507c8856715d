//! NTLM context backed by Samba's `ntlm_auth` in `ntlmssp-client-1` mode.
//!
//! The helper speaks a line protocol on stdin/stdout:
//!
//! ```text
//! > YR                 < YR <base64 type-1>
//! > TT <base64 type-2> < KK <base64 type-3>
//! < PW                 > PW <base64 password>   < OK
//! < BH <reason> | NA <reason>                   (failure)
//! ```

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use base64::Engine;
use connect_tunnel::{NtlmContext, NtlmError};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HelperOptions {
    pub program: PathBuf,
    pub username: String,
    pub domain: Option<String>,
    pub workstation: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
    /// A token blob (`YR`, `KK`, `AF`, `TT`).
    Blob(String),
    PasswordRequested,
    Ok,
    Failed(String),
}

fn parse_reply(line: &str) -> Reply {
    let line = line.trim_end();
    let (code, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    match code {
        "YR" | "KK" | "AF" | "TT" if !rest.is_empty() => Reply::Blob(rest.to_string()),
        "PW" => Reply::PasswordRequested,
        "OK" => Reply::Ok,
        "BH" | "NA" => Reply::Failed(rest.to_string()),
        _ => Reply::Failed(format!("unexpected reply: {line}")),
    }
}

pub struct NtlmAuthHelper {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    password: Option<String>,
    authenticate: Option<String>,
}

impl NtlmAuthHelper {
    pub fn spawn(options: &HelperOptions) -> Result<Self, NtlmError> {
        let mut command = Command::new(&options.program);
        command
            .arg("--helper-protocol=ntlmssp-client-1")
            .arg(format!("--username={}", options.username));
        if let Some(domain) = &options.domain {
            command.arg(format!("--domain={domain}"));
        }
        if let Some(workstation) = &options.workstation {
            command.arg(format!("--workstation={workstation}"));
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        debug!(
            program = %options.program.display(),
            username = %options.username,
            domain = ?options.domain,
            workstation = ?options.workstation,
            "starting NTLM helper"
        );
        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| NtlmError::Helper("helper stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| NtlmError::Helper("helper stdout unavailable".to_string()))?;

        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            password: options.password.clone(),
            authenticate: None,
        })
    }

    fn send(&mut self, line: &str) -> Result<(), NtlmError> {
        writeln!(self.stdin, "{line}")?;
        self.stdin.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Reply, NtlmError> {
        let mut line = String::new();
        if self.stdout.read_line(&mut line)? == 0 {
            return Err(NtlmError::Helper("helper exited".to_string()));
        }
        Ok(parse_reply(&line))
    }

    fn supply_password(&mut self) -> Result<(), NtlmError> {
        let password = self.password.clone().ok_or_else(|| {
            NtlmError::Helper("helper asked for a password but none was configured".to_string())
        })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(password);
        self.send(&format!("PW {encoded}"))?;
        match self.receive()? {
            Reply::Ok => Ok(()),
            Reply::Failed(reason) => Err(NtlmError::Helper(reason)),
            other => Err(NtlmError::Helper(format!(
                "unexpected reply to password: {other:?}"
            ))),
        }
    }

    /// Send a request and return the token blob it produces.
    fn exchange(&mut self, request: &str) -> Result<String, NtlmError> {
        let mut password_sent = false;
        loop {
            self.send(request)?;
            match self.receive()? {
                Reply::Blob(blob) => return Ok(blob),
                Reply::PasswordRequested if !password_sent => {
                    self.supply_password()?;
                    password_sent = true;
                }
                Reply::PasswordRequested => {
                    return Err(NtlmError::Helper("helper rejected the password".to_string()))
                }
                Reply::Ok => {
                    return Err(NtlmError::Helper("helper returned no token".to_string()))
                }
                Reply::Failed(reason) => return Err(NtlmError::Helper(reason)),
            }
        }
    }
}

impl NtlmContext for NtlmAuthHelper {
    fn get_negotiate_header(&mut self) -> Result<String, NtlmError> {
        let blob = self.exchange("YR")?;
        Ok(format!("NTLM {blob}"))
    }

    fn set_challenge_from_header(&mut self, header_value: &str) -> Result<(), NtlmError> {
        let token = header_value
            .trim()
            .strip_prefix("NTLM ")
            .unwrap_or(header_value)
            .trim();
        let blob = self.exchange(&format!("TT {token}"))?;
        self.authenticate = Some(format!("NTLM {blob}"));
        Ok(())
    }

    fn get_authenticate_header(&mut self) -> Result<String, NtlmError> {
        self.authenticate.take().ok_or(NtlmError::NoChallenge)
    }
}

impl Drop for NtlmAuthHelper {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!(error = %e, "failed to stop NTLM helper");
        }
        let _ = self.child.wait();
    }
}
