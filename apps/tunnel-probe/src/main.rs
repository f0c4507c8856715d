mod helper;

use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use connect_tunnel::{TunnelConfig, TunnelController, TunnelRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::helper::{HelperOptions, NtlmAuthHelper};

/// Open an NTLM-authenticated CONNECT tunnel and report whether it succeeded.
#[derive(Parser, Debug)]
#[command(name = "tunnel-probe", version)]
struct Cli {
    /// Proxy address (host:port)
    #[arg(long, env = "TUNNEL_PROXY")]
    proxy: String,

    /// Tunnel target (host:port)
    #[arg(long)]
    target: String,

    /// CONNECT protocol version (HTTP/1.0 or HTTP/1.1)
    #[arg(long)]
    http_version: Option<String>,

    /// Extra request header, repeatable
    #[arg(long = "header", value_name = "NAME=VALUE")]
    headers: Vec<String>,

    /// TOML config file; environment variables are used when absent
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "NTLM_USER")]
    username: String,

    #[arg(long, env = "NTLM_DOMAIN")]
    domain: Option<String>,

    /// Defaults to the upper-cased host name
    #[arg(long)]
    workstation: Option<String>,

    /// Path of the Samba `ntlm_auth` binary
    #[arg(long, default_value = "ntlm_auth")]
    helper: PathBuf,

    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,
}

fn default_workstation() -> Option<String> {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_uppercase())
}

fn build_request(cli: &Cli, config: &TunnelConfig) -> Result<TunnelRequest> {
    let mut request = TunnelRequest::from_target(&cli.target)?.with_version(config.http_version());
    for raw in &cli.headers {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("header must be NAME=VALUE: {raw}"))?;
        request = request.with_header(name.trim(), value.trim())?;
    }
    Ok(request)
}

fn connect(proxy: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = proxy
        .to_socket_addrs()
        .with_context(|| format!("could not resolve proxy {proxy}"))?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    match last_err {
        Some(e) => Err(e).with_context(|| format!("could not connect to proxy {proxy}")),
        None => Err(anyhow!("proxy {proxy} resolved to no addresses")),
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => TunnelConfig::load(path)?,
        None => TunnelConfig::from_env(),
    };
    if let Some(version) = &cli.http_version {
        config.http_version = version.clone();
    }

    let request = build_request(&cli, &config)?;

    let mut ntlm = NtlmAuthHelper::spawn(&HelperOptions {
        program: cli.helper.clone(),
        username: cli.username.clone(),
        domain: cli.domain.clone(),
        workstation: cli.workstation.clone().or_else(default_workstation),
        password: std::env::var("NTLM_PASSWORD").ok(),
    })
    .context("could not start NTLM helper")?;

    let mut stream = connect(&cli.proxy, Duration::from_secs(cli.connect_timeout_secs))?;
    info!(proxy = %cli.proxy, "connected to proxy");

    let authority = request.authority();
    TunnelController::new(config)
        .establish(&mut stream, request, &mut ntlm)
        .context("could not establish proxy tunnel")?;

    info!(target = %authority, proxy = %cli.proxy, "tunnel open");
    println!("tunnel to {authority} open via {}", cli.proxy);
    Ok(())
}
