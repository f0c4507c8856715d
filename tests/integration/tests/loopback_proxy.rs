//! Integration tests against a scripted proxy on a loopback socket.
//!
//! Each test spawns a one-connection proxy thread that reads CONNECT requests
//! and answers with canned responses, then runs the real handshake over a
//! `TcpStream`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use connect_tunnel::ntlm::fixed::FixedNtlmContext;
use connect_tunnel::{establish, TunnelConfig, TunnelController, TunnelError, TunnelRequest};

/// Read one request head up to and including the blank line.
fn read_request(reader: &mut BufReader<TcpStream>) -> String {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).unwrap();
        head.push_str(&line);
        if n == 0 || line == "\r\n" {
            return head;
        }
    }
}

/// Spawn a proxy that answers the i-th request with `responses[i]`, then
/// writes `after` and returns every request it saw.
fn spawn_proxy(
    responses: Vec<String>,
    after: &'static [u8],
) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let mut writer = sock.try_clone().unwrap();
        let mut reader = BufReader::new(sock);
        let mut seen = Vec::new();
        for response in responses {
            seen.push(read_request(&mut reader));
            writer.write_all(response.as_bytes()).unwrap();
            writer.flush().unwrap();
        }
        if !after.is_empty() {
            writer.write_all(after).unwrap();
        }
        // Keep the socket open until the client is done reading.
        thread::sleep(Duration::from_millis(300));
        seen
    });
    (addr, handle)
}

fn context() -> FixedNtlmContext {
    FixedNtlmContext::new("NTLM TlRMTVNTUAAB", "NTLM TlRMTVNTUAAD")
}

#[test]
fn test_proxy_without_authentication() {
    let (addr, proxy) = spawn_proxy(
        vec!["HTTP/1.1 200 Connection established\r\n\r\n".to_string()],
        b"\x16\x03\x03",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    establish(&mut sock, TunnelRequest::new("example.com", 443), &mut ctx).unwrap();

    // The bytes right after the header block belong to the tunnel.
    let mut first = [0u8; 3];
    sock.read_exact(&mut first).unwrap();
    assert_eq!(&first, b"\x16\x03\x03");

    let seen = proxy.join().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].starts_with("CONNECT example.com:443 HTTP/1.0\r\n"));
    assert!(seen[0].contains("Host: example.com:443\r\n"));
    assert!(seen[0].contains("Proxy-Connection: Keep-Alive\r\n"));
    assert!(seen[0].contains("Proxy-Authorization: NTLM TlRMTVNTUAAB\r\n"));
}

#[test]
fn test_ntlm_two_round_handshake() {
    let body = "<html>auth required</html>";
    let challenge = format!(
        "HTTP/1.1 407 Proxy Authentication Required\r\n\
         Proxy-Authenticate: NTLM TlRMTVNTUAAC\r\n\
         Content-Length: {}\r\n\r\n{}",
        body.len(),
        body
    );
    let (addr, proxy) = spawn_proxy(
        vec![
            challenge,
            "HTTP/1.1 200 Connection established\r\n\r\n".to_string(),
        ],
        b"",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    let request = TunnelRequest::new("example.com", 443)
        .with_header("User-Agent", "probe/1.0")
        .unwrap();
    establish(&mut sock, request, &mut ctx).unwrap();

    assert_eq!(ctx.challenges(), ["NTLM TlRMTVNTUAAC".to_string()]);
    let seen = proxy.join().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[1].contains("Proxy-Authorization: NTLM TlRMTVNTUAAD\r\n"));
    assert!(seen[1].contains("User-Agent: probe/1.0\r\n"));
}

#[test]
fn test_challenge_without_content_length_ends_on_idle() {
    let (addr, proxy) = spawn_proxy(
        vec![
            "HTTP/1.1 407 Proxy Authentication Required\r\n\
             Proxy-Authenticate: NTLM TlRMTVNTUAAC\r\n\r\n"
                .to_string(),
            "HTTP/1.1 200 Connection established\r\n\r\n".to_string(),
        ],
        b"",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    establish(&mut sock, TunnelRequest::new("example.com", 443), &mut ctx).unwrap();
    assert_eq!(proxy.join().unwrap().len(), 2);
}

#[test]
fn test_proxy_rejects_tunnel() {
    let (addr, proxy) = spawn_proxy(
        vec!["HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_string()],
        b"",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    let err = establish(&mut sock, TunnelRequest::new("example.com", 443), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, TunnelError::TunnelRejected(403, ref m) if m == "Forbidden"));
    assert_eq!(err.status_code(), Some(403));
    proxy.join().unwrap();
}

#[test]
fn test_http09_response_recovered() {
    let (addr, proxy) = spawn_proxy(
        vec!["200 OK\r\nHTTP/1.0 200 Connection established\r\n\r\n".to_string()],
        b"",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    establish(&mut sock, TunnelRequest::new("example.com", 443), &mut ctx).unwrap();
    proxy.join().unwrap();
}

#[test]
fn test_http11_request_line_and_timeout_restored() {
    let (addr, proxy) = spawn_proxy(
        vec!["HTTP/1.1 200 OK\r\n\r\n".to_string()],
        b"",
    );
    let mut sock = TcpStream::connect(addr).unwrap();
    sock.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let config = TunnelConfig {
        http_version: "HTTP/1.1".to_string(),
        ..TunnelConfig::default()
    };
    let request = config.request("::1", 8443);
    let mut ctx = context();
    TunnelController::new(config)
        .establish(&mut sock, request, &mut ctx)
        .unwrap();

    assert_eq!(sock.read_timeout().unwrap(), Some(Duration::from_secs(5)));
    let seen = proxy.join().unwrap();
    assert!(seen[0].starts_with("CONNECT [::1]:8443 HTTP/1.1\r\n"));
}

#[test]
fn test_proxy_closes_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let proxy = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(sock);
        read_request(&mut reader);
        // dropped without answering
    });
    let mut sock = TcpStream::connect(addr).unwrap();
    let mut ctx = context();
    let err = establish(&mut sock, TunnelRequest::new("example.com", 443), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, TunnelError::ConnectionClosed));
    proxy.join().unwrap();
}
