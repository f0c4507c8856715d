//! Response reading through the public component API, driven by an in-memory
//! proxy script.

use connect_tunnel::headers::{read_header_block, BodyPolicy};
use connect_tunnel::ntlm::fixed::FixedNtlmContext;
use connect_tunnel::ntlm::NextStep;
use connect_tunnel::status::read_status_line;
use connect_tunnel::stream::scripted::ScriptedStream;
use connect_tunnel::{
    HeaderAccumulator, HeaderEvent, LineReader, NtlmHandshakeDriver, NtlmRoundState,
    TunnelConfig, TunnelController, TunnelError, TunnelRequest, MAX_LINE,
};

#[test]
fn test_components_walk_a_challenge_response() {
    let mut stream = ScriptedStream::new()
        .data("HTTP/1.1 407 Proxy Authentication Required\r\n")
        .data("Proxy-Authenticate: NTLM TlRMTVNTUAAC\r\n")
        .data("Content-Length: 4\r\n\r\nnope")
        .data("HTTP/1.1 200 Connection established\r\n\r\n");
    let mut ctx = FixedNtlmContext::new("NTLM neg", "NTLM auth");
    let mut driver = NtlmHandshakeDriver::new(&mut ctx);

    let mut reader = LineReader::new(&mut stream, MAX_LINE);
    let status = read_status_line(&mut reader, 64).unwrap();
    assert_eq!(driver.on_status(&status).unwrap(), NextStep::ReadChallenge);

    let block = read_header_block(&mut reader, BodyPolicy::Consume).unwrap();
    assert_eq!(block.content_length, Some(4));
    assert_eq!(block.body_bytes, 4);
    assert_eq!(driver.on_challenge(&block).unwrap(), "NTLM auth");

    let status = read_status_line(&mut reader, 64).unwrap();
    assert_eq!(driver.on_status(&status).unwrap(), NextStep::Established);
    assert_eq!(driver.state(), NtlmRoundState::Authenticated);
}

#[test]
fn test_accumulator_events_in_order() {
    let mut acc = HeaderAccumulator::new();
    let lines: [&[u8]; 4] = [
        b"Via: 1.1 squid\r\n",
        b"Proxy-Authenticate: NTLM abc\r\n",
        b"\r\n",
        b"body\r\n",
    ];
    let events: Vec<HeaderEvent> = lines
        .iter()
        .map(|line| acc.feed(line))
        .collect();

    assert_eq!(
        events,
        vec![
            HeaderEvent::Header("Via".to_string(), "1.1 squid".to_string()),
            HeaderEvent::ProxyAuthenticateChallenge("abc".to_string()),
            HeaderEvent::BlankLine,
            HeaderEvent::BodyByteCountUpdate(6),
        ]
    );
    assert!(!acc.is_complete());
    acc.feed_idle();
    assert!(!acc.is_complete());
    acc.feed_idle();
    assert!(acc.is_complete());
}

#[test]
fn test_challenge_split_across_idle_polls() {
    let mut stream = ScriptedStream::new()
        .data("HTTP/1.1 407 Proxy Authentication Required\r\nProxy-Authen")
        .idle()
        .data("ticate: NTLM TlRMTVNTUAAC\r\n\r\n")
        .idle()
        .data("HTTP/1.1 200 OK\r\n\r\n");
    let mut ctx = FixedNtlmContext::new("NTLM neg", "NTLM auth");
    TunnelController::default()
        .establish(&mut stream, TunnelRequest::new("example.com", 443), &mut ctx)
        .unwrap();
    assert_eq!(ctx.challenges(), ["NTLM TlRMTVNTUAAC".to_string()]);
}

#[test]
fn test_recovery_budget_is_bounded() {
    let mut script = ScriptedStream::new().data("garbage\r\n");
    for _ in 0..8 {
        script = script.data("still garbage\r\n");
    }
    let mut stream = script.data("HTTP/1.1 200 OK\r\n\r\n");
    let config = TunnelConfig {
        max_recovery_lines: 4,
        ..TunnelConfig::default()
    };
    let mut ctx = FixedNtlmContext::new("NTLM neg", "NTLM auth");
    let err = TunnelController::new(config)
        .establish(&mut stream, TunnelRequest::new("example.com", 443), &mut ctx)
        .unwrap_err();
    assert!(matches!(err, TunnelError::MalformedStatusLine));
}
