#![no_main]
use arbitrary::Arbitrary;
use connect_tunnel::ntlm::fixed::FixedNtlmContext;
use connect_tunnel::stream::scripted::ScriptedStream;
use connect_tunnel::{TunnelConfig, TunnelController, TunnelRequest};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Chunk {
    Data(Vec<u8>),
    Idle,
}

#[derive(Debug, Arbitrary)]
struct Input {
    chunks: Vec<Chunk>,
    max_line_len: u16,
}

fuzz_target!(|inp: Input| {
    let mut stream = ScriptedStream::new();
    for chunk in inp.chunks {
        stream = match chunk {
            Chunk::Data(bytes) => stream.data(bytes),
            Chunk::Idle => stream.idle(),
        };
    }
    let config = TunnelConfig {
        max_line_len: usize::from(inp.max_line_len).max(16),
        ..TunnelConfig::default()
    };
    let mut ctx = FixedNtlmContext::new("NTLM TlRMTVNTUAAB", "NTLM TlRMTVNTUAAD");

    // Any byte sequence must end in Ok or a defined error, never a panic,
    // and never more than two CONNECT requests.
    let _ = TunnelController::new(config).establish(
        &mut stream,
        TunnelRequest::new("example.com", 443),
        &mut ctx,
    );
    assert!(stream.writes().len() <= 2);
});
