#![no_main]
use connect_tunnel::status;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // A direct match must also be found by the recovery search.
    if let Some(parsed) = status::parse(data) {
        assert!((100..=999).contains(&parsed.code));
        assert!(status::search(data).is_some());
    }
    let _ = status::search(data);
});
