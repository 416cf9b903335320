#![no_main]

use libfuzzer_sys::fuzz_target;
use tunconf_core::model::{build_set_request, decode_config};
use tunconf_core::proto::BufferWalker;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics
    if let Ok(peers) = BufferWalker::new(data).peers() {
        for entry in peers.flatten() {
            for _ in entry.allowed_ips() {}
        }
    }

    // Whatever decodes must encode back to a buffer that decodes the same
    if let Ok(config) = decode_config(data) {
        let buffer = build_set_request(&config.interface, &config.peers).unwrap();
        assert_eq!(decode_config(buffer.as_bytes()).unwrap(), config);
    }
});
