//! Fuzz test for peer address decoding
//!
//! Feeds arbitrary input to both the text and the binary decoder. Anything
//! that decodes must survive a trip through the other form unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rift_core::PeerAddr;

const SIGNAL_SERVERS: usize = 5;

fuzz_target!(|data: &[u8]| {
    if let Ok(addr) = PeerAddr::from_bytes(data, SIGNAL_SERVERS) {
        let text = addr.to_string();
        let reparsed = PeerAddr::parse(&text, SIGNAL_SERVERS).expect("encoded text must parse");
        // The text form drops address indices
        assert_eq!(reparsed.node_id, addr.node_id);
        assert_eq!(reparsed.signal, addr.signal);
        assert_eq!(reparsed.v4.len(), addr.v4.len());
        assert_eq!(reparsed.v6.len(), addr.v6.len());
    }

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(addr) = PeerAddr::parse(s, SIGNAL_SERVERS) {
            let bytes = addr.to_bytes().expect("valid address must encode");
            let decoded = PeerAddr::from_bytes(&bytes, SIGNAL_SERVERS).expect("encoded bytes must decode");
            assert_eq!(decoded, addr);
        }

        // Hex input as accepted on the command line
        if let Ok(bytes) = hex::decode(s.trim()) {
            let _ = PeerAddr::from_bytes(&bytes, SIGNAL_SERVERS);
        }
    }
});
