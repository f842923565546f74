//! Fuzz test for punch message parsing
//!
//! Tests that arbitrary signaling payloads don't cause panics, and that any
//! accepted message re-encodes to an equivalent one.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rift_punch::PunchMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = PunchMessage::from_bytes(data, 5) {
        let encoded = message.encode();
        let reparsed = PunchMessage::parse(&encoded, 5).expect("encoded message must parse");
        assert_eq!(reparsed.kind, message.kind);
        assert_eq!(reparsed.pipe_id, message.pipe_id);
        assert_eq!(reparsed.session_id, message.session_id);
        assert_eq!(reparsed.mappings, message.mappings);
    }
});
