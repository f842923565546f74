//! Fuzz test for configuration file parsing
//!
//! Tests that arbitrary TOML input doesn't cause panics or crashes when
//! parsed as RIFT engine configuration.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rift_core::{PunchConfig, RiftConfig};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _: Result<toml::Value, _> = toml::from_str(s);

        // Invalid configs fail, but must not panic
        let _: Result<RiftConfig, _> = toml::from_str(s);
        let _: Result<PunchConfig, _> = toml::from_str(s);
    }
});
