//! Fuzz test for mapping lists
//!
//! Builds arbitrary mapping lists and checks that deduplication always
//! yields a list the validator and the codec agree on.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use rift_core::Mapping;
use rift_core::mapping::{check_mappings, decode_mappings, encode_mappings, strip_duplicates};

#[derive(Debug, Arbitrary)]
struct Input {
    triples: Vec<(u16, u16, u16)>,
    text: String,
}

fuzz_target!(|input: Input| {
    let _ = decode_mappings(&input.text);

    let mappings: Vec<Mapping> = input
        .triples
        .iter()
        .map(|&(local, reply, remote)| Mapping::new(local, reply, remote))
        .collect();
    let unique = strip_duplicates(mappings.clone());
    assert!(unique.len() <= mappings.len());

    if check_mappings(&unique).is_ok() {
        let decoded = decode_mappings(&encode_mappings(&unique)).expect("valid list must decode");
        assert_eq!(decoded, unique);
    }
});
