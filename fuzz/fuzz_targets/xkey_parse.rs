#![no_main]

use cosign_core::HdKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary text as an extended key must never panic, and a parsed
    // key must survive public derivation of a normal child.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(key) = s.parse::<HdKey>() {
            let _ = key.derive(&"m/0/1".parse().unwrap());
            let _ = key.neutered().derive(&"m/0h".parse().unwrap());
        }
    }
});
