#![no_main]

use cosign_core::DerivationPath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any path that parses must re-render to a string that parses back to itself.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(path) = s.parse::<DerivationPath>() {
            let rendered = path.to_string();
            assert_eq!(rendered.parse::<DerivationPath>().as_ref(), Ok(&path));
            assert_eq!(DerivationPath::from_raw(&path.to_raw()), path);
        }
    }
});
