#![no_main]

use bitcoin::Network;
use cosign_psbt::{KeyOrigin, Psbt};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = KeyOrigin::decode(data);

    // A decoded PSBT must re-encode to something that decodes to the same PSBT.
    if let Ok(psbt) = Psbt::from_bytes(data, Network::Testnet) {
        let again = Psbt::from_bytes(&psbt.serialize(), Network::Testnet);
        assert_eq!(again.as_ref(), Ok(&psbt));
        let _ = psbt.fee();
    }
});
