//! Adversarial coordinator tests.
//!
//! These tests verify:
//! 1. Malformed inputs are rejected without panicking
//! 2. Lying key origins never make us sign or accept change
//! 3. Change outputs cannot be redirected by swapping scripts

use bitcoin::psbt::Output;
use bitcoin::{Network, ScriptBuf, TxOut};
use cosign_core::{DerivationPath, HdKey, PathError};
use cosign_psbt::test_utils::{
    build_psbt, external_txout, origin_for, raw_wallet_input, raw_wallet_output, wallet_key,
    wallet_path, CHANGE,
};
use cosign_psbt::{sorted_multisig_script, KeyOrigin, ParseError, Psbt};

// ============================================================================
// 1. Malformed input
// ============================================================================

#[test]
fn test_random_psbt_bytes_do_not_panic() {
    let mut state = 0x2545_f491_u32;
    for len in 0..200usize {
        let mut bytes = b"psbt\xff".to_vec();
        for _ in 0..len {
            // xorshift
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            bytes.push(state as u8);
        }
        let _ = Psbt::from_bytes(&bytes, Network::Testnet);
        let _ = Psbt::from_bytes(&bytes[5..], Network::Testnet);
    }
}

#[test]
fn test_truncated_psbt_rejected() {
    let psbt = build_psbt(
        vec![raw_wallet_input(&[wallet_key(1), wallet_key(2)], 2, 0, 10_000)],
        vec![(external_txout(9_000), Output::default())],
        Network::Testnet,
    );
    let bytes = psbt.serialize();
    for cut in [1, 5, bytes.len() / 2, bytes.len() - 1] {
        assert!(matches!(
            Psbt::from_bytes(&bytes[..cut], Network::Testnet),
            Err(ParseError::Invalid(_))
        ));
    }
}

#[test]
fn test_malformed_paths_and_origins() {
    for bad in ["m/1/", "m/4294967296", "M/1", "m/1'h", "m/0x10"] {
        assert!(bad.parse::<DerivationPath>().is_err(), "{bad:?}");
    }
    assert_eq!(
        "m/2147483648".parse::<DerivationPath>(),
        Err(PathError::InvalidIndex(2147483648))
    );
    for len in 0..4 {
        assert!(KeyOrigin::decode(&vec![0u8; len]).is_err());
    }
    assert!(KeyOrigin::decode(&[0u8; 9]).is_err());
}

#[test]
fn test_garbage_extended_keys() {
    for bad in ["", "xpub", "tpub661MyMwAqRbc", "not a key at all"] {
        assert!(bad.parse::<HdKey>().is_err(), "{bad:?}");
    }
}

// ============================================================================
// 2. Lying key origins
// ============================================================================

#[test]
fn test_our_fingerprint_on_foreign_key_is_not_signed() {
    let (signer, cosigner) = (wallet_key(1), wallet_key(2));
    let mut input = raw_wallet_input(&[signer, cosigner], 2, 0, 10_000);

    // Coordinator relabels the cosigner's key with our fingerprint
    let fingerprint = signer.master_fingerprint().unwrap();
    for (_, source) in input.bip32_derivation.iter_mut() {
        source.0 = fingerprint;
    }

    let mut psbt = build_psbt(
        vec![input],
        vec![(external_txout(9_000), Output::default())],
        Network::Testnet,
    );
    // Only our real key is re-derived and matched
    assert_eq!(psbt.sign(&signer).unwrap(), 1);
    assert!(psbt.change_outputs(&signer, &[cosigner], 2).is_empty());
}

#[test]
fn test_change_with_attacker_key_rejected() {
    let (signer, cosigner, attacker) = (wallet_key(1), wallet_key(2), wallet_key(66));
    let wallet = [signer, cosigner];

    // Attacker replaces the cosigner's change key with their own but keeps
    // the cosigner's fingerprint and path
    let (signer_pk, signer_origin) = origin_for(&signer, &wallet_path(CHANGE, 2));
    let (cosigner_pk, _) = origin_for(&cosigner, &wallet_path(CHANGE, 2));
    let (attacker_pk, _) = origin_for(&attacker, &wallet_path(CHANGE, 2));
    let script = sorted_multisig_script(2, &[signer_pk, attacker_pk]).unwrap();

    let mut output = Output {
        witness_script: Some(script.clone()),
        ..Default::default()
    };
    output
        .bip32_derivation
        .insert(signer_pk, signer_origin.to_key_source());
    output.bip32_derivation.insert(
        attacker_pk,
        KeyOrigin::new(cosigner.master_fingerprint().unwrap(), wallet_path(CHANGE, 2).parse().unwrap())
            .to_key_source(),
    );
    assert_ne!(attacker_pk, cosigner_pk);

    let psbt = build_psbt(
        vec![raw_wallet_input(&wallet, 2, 0, 10_000)],
        vec![(
            TxOut {
                value: bitcoin::Amount::from_sat(9_000),
                script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
            },
            output,
        )],
        Network::Testnet,
    );
    assert!(psbt.change_outputs(&signer, &[cosigner], 2).is_empty());
}

// ============================================================================
// 3. Script swaps
// ============================================================================

#[test]
fn test_change_metadata_on_foreign_script_rejected() {
    let (signer, cosigner) = (wallet_key(1), wallet_key(2));
    let wallet = [signer, cosigner];

    // Honest change metadata, but the amount goes to someone else's address
    let (_, honest_output) = raw_wallet_output(&wallet, 2, CHANGE, 5, 9_000);
    let psbt = build_psbt(
        vec![raw_wallet_input(&wallet, 2, 0, 10_000)],
        vec![(external_txout(9_000), honest_output)],
        Network::Testnet,
    );
    assert!(psbt.change_outputs(&signer, &[cosigner], 2).is_empty());
}

#[test]
fn test_change_metadata_without_witness_script_rejected() {
    let (signer, cosigner) = (wallet_key(1), wallet_key(2));
    let wallet = [signer, cosigner];

    let (txout, mut output) = raw_wallet_output(&wallet, 2, CHANGE, 5, 9_000);
    output.witness_script = None;
    let psbt = build_psbt(
        vec![raw_wallet_input(&wallet, 2, 0, 10_000)],
        vec![(txout, output)],
        Network::Testnet,
    );
    // bare P2WSH scriptPubKey is not a multisig script
    assert!(psbt.change_outputs(&signer, &[cosigner], 2).is_empty());
}
