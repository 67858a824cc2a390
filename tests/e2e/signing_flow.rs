//! End-to-end cosigning of a 2-of-3 sorted multisig wallet.
//!
//! Flow:
//! 1. Three parties derive master keys from mnemonics
//! 2. Each publishes an account xpub with its master fingerprint
//! 3. The wallet descriptor's addresses match our multisig scripts
//! 4. A coordinator builds a spend with change
//! 5. We verify change using only account xpubs for the cosigners
//! 6. Two parties sign, the PSBT finalizes and extracts

use bitcoin::psbt::Output;
use bitcoin::{Address, Network, ScriptBuf};
use cosign_core::{parse_mnemonic, HdKey};
use cosign_descriptor::Descriptor;
use cosign_psbt::test_utils::{
    build_psbt, external_txout, raw_wallet_input, raw_wallet_output, wallet_script,
    ACCOUNT_PATH, CHANGE, RECEIVE,
};
use cosign_psbt::Psbt;
use std::str::FromStr;

const ALICE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
const BOB: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";
const CAROL: &str = "letter advice cage absurd amount doctor acoustic avoid letter advice cage above";

fn master(words: &str) -> HdKey {
    let mnemonic = parse_mnemonic(words).unwrap();
    HdKey::from_mnemonic(&mnemonic, "", Network::Testnet).unwrap()
}

/// What a cosigner shares: account xpub tagged with its master fingerprint.
fn published_account(master: &HdKey) -> HdKey {
    let account = master.derive(&ACCOUNT_PATH.parse().unwrap()).unwrap();
    HdKey::from_xpub(account.xpub())
        .with_master_fingerprint(master.master_fingerprint().unwrap())
        .unwrap()
}

fn wallet_descriptor(masters: &[HdKey]) -> Descriptor {
    let keys: Vec<String> = masters
        .iter()
        .map(|m| {
            let account = published_account(m);
            format!(
                "[{}/48h/1h/0h/2h]{}/0/*",
                account.master_fingerprint().unwrap(),
                account
            )
        })
        .collect();
    let body = format!("wsh(sortedmulti(2,{}))", keys.join(","));
    let checksummed = miniscript::Descriptor::<miniscript::DescriptorPublicKey>::from_str(&body)
        .unwrap()
        .to_string();
    Descriptor::new(&checksummed, Network::Testnet).unwrap()
}

#[test]
fn test_descriptor_addresses_match_wallet_scripts() {
    let masters = [master(ALICE), master(BOB), master(CAROL)];
    let descriptor = wallet_descriptor(&masters);
    assert!(descriptor.is_ranged());

    for index in [0, 1, 17] {
        let script = wallet_script(&masters, 2, RECEIVE, index);
        let expected =
            Address::from_script(&ScriptBuf::new_p2wsh(&script.wscript_hash()), Network::Testnet)
                .unwrap();
        assert_eq!(descriptor.address_at(index).unwrap(), expected);
    }
}

#[test]
fn test_full_cosigning_flow() {
    let (alice, bob, carol) = (master(ALICE), master(BOB), master(CAROL));
    let masters = [alice, bob, carol];

    // Coordinator: spend two receive UTXOs, pay out, send change to 1/4
    let unsigned = build_psbt(
        vec![
            raw_wallet_input(&masters, 2, 0, 120_000),
            raw_wallet_input(&masters, 2, 3, 80_000),
        ],
        vec![
            (external_txout(150_000), Output::default()),
            raw_wallet_output(&masters, 2, CHANGE, 4, 48_500),
        ],
        Network::Testnet,
    )
    .to_base64();

    // Alice reviews with only the published cosigner keys
    let cosigners = [published_account(&bob), published_account(&carol)];
    let mut psbt = Psbt::from_base64(&unsigned, Network::Testnet).unwrap();
    assert_eq!(psbt.change_outputs(&alice, &cosigners, 2), vec![1]);
    assert_eq!(psbt.fee().unwrap(), Some(bitcoin::Amount::from_sat(1_500)));

    // Wrong policy assumptions never see change
    assert!(psbt.change_outputs(&alice, &cosigners, 3).is_empty());
    assert!(psbt.change_outputs(&alice, &cosigners[..1], 2).is_empty());

    assert_eq!(psbt.sign(&alice).unwrap(), 2);
    assert!(!psbt.is_complete());
    let half_signed = psbt.to_base64();

    // Carol signs from her own copy
    let mut psbt = Psbt::from_base64(&half_signed, Network::Testnet).unwrap();
    let carol_view = [published_account(&alice), published_account(&bob)];
    assert_eq!(psbt.change_outputs(&carol, &carol_view, 2), vec![1]);
    assert_eq!(psbt.sign(&carol).unwrap(), 2);

    assert!(psbt.finalize());
    assert!(psbt.is_complete());
    let tx = psbt.final_transaction().unwrap();
    assert_eq!(tx.input.len(), 2);
    assert_eq!(tx.output.len(), 2);
    for txin in &tx.input {
        // OP_0, two signatures, witness script
        assert_eq!(txin.witness.len(), 4);
    }
}

#[test]
fn test_account_level_signer() {
    let (alice, bob) = (master(ALICE), master(BOB));
    let masters = [alice, bob];
    let mut psbt = build_psbt(
        vec![raw_wallet_input(&masters, 2, 9, 10_000)],
        vec![raw_wallet_output(&masters, 2, CHANGE, 9, 9_000)],
        Network::Testnet,
    );

    // Alice keeps only her account xprv; it still carries the master fingerprint
    let account = alice.derive(&ACCOUNT_PATH.parse().unwrap()).unwrap();
    assert_eq!(account.master_fingerprint(), alice.master_fingerprint());

    assert_eq!(psbt.change_outputs(&account, &[published_account(&bob)], 2), vec![0]);
    assert_eq!(psbt.sign(&account).unwrap(), 1);
    assert_eq!(psbt.sign(&bob).unwrap(), 1);
    assert!(psbt.finalize());
    assert!(psbt.is_complete());
}
