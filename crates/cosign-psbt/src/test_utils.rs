//! Deterministic wallet and PSBT fixtures
//!
//! Wallet keys are master keys built from a repeated seed byte on testnet, so
//! every fixture is reproducible without touching a mnemonic. Wallet scripts
//! are P2WSH sorted multisig under `m/48h/1h/0h/2h/{branch}/{index}`.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash as _;
use bitcoin::psbt;
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, CompressedPublicKey, Network, OutPoint, ScriptBuf, Sequence, Transaction, TxIn,
    TxOut, Txid, Witness,
};
use cosign_core::HdKey;

use crate::origin::{KeyOrigin, KeyOrigins};
use crate::psbt::Psbt;
use crate::script::sorted_multisig_script;

pub const ACCOUNT_PATH: &str = "m/48h/1h/0h/2h";
pub const RECEIVE: u32 = 0;
pub const CHANGE: u32 = 1;

/// Testnet master key from a 32-byte seed of `seed_byte`.
pub fn wallet_key(seed_byte: u8) -> HdKey {
    HdKey::from_seed(&[seed_byte; 32], Network::Testnet).unwrap()
}

/// Public key and origin of `master` at `path`.
pub fn origin_for(master: &HdKey, path: &str) -> (PublicKey, KeyOrigin) {
    let path = path.parse().unwrap();
    let child = master.derive_origin(&path).unwrap();
    (
        child.public_key(),
        KeyOrigin::new(master.master_fingerprint().unwrap(), path),
    )
}

pub fn wallet_path(branch: u32, index: u32) -> String {
    format!("{}/{}/{}", ACCOUNT_PATH, branch, index)
}

/// Origins of every wallet key at `branch/index`.
pub fn wallet_origins(keys: &[HdKey], branch: u32, index: u32) -> KeyOrigins {
    keys.iter()
        .map(|key| origin_for(key, &wallet_path(branch, index)))
        .collect()
}

/// Sorted multisig witness script at `branch/index`.
pub fn wallet_script(keys: &[HdKey], threshold: usize, branch: u32, index: u32) -> ScriptBuf {
    let pubkeys: Vec<PublicKey> = wallet_origins(keys, branch, index).into_keys().collect();
    sorted_multisig_script(threshold, &pubkeys).unwrap()
}

pub fn outpoint(n: u8) -> OutPoint {
    OutPoint {
        txid: Txid::from_byte_array([n; 32]),
        vout: u32::from(n),
    }
}

/// A P2WPKH output to a key outside every fixture wallet.
pub fn external_txout(sats: u64) -> TxOut {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(&[0xee; 32]).unwrap();
    let pk = CompressedPublicKey(PublicKey::from_secret_key(&secp, &sk));
    TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::new_p2wpkh(&pk.wpubkey_hash()),
    }
}

/// PSBT input spending a wallet receive address.
pub fn raw_wallet_input(keys: &[HdKey], threshold: usize, index: u32, sats: u64) -> psbt::Input {
    let script = wallet_script(keys, threshold, RECEIVE, index);
    psbt::Input {
        witness_utxo: Some(TxOut {
            value: Amount::from_sat(sats),
            script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
        }),
        witness_script: Some(script),
        bip32_derivation: wallet_origins(keys, RECEIVE, index)
            .into_iter()
            .map(|(pubkey, origin)| (pubkey, origin.to_key_source()))
            .collect(),
        ..Default::default()
    }
}

/// PSBT output paying a wallet address, with full metadata.
pub fn raw_wallet_output(
    keys: &[HdKey],
    threshold: usize,
    branch: u32,
    index: u32,
    sats: u64,
) -> (TxOut, psbt::Output) {
    let script = wallet_script(keys, threshold, branch, index);
    let txout = TxOut {
        value: Amount::from_sat(sats),
        script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
    };
    let output = psbt::Output {
        witness_script: Some(script),
        bip32_derivation: wallet_origins(keys, branch, index)
            .into_iter()
            .map(|(pubkey, origin)| (pubkey, origin.to_key_source()))
            .collect(),
        ..Default::default()
    };
    (txout, output)
}

/// Assemble a PSBT; input `i` spends `outpoint(i + 1)`.
pub fn build_psbt(
    inputs: Vec<psbt::Input>,
    outputs: Vec<(TxOut, psbt::Output)>,
    network: Network,
) -> Psbt {
    let (txouts, psbt_outputs): (Vec<_>, Vec<_>) = outputs.into_iter().unzip();
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: (0..inputs.len())
            .map(|i| TxIn {
                previous_output: outpoint(i as u8 + 1),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: txouts,
    };

    let mut raw = psbt::Psbt::from_unsigned_tx(tx).unwrap();
    raw.inputs = inputs;
    raw.outputs = psbt_outputs;
    Psbt::from_raw(raw, network).unwrap()
}

/// Two-input 2-of-2 spend: 60k + 40k in, 70k external, 29k change at `1/7`.
pub fn two_of_two_spend(signer: &HdKey, cosigner: &HdKey) -> Psbt {
    let keys = [*signer, *cosigner];
    build_psbt(
        vec![
            raw_wallet_input(&keys, 2, 0, 60_000),
            raw_wallet_input(&keys, 2, 1, 40_000),
        ],
        vec![
            (external_txout(70_000), psbt::Output::default()),
            raw_wallet_output(&keys, 2, CHANGE, 7, 29_000),
        ],
        Network::Testnet,
    )
}
