//! PSBT outputs and change detection
//!
//! An output is only reported as change when every claim it makes can be
//! reproduced from the wallet keys we hold:
//!
//! 1. the spend has inputs and every input carries key origins;
//! 2. the signer can sign every input, and every input origin is a wallet
//!    address (`.../{0|1}/{index}`) that some wallet key derives exactly;
//! 3. the output carries origins, each one a wallet address at a single
//!    shared index no larger than [`MAX_CHANGE_INDEX`], and together they
//!    cover every wallet key;
//! 4. the script the output commits to is exactly the sorted multisig of its
//!    origin keys at the wallet threshold.
//!
//! Anything else is treated as a payment, so a malicious coordinator can at
//! worst make us show change as an external spend.

use bitcoin::psbt;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, Script, ScriptBuf, TxOut};
use cosign_core::{Fingerprint, HdKey};
use std::collections::BTreeSet;

use crate::input::PsbtInput;
use crate::origin::{origins_from_derivation, KeyOrigin, KeyOrigins};
use crate::script::{sorted_multisig_script, ScriptKind};

/// Highest address index accepted for change. Bounds how far a wallet must
/// scan to find funds sent to a change address.
pub const MAX_CHANGE_INDEX: u32 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbtOutput {
    txout: TxOut,
    witness_script: Option<ScriptBuf>,
    redeem_script: Option<ScriptBuf>,
    origins: KeyOrigins,
}

impl PsbtOutput {
    pub fn new(
        txout: TxOut,
        witness_script: Option<ScriptBuf>,
        redeem_script: Option<ScriptBuf>,
        origins: KeyOrigins,
    ) -> Self {
        Self {
            txout,
            witness_script,
            redeem_script,
            origins,
        }
    }

    pub(crate) fn from_psbt(txout: &TxOut, output: &psbt::Output) -> Self {
        Self {
            txout: txout.clone(),
            witness_script: output.witness_script.clone(),
            redeem_script: output.redeem_script.clone(),
            origins: origins_from_derivation(&output.bip32_derivation),
        }
    }

    pub fn amount(&self) -> Amount {
        self.txout.value
    }

    pub fn script_pubkey(&self) -> &Script {
        &self.txout.script_pubkey
    }

    pub fn origins(&self) -> &KeyOrigins {
        &self.origins
    }

    pub fn has_origins(&self) -> bool {
        !self.origins.is_empty()
    }

    /// The script that actually governs spending this output.
    ///
    /// A witness or redeem script is only trusted when the scriptPubKey
    /// commits to it (P2WSH, P2SH-P2WSH or P2SH). Returns `None` when a script
    /// is attached but not committed to.
    pub fn policy_script(&self) -> Option<&Script> {
        let spk = self.script_pubkey();

        if let Some(witness_script) = &self.witness_script {
            let p2wsh = ScriptBuf::new_p2wsh(&witness_script.wscript_hash());
            let nested = self.redeem_script.as_ref() == Some(&p2wsh)
                && *spk == *ScriptBuf::new_p2sh(&p2wsh.script_hash());
            return (*spk == *p2wsh || nested).then_some(witness_script.as_script());
        }

        if let Some(redeem_script) = &self.redeem_script {
            let p2sh = ScriptBuf::new_p2sh(&redeem_script.script_hash());
            return (*spk == *p2sh).then_some(redeem_script.as_script());
        }

        Some(spk)
    }

    /// Classification of [`Self::policy_script`], or [`ScriptKind::Other`]
    /// when the attached scripts are not committed to.
    pub fn script_kind(&self) -> ScriptKind {
        self.policy_script()
            .map(ScriptKind::classify)
            .unwrap_or(ScriptKind::Other)
    }

    /// Whether this output returns funds to the wallet made of `signer` and
    /// `cosigners` with the given multisig `threshold`.
    ///
    /// Never errors: any doubt means "not change".
    pub fn is_change(
        &self,
        signer: &HdKey,
        inputs: &[PsbtInput],
        cosigners: &[HdKey],
        threshold: usize,
    ) -> bool {
        match self.verify_change(signer, inputs, cosigners, threshold) {
            Ok(index) => {
                log::debug!("output {} is change at index {}", self.script_pubkey(), index);
                true
            }
            Err(reason) => {
                log::trace!("output {} is not change: {}", self.script_pubkey(), reason);
                false
            }
        }
    }

    fn verify_change(
        &self,
        signer: &HdKey,
        inputs: &[PsbtInput],
        cosigners: &[HdKey],
        threshold: usize,
    ) -> Result<u32, &'static str> {
        let first_origin = inputs
            .first()
            .ok_or("transaction has no inputs")?
            .origins()
            .values()
            .next()
            .ok_or("input without key origins")?;
        if inputs.iter().any(|input| !input.has_origins()) {
            return Err("input without key origins");
        }

        let root = first_origin
            .path
            .ancestor(2)
            .ok_or("input origin path shorter than two components")?;
        log::trace!("wallet root {}", root);

        for input in inputs {
            if input.can_sign(signer).is_none() {
                return Err("signer cannot sign every input");
            }
            for (pubkey, origin) in input.origins() {
                wallet_address_index(pubkey, origin, signer, cosigners)?;
            }
        }

        if !self.has_origins() {
            return Err("output without key origins");
        }

        let mut change_index = None;
        for (pubkey, origin) in &self.origins {
            let index = wallet_address_index(pubkey, origin, signer, cosigners)?;
            if index > MAX_CHANGE_INDEX {
                return Err("change index out of range");
            }
            match change_index {
                Some(previous) if previous != index => {
                    return Err("output origins disagree on the address index")
                }
                _ => change_index = Some(index),
            }
        }
        let index = change_index.ok_or("output without key origins")?;

        let covered: BTreeSet<Fingerprint> =
            self.origins.values().map(|origin| origin.fingerprint).collect();
        for key in std::iter::once(signer).chain(cosigners) {
            match key.master_fingerprint() {
                Some(fingerprint) if covered.contains(&fingerprint) => {}
                _ => return Err("wallet key missing from output origins"),
            }
        }

        let script = self
            .policy_script()
            .ok_or("attached script not committed to by scriptPubKey")?;
        if !ScriptKind::classify(script).is_multisig() {
            return Err("output script is not multisig");
        }

        let pubkeys: Vec<PublicKey> = self.origins.keys().copied().collect();
        let expected = sorted_multisig_script(threshold, &pubkeys)
            .ok_or("threshold does not fit the output keys")?;
        if expected.as_script() != script {
            return Err("output script is not the wallet's sorted multisig");
        }

        Ok(index)
    }
}

/// Check that `origin` is a wallet address reproduced by one of our keys and
/// return its address index.
///
/// The signer is preferred; otherwise the first cosigner whose master
/// fingerprint matches is used. Cosigners without a known master fingerprint
/// never match.
fn wallet_address_index(
    pubkey: &PublicKey,
    origin: &KeyOrigin,
    signer: &HdKey,
    cosigners: &[HdKey],
) -> Result<u32, &'static str> {
    let (_, index) = origin
        .address_position()
        .ok_or("origin path does not end in a wallet address")?;

    let key = std::iter::once(signer)
        .chain(cosigners)
        .find(|key| key.master_fingerprint() == Some(origin.fingerprint))
        .ok_or("origin fingerprint matches no wallet key")?;

    let derived = key
        .derive_origin(&origin.path)
        .map_err(|_| "origin path not derivable from wallet key")?;
    if derived.public_key() != *pubkey {
        return Err("origin does not reproduce its public key");
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::multisig_script;
    use crate::test_utils::*;
    use bitcoin::Network;

    struct Wallet {
        signer: HdKey,
        cosigner: HdKey,
    }

    impl Wallet {
        fn new() -> Self {
            Self {
                signer: wallet_key(1),
                cosigner: wallet_key(2),
            }
        }

        fn keys(&self) -> [HdKey; 2] {
            [self.signer, self.cosigner]
        }

        fn inputs(&self) -> Vec<PsbtInput> {
            let psbt = build_psbt(
                vec![
                    raw_wallet_input(&self.keys(), 2, 0, 60_000),
                    raw_wallet_input(&self.keys(), 2, 1, 40_000),
                ],
                vec![],
                Network::Testnet,
            );
            psbt.inputs().to_vec()
        }

        fn output(&self, branch: u32, index: u32) -> PsbtOutput {
            let (txout, output) = raw_wallet_output(&self.keys(), 2, branch, index, 29_000);
            PsbtOutput::from_psbt(&txout, &output)
        }

        fn is_change(&self, output: &PsbtOutput) -> bool {
            output.is_change(&self.signer, &self.inputs(), &[self.cosigner], 2)
        }
    }

    #[test]
    fn test_change_output_detected() {
        let wallet = Wallet::new();
        assert!(wallet.is_change(&wallet.output(CHANGE, 7)));
        // receive-branch outputs back to ourselves also count
        assert!(wallet.is_change(&wallet.output(RECEIVE, 3)));
    }

    #[test]
    fn test_external_output_not_change() {
        let wallet = Wallet::new();
        let output = PsbtOutput::new(external_txout(70_000), None, None, KeyOrigins::new());
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_no_inputs() {
        let wallet = Wallet::new();
        let output = wallet.output(CHANGE, 7);
        assert!(!output.is_change(&wallet.signer, &[], &[wallet.cosigner], 2));
    }

    #[test]
    fn test_input_without_origins() {
        let wallet = Wallet::new();
        let mut inputs = wallet.inputs();
        inputs.push(PsbtInput::new(outpoint(9), None, KeyOrigins::new()));

        let output = wallet.output(CHANGE, 7);
        assert!(!output.is_change(&wallet.signer, &inputs, &[wallet.cosigner], 2));
    }

    #[test]
    fn test_wrong_threshold() {
        let wallet = Wallet::new();
        let output = wallet.output(CHANGE, 7);
        let inputs = wallet.inputs();
        assert!(!output.is_change(&wallet.signer, &inputs, &[wallet.cosigner], 1));
        assert!(!output.is_change(&wallet.signer, &inputs, &[wallet.cosigner], 0));
        assert!(!output.is_change(&wallet.signer, &inputs, &[wallet.cosigner], 3));
    }

    #[test]
    fn test_unsorted_multisig_rejected() {
        let wallet = Wallet::new();
        let origins = wallet_origins(&wallet.keys(), CHANGE, 7);
        let mut pubkeys: Vec<PublicKey> = origins.keys().copied().collect();
        pubkeys.sort_by_key(|pk| std::cmp::Reverse(pk.serialize()));
        let script = multisig_script(2, &pubkeys).unwrap();

        let output = PsbtOutput::new(
            TxOut {
                value: Amount::from_sat(29_000),
                script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
            },
            Some(script),
            None,
            origins,
        );
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_uncommitted_witness_script_rejected() {
        let wallet = Wallet::new();
        let honest = wallet.output(CHANGE, 7);
        // scriptPubKey swapped for an attacker's output, metadata left intact
        let output = PsbtOutput::new(
            external_txout(29_000),
            honest.witness_script.clone(),
            None,
            honest.origins.clone(),
        );
        assert!(output.policy_script().is_none());
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_index_out_of_range() {
        let wallet = Wallet::new();
        assert!(wallet.is_change(&wallet.output(CHANGE, MAX_CHANGE_INDEX)));
        assert!(!wallet.is_change(&wallet.output(CHANGE, MAX_CHANGE_INDEX + 1)));
    }

    #[test]
    fn test_indices_disagree() {
        let wallet = Wallet::new();
        let (signer_pk, signer_origin) = origin_for(&wallet.signer, &wallet_path(CHANGE, 7));
        let (cosigner_pk, cosigner_origin) =
            origin_for(&wallet.cosigner, &wallet_path(CHANGE, 8));
        let script = sorted_multisig_script(2, &[signer_pk, cosigner_pk]).unwrap();

        let output = PsbtOutput::new(
            TxOut {
                value: Amount::from_sat(29_000),
                script_pubkey: ScriptBuf::new_p2wsh(&script.wscript_hash()),
            },
            Some(script),
            None,
            KeyOrigins::from([(signer_pk, signer_origin), (cosigner_pk, cosigner_origin)]),
        );
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_non_address_path_rejected() {
        let wallet = Wallet::new();
        let honest = wallet.output(CHANGE, 7);
        let origins: KeyOrigins = honest
            .origins
            .iter()
            .map(|(pk, origin)| {
                let mut origin = origin.clone();
                // same keys, path claims branch 2
                origin.path = format!("{}/2/7", ACCOUNT_PATH).parse().unwrap();
                (*pk, origin)
            })
            .collect();
        let output = PsbtOutput::new(honest.txout.clone(), honest.witness_script.clone(), None, origins);
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_missing_wallet_key_in_output() {
        let wallet = Wallet::new();
        let third = wallet_key(3);
        // 2-of-2 between signer and an outsider
        let (txout, output) = raw_wallet_output(&[wallet.signer, third], 2, CHANGE, 7, 29_000);
        let output = PsbtOutput::from_psbt(&txout, &output);
        assert!(!wallet.is_change(&output));
    }

    #[test]
    fn test_signer_cannot_sign_inputs() {
        let wallet = Wallet::new();
        let output = wallet.output(CHANGE, 7);
        let stranger = wallet_key(9);
        assert!(!output.is_change(&stranger, &wallet.inputs(), &[wallet.cosigner], 2));
    }

    #[test]
    fn test_cosigner_without_fingerprint_never_matches() {
        let wallet = Wallet::new();
        let account = wallet
            .cosigner
            .derive(&ACCOUNT_PATH.parse().unwrap())
            .unwrap();
        let anonymous = HdKey::from_xpub(account.xpub());

        let output = wallet.output(CHANGE, 7);
        assert!(!output.is_change(&wallet.signer, &wallet.inputs(), &[anonymous], 2));

        // the same xpub tagged with its master fingerprint works
        let tagged = anonymous
            .with_master_fingerprint(wallet.cosigner.fingerprint())
            .unwrap();
        assert!(output.is_change(&wallet.signer, &wallet.inputs(), &[tagged], 2));
    }

    #[test]
    fn test_nested_segwit_policy_script() {
        let wallet = Wallet::new();
        let script = wallet_script(&wallet.keys(), 2, CHANGE, 7);
        let redeem = ScriptBuf::new_p2wsh(&script.wscript_hash());
        let output = PsbtOutput::new(
            TxOut {
                value: Amount::from_sat(29_000),
                script_pubkey: ScriptBuf::new_p2sh(&redeem.script_hash()),
            },
            Some(script.clone()),
            Some(redeem),
            wallet_origins(&wallet.keys(), CHANGE, 7),
        );
        assert_eq!(output.policy_script(), Some(script.as_script()));
        assert!(wallet.is_change(&output));
    }
}
