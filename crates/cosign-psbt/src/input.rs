//! PSBT inputs: what is being spent and which keys claim to control it

use bitcoin::psbt;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Amount, CompressedPublicKey, OutPoint, ScriptBuf, TxIn, TxOut};
use cosign_core::HdKey;

use crate::origin::{origins_from_derivation, KeyOrigins};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsbtInput {
    previous_output: OutPoint,
    witness_utxo: Option<TxOut>,
    origins: KeyOrigins,
}

impl PsbtInput {
    pub fn new(previous_output: OutPoint, witness_utxo: Option<TxOut>, origins: KeyOrigins) -> Self {
        Self {
            previous_output,
            witness_utxo,
            origins,
        }
    }

    pub(crate) fn from_psbt(txin: &TxIn, input: &psbt::Input) -> Self {
        Self {
            previous_output: txin.previous_output,
            witness_utxo: input.witness_utxo.clone(),
            origins: origins_from_derivation(&input.bip32_derivation),
        }
    }

    pub fn previous_output(&self) -> OutPoint {
        self.previous_output
    }

    pub fn witness_utxo(&self) -> Option<&TxOut> {
        self.witness_utxo.as_ref()
    }

    pub fn origins(&self) -> &KeyOrigins {
        &self.origins
    }

    pub fn has_origins(&self) -> bool {
        !self.origins.is_empty()
    }

    /// Spends a segwit output (a witness UTXO is present).
    pub fn is_segwit(&self) -> bool {
        self.witness_utxo.is_some()
    }

    /// Value being spent, known only for segwit inputs.
    pub fn amount(&self) -> Option<Amount> {
        self.witness_utxo.as_ref().map(|utxo| utxo.value)
    }

    /// Origins on this input that `key` can reproduce.
    ///
    /// An origin matches when its fingerprint equals the key's master
    /// fingerprint and deriving the origin path (relative to the key's depth)
    /// yields exactly the listed public key. A key with no known master
    /// fingerprint matches nothing. Returns `None` if nothing matched.
    pub fn can_sign(&self, key: &HdKey) -> Option<KeyOrigins> {
        let master = key.master_fingerprint()?;

        let matched: KeyOrigins = self
            .origins
            .iter()
            .filter(|(_, origin)| origin.fingerprint == master)
            .filter(|(pubkey, origin)| match key.derive_origin(&origin.path) {
                Ok(child) => child.public_key() == **pubkey,
                Err(e) => {
                    log::trace!("origin {} not derivable: {}", origin, e);
                    false
                }
            })
            .map(|(pubkey, origin)| (*pubkey, origin.clone()))
            .collect();

        (!matched.is_empty()).then_some(matched)
    }

    pub fn is_signable_by(&self, key: &HdKey) -> bool {
        self.can_sign(key).is_some()
    }

    /// Whether the witness UTXO is a P2WPKH output paying `pubkey`.
    pub fn spends_p2wpkh_of(&self, pubkey: &PublicKey) -> bool {
        let expected = ScriptBuf::new_p2wpkh(&CompressedPublicKey(*pubkey).wpubkey_hash());
        self.witness_utxo
            .as_ref()
            .is_some_and(|utxo| utxo.script_pubkey == expected)
    }
}
