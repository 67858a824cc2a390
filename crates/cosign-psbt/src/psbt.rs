//! PSBT orchestration
//!
//! [`Psbt`] owns the decoded BIP-174 packet plus typed views of its inputs and
//! outputs. Signing only ever touches the partial-signature maps of the
//! underlying packet; the typed views are built once at parse time.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::ecdsa;
use bitcoin::psbt::Psbt as RawPsbt;
use bitcoin::secp256k1::{All, Secp256k1, SecretKey};
use bitcoin::sighash::SighashCache;
use bitcoin::{Amount, Network, NetworkKind, PrivateKey, Transaction};
use cosign_core::{HdKey, KeyError};
use miniscript::psbt::PsbtExt;
use std::fmt;
use thiserror::Error;

use crate::input::PsbtInput;
use crate::output::PsbtOutput;
use crate::signer;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("PSBT is empty")]
    TooShort,

    #[error("PSBT is not valid base64")]
    InvalidEncoding,

    #[error("Invalid PSBT: {0}")]
    Invalid(String),
}

#[derive(Error, Debug)]
pub enum PsbtError {
    #[error("Key is for {key:?} but the PSBT is for {psbt}")]
    NetworkMismatch { key: NetworkKind, psbt: Network },

    #[error("Key derivation failed: {0}")]
    Key(#[from] KeyError),

    #[error("Derived key for input {index} does not match its key origin")]
    DerivedKeyMismatch { index: usize },

    #[error("Cannot compute sighash for input {index}: {reason}")]
    Sighash { index: usize, reason: String },

    #[error("Outputs ({outputs}) exceed inputs ({inputs})")]
    OutputsExceedInputs { inputs: Amount, outputs: Amount },

    #[error("Uncompressed keys cannot sign segwit inputs")]
    UncompressedKey,

    #[error("Amount overflow")]
    AmountOverflow,
}

/// A partially signed transaction bound to a network.
#[derive(Debug, Clone)]
pub struct Psbt {
    network: Network,
    inputs: Vec<PsbtInput>,
    outputs: Vec<PsbtOutput>,
    raw: RawPsbt,
}

impl Psbt {
    /// Decode BIP-174 bytes.
    pub fn from_bytes(bytes: &[u8], network: Network) -> Result<Self, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::TooShort);
        }
        let raw = RawPsbt::deserialize(bytes).map_err(|e| ParseError::Invalid(e.to_string()))?;
        Self::from_raw(raw, network)
    }

    /// Decode the base64 text form. Surrounding whitespace is ignored.
    pub fn from_base64(text: &str, network: Network) -> Result<Self, ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::TooShort);
        }
        let bytes = BASE64
            .decode(text)
            .map_err(|_| ParseError::InvalidEncoding)?;
        Self::from_bytes(&bytes, network)
    }

    /// Wrap an already-decoded packet.
    pub fn from_raw(raw: RawPsbt, network: Network) -> Result<Self, ParseError> {
        let tx = &raw.unsigned_tx;
        if raw.inputs.len() != tx.input.len() {
            return Err(ParseError::Invalid(format!(
                "{} input maps for {} transaction inputs",
                raw.inputs.len(),
                tx.input.len()
            )));
        }
        if raw.outputs.len() != tx.output.len() {
            return Err(ParseError::Invalid(format!(
                "{} output maps for {} transaction outputs",
                raw.outputs.len(),
                tx.output.len()
            )));
        }

        let inputs = tx
            .input
            .iter()
            .zip(&raw.inputs)
            .map(|(txin, input)| PsbtInput::from_psbt(txin, input))
            .collect();
        let outputs = tx
            .output
            .iter()
            .zip(&raw.outputs)
            .map(|(txout, output)| PsbtOutput::from_psbt(txout, output))
            .collect();

        Ok(Self {
            network,
            inputs,
            outputs,
            raw,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.raw.serialize()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.serialize())
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn inputs(&self) -> &[PsbtInput] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PsbtOutput] {
        &self.outputs
    }

    /// The unsigned transaction.
    pub fn transaction(&self) -> &Transaction {
        &self.raw.unsigned_tx
    }

    pub fn raw(&self) -> &RawPsbt {
        &self.raw
    }

    /// Number of partial signatures gathered on input `index`.
    pub fn signature_count(&self, index: usize) -> usize {
        self.raw
            .inputs
            .get(index)
            .map_or(0, |input| input.partial_sigs.len())
    }

    /// Sum of all output values, `None` on overflow.
    pub fn total_out(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(Amount::ZERO, |total, output| total.checked_add(output.amount()))
    }

    /// Inputs minus outputs.
    ///
    /// `Ok(None)` when any input is not segwit, since only a witness UTXO
    /// carries an amount we can account for.
    pub fn fee(&self) -> Result<Option<Amount>, PsbtError> {
        let mut total_in = Amount::ZERO;
        for input in &self.inputs {
            let Some(amount) = input.amount() else {
                return Ok(None);
            };
            total_in = total_in
                .checked_add(amount)
                .ok_or(PsbtError::AmountOverflow)?;
        }

        let total_out = self.total_out().ok_or(PsbtError::AmountOverflow)?;
        total_in
            .checked_sub(total_out)
            .map(Some)
            .ok_or(PsbtError::OutputsExceedInputs {
                inputs: total_in,
                outputs: total_out,
            })
    }

    /// Add a partial signature for every input origin `key` can reproduce.
    ///
    /// Returns the number of signatures added. A public-only key adds none.
    /// On error the PSBT is left untouched.
    pub fn sign(&mut self, key: &HdKey) -> Result<usize, PsbtError> {
        self.check_network(key.network())?;

        let secp = Secp256k1::new();
        let mut cache = SighashCache::new(&self.raw.unsigned_tx);
        let mut signatures = Vec::new();

        for (index, input) in self.inputs.iter().enumerate() {
            let Some(origins) = input.can_sign(key) else {
                continue;
            };
            for (pubkey, origin) in &origins {
                let child = key.derive_origin(&origin.path)?;
                let Some(secret) = child.private_key() else {
                    log::debug!("input {}: no private key for {}", index, origin);
                    continue;
                };
                if signer::public_key(&secp, &secret) != *pubkey {
                    return Err(PsbtError::DerivedKeyMismatch { index });
                }
                let pubkey = bitcoin::PublicKey::new(*pubkey);
                let signature = sign_input(&self.raw, &mut cache, index, &secret, &secp)?;
                log::debug!("input {}: signed with {}", index, origin);
                signatures.push((index, pubkey, signature));
            }
        }

        Ok(self.insert_signatures(signatures))
    }

    /// Sign with a key that is already in hand.
    ///
    /// Inputs are signed when the key's public key appears in their origins
    /// or their witness UTXO pays it directly (P2WPKH). Only compressed keys
    /// are accepted.
    pub fn sign_with_private_key(&mut self, key: &PrivateKey) -> Result<usize, PsbtError> {
        self.check_network(key.network)?;
        if !key.compressed {
            return Err(PsbtError::UncompressedKey);
        }

        let secp = Secp256k1::new();
        let pubkey = key.public_key(&secp);
        let mut cache = SighashCache::new(&self.raw.unsigned_tx);
        let mut signatures = Vec::new();

        for (index, input) in self.inputs.iter().enumerate() {
            if !input.origins().contains_key(&pubkey.inner) && !input.spends_p2wpkh_of(&pubkey.inner)
            {
                continue;
            }
            let signature = sign_input(&self.raw, &mut cache, index, &key.inner, &secp)?;
            log::debug!("input {}: signed with supplied key", index);
            signatures.push((index, pubkey, signature));
        }

        Ok(self.insert_signatures(signatures))
    }

    /// Combine gathered signatures into final scriptSig/witness data.
    pub fn finalize(&mut self) -> bool {
        let secp = Secp256k1::verification_only();
        match self.raw.finalize_mut(&secp) {
            Ok(()) => {
                log::debug!("finalized {} inputs", self.raw.inputs.len());
                true
            }
            Err(errors) => {
                for e in &errors {
                    log::debug!("finalize: {}", e);
                }
                false
            }
        }
    }

    /// Whether a final, fully satisfied transaction can be extracted.
    pub fn is_complete(&self) -> bool {
        self.final_transaction().is_some()
    }

    pub fn final_transaction(&self) -> Option<Transaction> {
        let secp = Secp256k1::verification_only();
        match self.raw.extract(&secp) {
            Ok(tx) => Some(tx),
            Err(e) => {
                log::trace!("not extractable: {}", e);
                None
            }
        }
    }

    /// Whether output `index` is verified change for the given wallet.
    pub fn is_change(
        &self,
        index: usize,
        signer: &HdKey,
        cosigners: &[HdKey],
        threshold: usize,
    ) -> bool {
        self.outputs
            .get(index)
            .is_some_and(|output| output.is_change(signer, &self.inputs, cosigners, threshold))
    }

    /// Indices of all verified change outputs.
    pub fn change_outputs(&self, signer: &HdKey, cosigners: &[HdKey], threshold: usize) -> Vec<usize> {
        (0..self.outputs.len())
            .filter(|&index| self.is_change(index, signer, cosigners, threshold))
            .collect()
    }

    fn insert_signatures(
        &mut self,
        signatures: Vec<(usize, bitcoin::PublicKey, ecdsa::Signature)>,
    ) -> usize {
        let count = signatures.len();
        for (index, pubkey, signature) in signatures {
            self.raw.inputs[index].partial_sigs.insert(pubkey, signature);
        }
        count
    }

    fn check_network(&self, key: NetworkKind) -> Result<(), PsbtError> {
        if NetworkKind::from(self.network) != key {
            return Err(PsbtError::NetworkMismatch {
                key,
                psbt: self.network,
            });
        }
        Ok(())
    }
}

fn sign_input(
    raw: &RawPsbt,
    cache: &mut SighashCache<&Transaction>,
    index: usize,
    secret: &SecretKey,
    secp: &Secp256k1<All>,
) -> Result<ecdsa::Signature, PsbtError> {
    let (digest, sighash_type) = raw
        .sighash_ecdsa(index, cache)
        .map_err(|e| PsbtError::Sighash {
            index,
            reason: e.to_string(),
        })?;

    Ok(ecdsa::Signature {
        signature: signer::sign_digest(secp, secret, &digest, true),
        sighash_type,
    })
}

impl PartialEq for Psbt {
    fn eq(&self, other: &Self) -> bool {
        self.network == other.network && self.serialize() == other.serialize()
    }
}

impl Eq for Psbt {}

impl fmt::Display for Psbt {
    /// Base64, the usual exchange format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}
