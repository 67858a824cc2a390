//! Key origins attached to PSBT public keys
//!
//! BIP-174 stores, for every public key it knows about, the fingerprint of the
//! master key and the path from that master key. The value layout is:
//!
//! ```text
//! <fingerprint: 4 bytes> <child number: u32 LE>*
//! ```
//!
//! where the top bit of each child number marks a hardened step.

use bitcoin::bip32::{Fingerprint, KeySource};
use bitcoin::secp256k1::PublicKey;
use cosign_core::{DerivationPath, PathComponent};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Public key → origin, as found on a PSBT input or output.
pub type KeyOrigins = BTreeMap<PublicKey, KeyOrigin>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OriginError {
    #[error("Key origin too short: {0} bytes")]
    TooShort(usize),

    #[error("Key origin path is not a whole number of child indexes: {0} bytes")]
    Misaligned(usize),
}

/// Which chain of a wallet account a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Branch {
    Receive,
    Change,
}

/// Master fingerprint and derivation path claimed for a public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyOrigin {
    pub fingerprint: Fingerprint,
    pub path: DerivationPath,
}

impl KeyOrigin {
    pub fn new(fingerprint: Fingerprint, path: DerivationPath) -> Self {
        Self { fingerprint, path }
    }

    /// Decode the BIP-174 key origin value.
    pub fn decode(bytes: &[u8]) -> Result<Self, OriginError> {
        if bytes.len() < 4 {
            return Err(OriginError::TooShort(bytes.len()));
        }
        let (fingerprint, path) = bytes.split_at(4);
        if path.len() % 4 != 0 {
            return Err(OriginError::Misaligned(path.len()));
        }

        let mut fp = [0u8; 4];
        fp.copy_from_slice(fingerprint);
        let raw: Vec<u32> = path
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            fingerprint: Fingerprint::from(fp),
            path: DerivationPath::from_raw(&raw),
        })
    }

    /// Encode as the BIP-174 key origin value.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 * self.path.len());
        out.extend_from_slice(self.fingerprint.as_bytes());
        for raw in self.path.to_raw() {
            out.extend_from_slice(&raw.to_le_bytes());
        }
        out
    }

    pub fn from_key_source(source: &KeySource) -> Self {
        let (fingerprint, path) = source;
        Self {
            fingerprint: *fingerprint,
            path: DerivationPath::from(path),
        }
    }

    pub fn to_key_source(&self) -> KeySource {
        (self.fingerprint, self.path.to_bip32())
    }

    /// Branch and address index if the path ends in `.../0/{index}` or
    /// `.../1/{index}` with both steps unhardened.
    pub fn address_position(&self) -> Option<(Branch, u32)> {
        let components = self.path.components();
        let [.., branch, index] = components else {
            return None;
        };
        let branch = match branch {
            PathComponent::Normal(0) => Branch::Receive,
            PathComponent::Normal(1) => Branch::Change,
            _ => return None,
        };
        match index {
            PathComponent::Normal(index) => Some((branch, *index)),
            PathComponent::Hardened(_) => None,
        }
    }
}

impl fmt::Display for KeyOrigin {
    /// Descriptor style: `[d34db33f/48h/0h/0h/2h/1/7]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.fingerprint)?;
        for component in self.path.components() {
            write!(f, "/{}", component)?;
        }
        f.write_str("]")
    }
}

/// Convert a decoded PSBT `bip32_derivation` map.
pub fn origins_from_derivation(derivation: &BTreeMap<PublicKey, KeySource>) -> KeyOrigins {
    derivation
        .iter()
        .map(|(pubkey, source)| (*pubkey, KeyOrigin::from_key_source(source)))
        .collect()
}
