//! Hierarchical deterministic keys
//!
//! [`HdKey`] wraps a BIP-32 extended key (private or public-only) and carries
//! the fingerprint of the master key it descends from, when that is known.
//! The master fingerprint is what PSBT key origins refer to, so a key without
//! one can never be matched against PSBT metadata.

use bip39::Mnemonic;
use bitcoin::bip32::{self, ChainCode, ChildNumber, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Network, NetworkKind};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::path::DerivationPath;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Cannot derive a hardened child from a public key")]
    CannotDeriveHardenedFromPublic,

    #[error("Invalid child index: {0}")]
    InvalidIndex(u32),

    #[error("Invalid extended key: {0}")]
    InvalidKey(String),

    #[error("Derivation failed: {0}")]
    DerivationFailed(String),

    #[error("Master fingerprint {supplied} does not match root key fingerprint {actual}")]
    FingerprintMismatch {
        supplied: Fingerprint,
        actual: Fingerprint,
    },

    #[error("Origin path {path} is shorter than key depth {depth}")]
    OriginTooShort { path: String, depth: u8 },
}

fn derivation_error(e: bip32::Error) -> KeyError {
    match e {
        bip32::Error::CannotDeriveFromHardenedKey => KeyError::CannotDeriveHardenedFromPublic,
        bip32::Error::InvalidChildNumber(index) => KeyError::InvalidIndex(index),
        other => KeyError::DerivationFailed(other.to_string()),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ExtendedKey {
    Private(Xpriv),
    Public(Xpub),
}

/// An extended key node, optionally tagged with its master key fingerprint.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HdKey {
    key: ExtendedKey,
    master_fingerprint: Option<Fingerprint>,
}

impl HdKey {
    /// Master key from a BIP-39 (or raw BIP-32) seed.
    pub fn from_seed(seed: &[u8], network: Network) -> Result<Self, KeyError> {
        let xpriv = Xpriv::new_master(network, seed)
            .map_err(|e| KeyError::DerivationFailed(e.to_string()))?;
        Ok(Self::from_xpriv(xpriv))
    }

    /// Master key from a mnemonic and optional passphrase.
    pub fn from_mnemonic(
        mnemonic: &Mnemonic,
        passphrase: &str,
        network: Network,
    ) -> Result<Self, KeyError> {
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));
        Self::from_seed(&seed[..], network)
    }

    pub fn from_xpriv(xpriv: Xpriv) -> Self {
        let mut key = Self {
            key: ExtendedKey::Private(xpriv),
            master_fingerprint: None,
        };
        key.master_fingerprint = key.root_fingerprint();
        key
    }

    pub fn from_xpub(xpub: Xpub) -> Self {
        let mut key = Self {
            key: ExtendedKey::Public(xpub),
            master_fingerprint: None,
        };
        key.master_fingerprint = key.root_fingerprint();
        key
    }

    /// Record the fingerprint of the master key this key was derived from.
    ///
    /// For a root key the fingerprint must be its own.
    pub fn with_master_fingerprint(mut self, fingerprint: Fingerprint) -> Result<Self, KeyError> {
        if let Some(actual) = self.root_fingerprint() {
            if actual != fingerprint {
                return Err(KeyError::FingerprintMismatch {
                    supplied: fingerprint,
                    actual,
                });
            }
        }
        self.master_fingerprint = Some(fingerprint);
        Ok(self)
    }

    fn root_fingerprint(&self) -> Option<Fingerprint> {
        (self.depth() == 0).then(|| self.fingerprint())
    }

    pub fn network(&self) -> NetworkKind {
        match &self.key {
            ExtendedKey::Private(xpriv) => xpriv.network,
            ExtendedKey::Public(xpub) => xpub.network,
        }
    }

    pub fn depth(&self) -> u8 {
        match &self.key {
            ExtendedKey::Private(xpriv) => xpriv.depth,
            ExtendedKey::Public(xpub) => xpub.depth,
        }
    }

    pub fn parent_fingerprint(&self) -> Fingerprint {
        match &self.key {
            ExtendedKey::Private(xpriv) => xpriv.parent_fingerprint,
            ExtendedKey::Public(xpub) => xpub.parent_fingerprint,
        }
    }

    pub fn child_number(&self) -> ChildNumber {
        match &self.key {
            ExtendedKey::Private(xpriv) => xpriv.child_number,
            ExtendedKey::Public(xpub) => xpub.child_number,
        }
    }

    pub fn chain_code(&self) -> ChainCode {
        match &self.key {
            ExtendedKey::Private(xpriv) => xpriv.chain_code,
            ExtendedKey::Public(xpub) => xpub.chain_code,
        }
    }

    /// Compressed public key of this node.
    pub fn public_key(&self) -> PublicKey {
        self.xpub().public_key
    }

    pub fn private_key(&self) -> Option<SecretKey> {
        self.xpriv().map(|xpriv| xpriv.private_key)
    }

    pub fn has_private_key(&self) -> bool {
        matches!(self.key, ExtendedKey::Private(_))
    }

    /// Fingerprint of this node's own public key.
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpub().fingerprint()
    }

    /// Fingerprint of the master key, if known.
    pub fn master_fingerprint(&self) -> Option<Fingerprint> {
        self.master_fingerprint
    }

    pub fn xpub(&self) -> Xpub {
        match &self.key {
            ExtendedKey::Private(xpriv) => Xpub::from_priv(&Secp256k1::new(), xpriv),
            ExtendedKey::Public(xpub) => *xpub,
        }
    }

    pub fn xpriv(&self) -> Option<Xpriv> {
        match &self.key {
            ExtendedKey::Private(xpriv) => Some(*xpriv),
            ExtendedKey::Public(_) => None,
        }
    }

    /// Public-only copy of this key, keeping the master fingerprint.
    pub fn neutered(&self) -> Self {
        Self {
            key: ExtendedKey::Public(self.xpub()),
            master_fingerprint: self.master_fingerprint,
        }
    }

    /// Derive a descendant along `path`, relative to this key.
    ///
    /// A public-only key refuses any path containing a hardened step before
    /// deriving anything.
    pub fn derive(&self, path: &DerivationPath) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let bip32_path = path.to_bip32();

        let key = match &self.key {
            ExtendedKey::Private(xpriv) => ExtendedKey::Private(
                xpriv
                    .derive_priv(&secp, &bip32_path)
                    .map_err(derivation_error)?,
            ),
            ExtendedKey::Public(xpub) => {
                if path.has_hardened() {
                    return Err(KeyError::CannotDeriveHardenedFromPublic);
                }
                ExtendedKey::Public(
                    xpub.derive_pub(&secp, &bip32_path)
                        .map_err(derivation_error)?,
                )
            }
        };

        Ok(Self {
            key,
            master_fingerprint: self.master_fingerprint,
        })
    }

    /// Derive along a full origin path (`m/...` from the master key).
    ///
    /// A key at depth `d` is assumed to sit at the first `d` components of
    /// `path`; only the remaining components are derived. For a master key
    /// this is the same as [`HdKey::derive`]. The caller must compare the
    /// resulting public key against the expected one, since the skipped
    /// prefix is not checked.
    pub fn derive_origin(&self, path: &DerivationPath) -> Result<Self, KeyError> {
        let depth = self.depth();
        let relative = path
            .suffix(depth as usize)
            .ok_or_else(|| KeyError::OriginTooShort {
                path: path.to_string(),
                depth,
            })?;
        self.derive(&relative)
    }
}

impl fmt::Display for HdKey {
    /// xprv/tprv for private keys, xpub/tpub otherwise.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            ExtendedKey::Private(xpriv) => write!(f, "{}", xpriv),
            ExtendedKey::Public(xpub) => write!(f, "{}", xpub),
        }
    }
}

impl fmt::Debug for HdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HdKey")
            .field("xpub", &self.xpub().to_string())
            .field("private", &self.has_private_key())
            .field("master_fingerprint", &self.master_fingerprint)
            .finish()
    }
}

impl FromStr for HdKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(xpriv) = Xpriv::from_str(s) {
            return Ok(Self::from_xpriv(xpriv));
        }
        Xpub::from_str(s)
            .map(Self::from_xpub)
            .map_err(|e| KeyError::InvalidKey(e.to_string()))
    }
}
