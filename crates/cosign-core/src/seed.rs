//! BIP-39 seed handling
//!
//! Thin wrapper over the `bip39` crate: word-list validation, entropy and
//! seed derivation with an optional passphrase.

use bip39::{Language, Mnemonic};
use thiserror::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid entropy: {0}")]
    InvalidEntropy(String),
}

/// Parse an English mnemonic, validating words and checksum.
pub fn parse_mnemonic(words: &str) -> Result<Mnemonic, SeedError> {
    Mnemonic::parse_in(Language::English, words)
        .map_err(|e| SeedError::InvalidMnemonic(e.to_string()))
}

/// The 2048-word English BIP-39 list, in index order.
pub fn word_list() -> &'static [&'static str; 2048] {
    Language::English.word_list()
}

/// Whether `words` is a valid English mnemonic.
pub fn is_valid_mnemonic(words: &str) -> bool {
    parse_mnemonic(words).is_ok()
}

/// Mnemonic for the given entropy (16, 20, 24, 28 or 32 bytes).
pub fn mnemonic_from_entropy(entropy: &[u8]) -> Result<Mnemonic, SeedError> {
    Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| SeedError::InvalidEntropy(e.to_string()))
}

/// Entropy encoded by a mnemonic.
pub fn mnemonic_entropy(mnemonic: &Mnemonic) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(mnemonic.to_entropy())
}

/// Derive seed bytes from mnemonic (with optional passphrase)
pub fn derive_seed(mnemonic: &Mnemonic, passphrase: &str) -> Zeroizing<[u8; 64]> {
    Zeroizing::new(mnemonic.to_seed(passphrase))
}
