//! cosign core
//!
//! Key material shared by the signing and change-verification crates.
//!
//! # Modules
//!
//! - [`path`]: BIP-32 derivation paths (`m/48h/1h/0h/2h/1/7`)
//! - [`keys`]: extended keys with optional master fingerprint
//! - [`seed`]: BIP-39 mnemonics and seeds
//!
//! Everything in this crate is immutable once built, so keys and paths can be
//! shared freely across threads.

pub mod keys;
pub mod path;
pub mod seed;

pub use keys::{HdKey, KeyError};
pub use path::{DerivationPath, PathComponent, PathError, HARDENED_OFFSET};
pub use seed::{derive_seed, parse_mnemonic, word_list, SeedError};

pub use bitcoin::bip32::Fingerprint;
