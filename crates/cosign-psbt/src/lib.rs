//! cosign PSBT handling
//!
//! Parses BIP-174 packets into typed inputs and outputs, decides which inputs
//! a key can sign, signs them, and verifies which outputs are change for a
//! sorted-multisig wallet.
//!
//! # Modules
//!
//! - [`origin`]: key origins (master fingerprint + path) and their byte layout
//! - [`script`]: script classification and sorted multisig construction
//! - [`input`]: inputs and the signing-capability check
//! - [`output`]: outputs and change verification
//! - [`psbt`]: the PSBT itself: parse, sign, finalize, fee
//! - [`signer`]: ECDSA primitive
//!
//! Everything except [`Psbt::sign`] and [`Psbt::finalize`] is a pure function
//! of immutable data.

pub mod input;
pub mod origin;
pub mod output;
pub mod psbt;
pub mod script;
pub mod signer;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use input::PsbtInput;
pub use origin::{Branch, KeyOrigin, KeyOrigins, OriginError};
pub use output::{PsbtOutput, MAX_CHANGE_INDEX};
pub use psbt::{ParseError, Psbt, PsbtError};
pub use script::{sorted_multisig_script, ScriptKind};
