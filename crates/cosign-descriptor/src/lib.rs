//! Output descriptors
//!
//! A checksummed descriptor is parsed once into its canonical text and used
//! to derive receive addresses. Ranged descriptors (containing `*`) need an
//! explicit index; non-ranged ones only have the address at index 0.

use bitcoin::{Address, Network};
use miniscript::descriptor::{DefiniteDescriptorKey, DescriptorPublicKey};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Invalid descriptor: {0}")]
    Invalid(String),

    #[error("Descriptor has no address form")]
    NoAddress,

    #[error("Descriptor checksum is required")]
    MissingChecksum,

    #[error("Descriptor is not ranged; only index 0 exists")]
    NotRanged,

    #[error("Descriptor is ranged; an index is required")]
    Ranged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    inner: miniscript::Descriptor<DescriptorPublicKey>,
    network: Network,
    canonical: String,
}

impl Descriptor {
    /// Parse a descriptor. The `#checksum` suffix is mandatory and verified.
    pub fn new(text: &str, network: Network) -> Result<Self, DescriptorError> {
        let text = text.trim();
        if !text.contains('#') {
            return Err(DescriptorError::MissingChecksum);
        }

        let inner = miniscript::Descriptor::<DescriptorPublicKey>::from_str(text)
            .map_err(|e| DescriptorError::Invalid(e.to_string()))?;
        let canonical = inner.to_string();
        log::debug!("parsed descriptor {}", canonical);

        Ok(Self {
            inner,
            network,
            canonical,
        })
    }

    /// Normalized text form, including checksum.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn is_ranged(&self) -> bool {
        self.inner.has_wildcard()
    }

    /// Address at `index`. Non-ranged descriptors accept only index 0.
    pub fn address_at(&self, index: u32) -> Result<Address, DescriptorError> {
        if index != 0 && !self.is_ranged() {
            return Err(DescriptorError::NotRanged);
        }

        let definite: miniscript::Descriptor<DefiniteDescriptorKey> = self
            .inner
            .at_derivation_index(index)
            .map_err(|e| DescriptorError::Invalid(e.to_string()))?;

        definite.address(self.network).map_err(|e| match e {
            miniscript::Error::BareDescriptorAddr => DescriptorError::NoAddress,
            other => DescriptorError::Invalid(other.to_string()),
        })
    }

    /// The single address of a non-ranged descriptor.
    pub fn address(&self) -> Result<Address, DescriptorError> {
        if self.is_ranged() {
            return Err(DescriptorError::Ranged);
        }
        self.address_at(0)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}
