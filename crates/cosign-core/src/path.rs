//! BIP-32 derivation paths
//!
//! A path is an ordered list of child indexes, each either normal or hardened.
//! Hardened components are rendered with an `h` suffix; `'`, `h` and `H` are
//! all accepted when parsing and produce the same path.

use bitcoin::bip32::{self, ChildNumber};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Offset added to an index to mark it hardened in its raw `u32` form.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid child index: {0}")]
    InvalidIndex(u32),
}

/// One step of a derivation path. The index is always below 2^31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathComponent {
    Normal(u32),
    Hardened(u32),
}

impl PathComponent {
    /// Normal component, `index < 2^31`.
    pub fn normal(index: u32) -> Result<Self, PathError> {
        Self::Normal(index).validated()
    }

    /// Hardened component, `index < 2^31` (the offset is added internally).
    pub fn hardened(index: u32) -> Result<Self, PathError> {
        Self::Hardened(index).validated()
    }

    /// Split a raw child number into index and hardened flag.
    pub fn from_raw(raw: u32) -> Self {
        if raw & HARDENED_OFFSET != 0 {
            Self::Hardened(raw & !HARDENED_OFFSET)
        } else {
            Self::Normal(raw)
        }
    }

    /// Raw child number, with the top bit set for hardened components.
    pub fn to_raw(self) -> u32 {
        match self {
            Self::Normal(index) => index,
            Self::Hardened(index) => index | HARDENED_OFFSET,
        }
    }

    /// Index without the hardened offset.
    pub fn index(self) -> u32 {
        match self {
            Self::Normal(index) | Self::Hardened(index) => index,
        }
    }

    pub fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }

    fn validated(self) -> Result<Self, PathError> {
        if self.index() >= HARDENED_OFFSET {
            return Err(PathError::InvalidIndex(self.index()));
        }
        Ok(self)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(index) => write!(f, "{}", index),
            Self::Hardened(index) => write!(f, "{}h", index),
        }
    }
}

impl From<PathComponent> for ChildNumber {
    fn from(component: PathComponent) -> Self {
        match component {
            PathComponent::Normal(index) => ChildNumber::Normal { index },
            PathComponent::Hardened(index) => ChildNumber::Hardened { index },
        }
    }
}

/// A BIP-32 derivation path such as `m/48h/1h/0h/2h/1/7`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationPath(Vec<PathComponent>);

impl DerivationPath {
    /// The empty path `m`.
    pub fn master() -> Self {
        Self(Vec::new())
    }

    /// Build a path from components, rejecting any index >= 2^31.
    pub fn new(components: Vec<PathComponent>) -> Result<Self, PathError> {
        for component in &components {
            component.validated()?;
        }
        Ok(Self(components))
    }

    /// Single normal component path `m/{index}`.
    pub fn from_index(index: u32) -> Result<Self, PathError> {
        Ok(Self(vec![PathComponent::normal(index)?]))
    }

    /// Single component path, normal or hardened.
    pub fn from_component(component: PathComponent) -> Result<Self, PathError> {
        Ok(Self(vec![component.validated()?]))
    }

    /// Decode raw child numbers (top bit = hardened). Never fails.
    pub fn from_raw(raw: &[u32]) -> Self {
        Self(raw.iter().copied().map(PathComponent::from_raw).collect())
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<PathComponent> {
        self.0.last().copied()
    }

    pub fn has_hardened(&self) -> bool {
        self.0.iter().any(|c| c.is_hardened())
    }

    /// New path with `component` appended.
    pub fn child(&self, component: PathComponent) -> Result<Self, PathError> {
        let mut components = self.0.clone();
        components.push(component.validated()?);
        Ok(Self(components))
    }

    /// The path with its last `n` components removed, or `None` if it is shorter than `n`.
    pub fn ancestor(&self, n: usize) -> Option<Self> {
        let len = self.0.len().checked_sub(n)?;
        Some(Self(self.0[..len].to_vec()))
    }

    /// The components after the first `skip`, or `None` if the path is shorter.
    pub fn suffix(&self, skip: usize) -> Option<Self> {
        self.0.get(skip..).map(|rest| Self(rest.to_vec()))
    }

    pub fn to_raw(&self) -> Vec<u32> {
        self.0.iter().map(|c| c.to_raw()).collect()
    }

    /// Convert to the `bitcoin` crate representation used for key derivation.
    pub fn to_bip32(&self) -> bip32::DerivationPath {
        self.0
            .iter()
            .copied()
            .map(ChildNumber::from)
            .collect::<Vec<_>>()
            .into()
    }
}

impl From<&bip32::DerivationPath> for DerivationPath {
    fn from(path: &bip32::DerivationPath) -> Self {
        Self(
            path.as_ref()
                .iter()
                .map(|child| PathComponent::from_raw(u32::from(*child)))
                .collect(),
        )
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for component in &self.0 {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(PathError::InvalidPath(s.to_string()));
        }

        let mut components = Vec::new();
        for part in parts {
            components.push(parse_component(part).map_err(|e| match e {
                PathError::InvalidIndex(_) => e,
                PathError::InvalidPath(_) => PathError::InvalidPath(s.to_string()),
            })?);
        }
        Ok(Self(components))
    }
}

fn parse_component(part: &str) -> Result<PathComponent, PathError> {
    let (digits, hardened) = match part.strip_suffix(['h', 'H', '\'']) {
        Some(digits) => (digits, true),
        None => (part, false),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PathError::InvalidPath(part.to_string()));
    }
    let index: u32 = digits
        .parse()
        .map_err(|_| PathError::InvalidPath(part.to_string()))?;

    if hardened {
        PathComponent::hardened(index)
    } else {
        PathComponent::normal(index)
    }
}
