//! Cosigner configuration: parsed from a TOML file + environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use cosign_core::{parse_mnemonic, Fingerprint, HdKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralSection,

    /// The multisig wallet we cosign for
    pub wallet: WalletSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Wallet policy and our signing key. Wiped on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct WalletSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    /// Our extended private key (xprv/tprv). Alternative to `mnemonic`.
    pub signer: Option<String>,

    /// Our BIP-39 mnemonic. Alternative to `signer`.
    pub mnemonic: Option<String>,

    /// Optional BIP-39 passphrase used with `mnemonic`
    #[serde(default)]
    pub passphrase: String,

    /// Signatures required to spend
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// The other keys of the wallet
    #[serde(default)]
    pub cosigners: Vec<CosignerEntry>,
}

impl std::fmt::Debug for WalletSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletSection")
            .field("network", &self.network)
            .field("signer", &self.signer.as_ref().map(|_| "<redacted>"))
            .field("mnemonic", &self.mnemonic.as_ref().map(|_| "<redacted>"))
            .field("threshold", &self.threshold)
            .field("cosigners", &self.cosigners)
            .finish()
    }
}

/// One cosigner's extended public key
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize)]
pub struct CosignerEntry {
    /// xpub/tpub, usually at the account level
    pub xpub: String,

    /// Master key fingerprint (8 hex chars). Required for keys below the
    /// master, otherwise this cosigner can never be matched.
    pub fingerprint: Option<String>,

    /// Human-readable label
    #[serde(default)]
    pub label: String,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_threshold() -> usize {
    2
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl CosignConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CosignConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `COSIGN_LOG_LEVEL`
    /// - `COSIGN_NETWORK`
    /// - `COSIGN_SIGNER`
    /// - `COSIGN_MNEMONIC`
    /// - `COSIGN_PASSPHRASE`
    /// - `COSIGN_THRESHOLD`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("COSIGN_LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Ok(v) = std::env::var("COSIGN_NETWORK") {
            self.wallet.network = v;
        }
        if let Ok(v) = std::env::var("COSIGN_SIGNER") {
            self.wallet.signer = Some(v);
            self.wallet.mnemonic = None;
        }
        if let Ok(v) = std::env::var("COSIGN_MNEMONIC") {
            self.wallet.mnemonic = Some(v);
            self.wallet.signer = None;
        }
        if let Ok(v) = std::env::var("COSIGN_PASSPHRASE") {
            self.wallet.passphrase = v;
        }
        if let Ok(v) = std::env::var("COSIGN_THRESHOLD") {
            if let Ok(threshold) = v.parse::<usize>() {
                self.wallet.threshold = threshold;
            }
        }
    }

    /// Parse the bitcoin network string to a `bitcoin::Network`.
    pub fn network(&self) -> bitcoin::Network {
        match self.wallet.network.as_str() {
            "testnet" | "testnet3" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Bitcoin,
        }
    }

    /// Our signing key, from `signer` or `mnemonic`.
    pub fn signer_key(&self) -> Result<HdKey> {
        match (&self.wallet.signer, &self.wallet.mnemonic) {
            (Some(xprv), None) => {
                let key = HdKey::from_str(xprv.trim())
                    .context("wallet.signer is not a valid extended key")?;
                anyhow::ensure!(key.has_private_key(), "wallet.signer must be a private key");
                Ok(key)
            }
            (None, Some(words)) => {
                let mnemonic = parse_mnemonic(words.trim())?;
                Ok(HdKey::from_mnemonic(
                    &mnemonic,
                    &self.wallet.passphrase,
                    self.network(),
                )?)
            }
            (Some(_), Some(_)) => {
                anyhow::bail!("set only one of wallet.signer and wallet.mnemonic")
            }
            (None, None) => anyhow::bail!("wallet.signer or wallet.mnemonic is required"),
        }
    }

    /// Cosigner keys, tagged with their master fingerprints where given.
    pub fn cosigner_keys(&self) -> Result<Vec<HdKey>> {
        self.wallet
            .cosigners
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let key = HdKey::from_str(entry.xpub.trim())
                    .with_context(|| format!("wallet.cosigners[{}].xpub is invalid", i))?;
                match &entry.fingerprint {
                    Some(fp) => {
                        let fingerprint = Fingerprint::from_str(fp.trim()).with_context(|| {
                            format!("wallet.cosigners[{}].fingerprint is invalid", i)
                        })?;
                        Ok(key.with_master_fingerprint(fingerprint)?)
                    }
                    None => {
                        if key.master_fingerprint().is_none() {
                            log::warn!(
                                "cosigner {} has no master fingerprint; its keys will never match",
                                i
                            );
                        }
                        Ok(key)
                    }
                }
            })
            .collect()
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            matches!(
                self.wallet.network.as_str(),
                "bitcoin" | "testnet" | "testnet3" | "signet" | "regtest"
            ),
            "wallet.network must be one of bitcoin, testnet, signet, regtest"
        );

        let signer = self.signer_key()?;
        anyhow::ensure!(
            bitcoin::NetworkKind::from(self.network()) == signer.network(),
            "wallet.signer is for a different network than wallet.network"
        );

        let cosigners = self.cosigner_keys()?;
        anyhow::ensure!(
            self.wallet.threshold >= 1,
            "wallet.threshold must be >= 1"
        );
        anyhow::ensure!(
            self.wallet.threshold <= cosigners.len() + 1,
            "wallet.threshold ({}) exceeds the number of keys ({})",
            self.wallet.threshold,
            cosigners.len() + 1
        );

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
