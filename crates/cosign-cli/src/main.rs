//! cosign: offline multisig cosigner
//!
//! Inspects PSBTs handed over by a coordinator, tells payments apart from
//! verified change, signs, and finalizes.
//!
//! # Usage
//!
//! ```bash
//! cosign --config cosign.toml inspect spend.psbt
//! cosign --config cosign.toml sign spend.psbt --output signed.psbt
//! cosign --config cosign.toml finalize signed.psbt
//! cosign --config cosign.toml address "wsh(sortedmulti(...))#checksum" 5
//! cosign --config cosign.toml --validate
//! ```

mod commands;
mod config;

use anyhow::{Context, Result};
use std::path::PathBuf;

use commands::Command;

fn main() -> Result<()> {
    // Parse CLI args (minimal, no clap dependency needed)
    let args: Vec<String> = std::env::args().collect();

    let mut config_path = PathBuf::from("cosign.toml");
    let mut validate_only = false;
    let mut output: Option<PathBuf> = None;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config_path = PathBuf::from(&args[i]);
                } else {
                    anyhow::bail!("--config requires a path argument");
                }
            }
            "--output" | "-o" => {
                i += 1;
                if i < args.len() {
                    output = Some(PathBuf::from(&args[i]));
                } else {
                    anyhow::bail!("--output requires a path argument");
                }
            }
            "--validate" => {
                validate_only = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "--version" | "-V" => {
                println!("cosign {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            other if other.starts_with('-') => {
                anyhow::bail!("Unknown argument: {}", other);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    // Load config
    let mut cosign_config = config::CosignConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply env overrides
    cosign_config.apply_env_overrides();

    // Init logger before validation so cosigner warnings are visible
    std::env::set_var("RUST_LOG", &cosign_config.general.log_level);
    env_logger::init();

    // Validate
    cosign_config
        .validate()
        .context("Configuration validation failed")?;

    if validate_only {
        let signer = cosign_config.signer_key()?;
        println!("✅ Configuration is valid.");
        println!("  Network:      {}", cosign_config.network());
        println!(
            "  Signer:       {}",
            signer
                .master_fingerprint()
                .map(|fp| fp.to_string())
                .unwrap_or_else(|| "unknown master".to_string())
        );
        println!(
            "  Policy:       {}-of-{}",
            cosign_config.wallet.threshold,
            cosign_config.wallet.cosigners.len() + 1
        );
        for cosigner in &cosign_config.wallet.cosigners {
            println!(
                "  Cosigner:     {} {}",
                cosigner.fingerprint.as_deref().unwrap_or("????????"),
                cosigner.label
            );
        }
        return Ok(());
    }

    let command = Command::parse(&positional, output)?;
    commands::run(&cosign_config, command)
}

fn print_help() {
    println!(
        r#"cosign: offline multisig cosigner

USAGE:
    cosign [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    inspect <PSBT>                  Show inputs, outputs, change and fee
    sign <PSBT>                     Add our signatures
    finalize <PSBT>                 Finalize and print the raw transaction
    address <DESCRIPTOR> [INDEX]    Derive an address from a checksummed descriptor

    <PSBT> is a file holding a base64 or binary PSBT.

OPTIONS:
    -c, --config <PATH>   Config file path (default: cosign.toml)
    -o, --output <PATH>   Write the resulting PSBT here instead of stdout
    --validate            Validate config file and exit
    -h, --help            Show this help message
    -V, --version         Show version

ENVIRONMENT VARIABLES (override config file):
    COSIGN_LOG_LEVEL      Log level (error/warn/info/debug/trace)
    COSIGN_NETWORK        Bitcoin network (bitcoin/testnet/signet/regtest)
    COSIGN_SIGNER         Our extended private key
    COSIGN_MNEMONIC       Our BIP-39 mnemonic
    COSIGN_PASSPHRASE     BIP-39 passphrase
    COSIGN_THRESHOLD      Signatures required to spend

EXAMPLES:
    # Review what a PSBT pays before signing
    cosign --config wallet.toml inspect spend.psbt

    # Sign and hand back
    cosign --config wallet.toml sign spend.psbt -o signed.psbt
"#
    );
}
