//! Command dispatch for the `cosign` binary.

use anyhow::{Context, Result};
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{Address, Network};
use cosign_descriptor::Descriptor;
use cosign_psbt::{ParseError, Psbt};
use std::path::{Path, PathBuf};

use crate::config::CosignConfig;

const PSBT_MAGIC: &[u8] = b"psbt\xff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Inspect {
        psbt: PathBuf,
    },
    Sign {
        psbt: PathBuf,
        output: Option<PathBuf>,
    },
    Finalize {
        psbt: PathBuf,
        output: Option<PathBuf>,
    },
    Address {
        descriptor: String,
        index: Option<u32>,
    },
}

impl Command {
    pub fn parse(args: &[String], output: Option<PathBuf>) -> Result<Self> {
        let (name, rest) = args
            .split_first()
            .context("No command given (try --help)")?;

        let command = match (name.as_str(), rest) {
            ("inspect", [psbt]) => Self::Inspect {
                psbt: PathBuf::from(psbt),
            },
            ("sign", [psbt]) => Self::Sign {
                psbt: PathBuf::from(psbt),
                output,
            },
            ("finalize", [psbt]) => Self::Finalize {
                psbt: PathBuf::from(psbt),
                output,
            },
            ("address", [descriptor]) => Self::Address {
                descriptor: descriptor.clone(),
                index: None,
            },
            ("address", [descriptor, index]) => Self::Address {
                descriptor: descriptor.clone(),
                index: Some(
                    index
                        .parse()
                        .with_context(|| format!("Invalid address index: {}", index))?,
                ),
            },
            ("inspect" | "sign" | "finalize" | "address", _) => {
                anyhow::bail!("Wrong number of arguments for {} (try --help)", name)
            }
            (other, _) => anyhow::bail!("Unknown command: {}", other),
        };
        Ok(command)
    }
}

pub fn run(config: &CosignConfig, command: Command) -> Result<()> {
    let network = config.network();
    match command {
        Command::Inspect { psbt } => {
            let psbt = load_psbt(&psbt, network)?;
            print!("{}", describe(config, &psbt)?);
        }
        Command::Sign { psbt, output } => {
            let mut psbt = load_psbt(&psbt, network)?;
            let signer = config.signer_key()?;
            let added = psbt.sign(&signer).context("Signing failed")?;
            log::info!("added {} signature(s)", added);
            if added == 0 {
                log::warn!("this key cannot sign any input of the PSBT");
            }
            write_psbt(&psbt, output.as_deref())?;
        }
        Command::Finalize { psbt, output } => {
            let mut psbt = load_psbt(&psbt, network)?;
            anyhow::ensure!(psbt.finalize(), "PSBT cannot be finalized yet");
            let tx = psbt
                .final_transaction()
                .context("Finalized PSBT does not extract to a valid transaction")?;
            match output {
                Some(path) => write_psbt(&psbt, Some(&path))?,
                None => println!("{}", serialize_hex(&tx)),
            }
        }
        Command::Address { descriptor, index } => {
            let descriptor = Descriptor::new(&descriptor, network)?;
            let address = match index {
                Some(index) => descriptor.address_at(index)?,
                None => descriptor.address()?,
            };
            println!("{}", address);
        }
    }
    Ok(())
}

/// Human-readable summary: inputs, outputs with change marked, fee.
pub fn describe(config: &CosignConfig, psbt: &Psbt) -> Result<String> {
    let signer = config.signer_key()?;
    let cosigners = config.cosigner_keys()?;
    let threshold = config.wallet.threshold;
    let change = psbt.change_outputs(&signer, &cosigners, threshold);

    let mut out = String::new();
    out.push_str("Inputs:\n");
    for (index, input) in psbt.inputs().iter().enumerate() {
        out.push_str(&format!(
            "  #{} {}  {}  signable: {}  signatures: {}\n",
            index,
            input.previous_output(),
            input
                .amount()
                .map(|amount| amount.to_string())
                .unwrap_or_else(|| "amount unknown".to_string()),
            if input.is_signable_by(&signer) { "yes" } else { "no" },
            psbt.signature_count(index),
        ));
    }

    out.push_str("Outputs:\n");
    for (index, output) in psbt.outputs().iter().enumerate() {
        let destination = Address::from_script(output.script_pubkey(), psbt.network())
            .map(|address| address.to_string())
            .unwrap_or_else(|_| output.script_pubkey().to_hex_string());
        out.push_str(&format!(
            "  #{} {}  {}{}\n",
            index,
            destination,
            output.amount(),
            if change.contains(&index) { "  (change)" } else { "" },
        ));
    }

    match psbt.fee()? {
        Some(fee) => out.push_str(&format!("Fee: {}\n", fee)),
        None => out.push_str("Fee: unknown (non-segwit input)\n"),
    }
    Ok(out)
}

fn load_psbt(path: &Path, network: Network) -> Result<Psbt> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read PSBT: {}", path.display()))?;
    decode_psbt(&bytes, network).with_context(|| format!("Failed to parse PSBT: {}", path.display()))
}

/// Binary PSBTs start with the BIP-174 magic; anything else is taken as base64 text.
fn decode_psbt(bytes: &[u8], network: Network) -> Result<Psbt, ParseError> {
    if bytes.starts_with(PSBT_MAGIC) {
        return Psbt::from_bytes(bytes, network);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidEncoding)?;
    Psbt::from_base64(text, network)
}

fn write_psbt(psbt: &Psbt, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, format!("{}\n", psbt))
                .with_context(|| format!("Failed to write PSBT: {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
        None => println!("{}", psbt),
    }
    Ok(())
}
