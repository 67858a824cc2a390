//! Output script classification and sorted multisig construction

use bitcoin::blockdata::opcodes::all::{OP_CHECKMULTISIG, OP_PUSHNUM_1, OP_PUSHNUM_16};
use bitcoin::blockdata::opcodes::Opcode;
use bitcoin::script::{Builder, Instruction, Script, ScriptBuf};
use bitcoin::secp256k1::PublicKey;

/// Largest key count a bare `OP_CHECKMULTISIG` script can express with small-int pushes.
pub const MAX_MULTISIG_KEYS: usize = 16;

/// What kind of spending condition a script expresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptKind {
    /// P2PK, P2PKH or P2WPKH.
    SingleKey,
    /// `m <key>... n OP_CHECKMULTISIG`, keys in script order.
    Multisig {
        threshold: usize,
        pubkeys: Vec<PublicKey>,
    },
    Other,
}

impl ScriptKind {
    pub fn classify(script: &Script) -> Self {
        if script.is_p2pkh() || script.is_p2wpkh() || script.is_p2pk() {
            return Self::SingleKey;
        }
        parse_multisig(script).unwrap_or(Self::Other)
    }

    pub fn is_multisig(&self) -> bool {
        matches!(self, Self::Multisig { .. })
    }
}

/// `threshold <key>... n OP_CHECKMULTISIG` with keys in the given order.
///
/// Returns `None` unless `1 <= threshold <= keys.len() <= 16`.
pub fn multisig_script(threshold: usize, pubkeys: &[PublicKey]) -> Option<ScriptBuf> {
    if threshold == 0 || threshold > pubkeys.len() || pubkeys.len() > MAX_MULTISIG_KEYS {
        return None;
    }

    let mut builder = Builder::new().push_int(threshold as i64);
    for pubkey in pubkeys {
        builder = builder.push_key(&bitcoin::PublicKey::new(*pubkey));
    }
    Some(
        builder
            .push_int(pubkeys.len() as i64)
            .push_opcode(OP_CHECKMULTISIG)
            .into_script(),
    )
}

/// Multisig script with keys sorted lexicographically by compressed encoding
/// (BIP-67), the form `sortedmulti()` descriptors produce.
pub fn sorted_multisig_script(threshold: usize, pubkeys: &[PublicKey]) -> Option<ScriptBuf> {
    let mut sorted = pubkeys.to_vec();
    sorted.sort_by_key(|pubkey| pubkey.serialize());
    multisig_script(threshold, &sorted)
}

fn parse_multisig(script: &Script) -> Option<ScriptKind> {
    let mut instructions = script.instructions();

    let threshold = match instructions.next()?.ok()? {
        Instruction::Op(op) => small_int(op)?,
        Instruction::PushBytes(_) => return None,
    };

    let mut pubkeys = Vec::new();
    let total = loop {
        match instructions.next()?.ok()? {
            Instruction::PushBytes(bytes) => {
                pubkeys.push(PublicKey::from_slice(bytes.as_bytes()).ok()?);
            }
            Instruction::Op(op) => break small_int(op)?,
        }
    };

    match instructions.next()?.ok()? {
        Instruction::Op(op) if op == OP_CHECKMULTISIG => {}
        _ => return None,
    }
    if instructions.next().is_some() {
        return None;
    }

    if threshold > total || total != pubkeys.len() {
        return None;
    }
    Some(ScriptKind::Multisig { threshold, pubkeys })
}

/// Value of `OP_1`..`OP_16`.
fn small_int(op: Opcode) -> Option<usize> {
    let code = op.to_u8();
    let first = OP_PUSHNUM_1.to_u8();
    (first..=OP_PUSHNUM_16.to_u8())
        .contains(&code)
        .then(|| usize::from(code - first + 1))
}
