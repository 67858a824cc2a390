//! ECDSA signing over secp256k1

use secp256k1::{ecdsa, Message, PublicKey, Secp256k1, SecretKey, Signing};

/// Sign a 32-byte digest.
///
/// With `grind_low_r` the nonce is re-derived until R fits in 32 bytes, which
/// saves a byte per signature on chain. Both modes are deterministic (RFC 6979).
pub fn sign_digest<C: Signing>(
    secp: &Secp256k1<C>,
    secret: &SecretKey,
    digest: &Message,
    grind_low_r: bool,
) -> ecdsa::Signature {
    if grind_low_r {
        secp.sign_ecdsa_low_r(digest, secret)
    } else {
        secp.sign_ecdsa(digest, secret)
    }
}

pub fn public_key<C: Signing>(secp: &Secp256k1<C>, secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(secp, secret)
}
