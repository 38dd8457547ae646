//! SHA-512 and RIPEMD-160 hashing.
//!
//! The network identifies everything by hashes of this family: object
//! PoW values are double-SHA-512 prefixes, addresses carry a RIPEMD-160
//! of a double-SHA-512 of the key pair, and v4 address tags and
//! decryption keys are the two halves of a double-SHA-512.

use ripemd::Ripemd160;
use sha2::{Digest, Sha512};

/// Computes the SHA-512 hash of arbitrary data.
pub fn sha512(data: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&Sha512::digest(data));
    out
}

/// Computes `SHA-512(SHA-512(data))`.
pub fn double_sha512(data: &[u8]) -> [u8; 64] {
    sha512(&sha512(data))
}

/// Computes the RIPEMD-160 hash of arbitrary data.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

/// Derives the 20-byte ripe hash identifying a key pair.
///
/// `RIPEMD-160(double-SHA-512(signing_key ‖ encryption_key))` over the
/// uncompressed 65-byte point encodings.
pub fn ripe_of_keys(signing_key: &[u8; 65], encryption_key: &[u8; 65]) -> [u8; 20] {
    let mut combined = [0u8; 130];
    combined[..65].copy_from_slice(signing_key);
    combined[65..].copy_from_slice(encryption_key);
    ripemd160(&double_sha512(&combined))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
