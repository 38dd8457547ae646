//! Cryptographic building blocks for the Courier engine.
//!
//! Thin adapters over the RustCrypto primitives: SHA-512 / RIPEMD-160
//! hashing, secp256k1 key handling, and the ECIES-style hybrid envelope
//! used by version-4 objects. Higher layers never touch curve or cipher
//! types directly; everything crosses this boundary as plain byte
//! arrays.

pub mod envelope;
pub mod hash;
pub mod keys;
