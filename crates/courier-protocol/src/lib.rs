//! Wire protocol for the Courier object network.
//!
//! Byte-exact codec for the deployed network: big-endian throughout,
//! the reference var-int encoding, base58 address strings, pubkey and
//! msg object layouts with the conditional version-4 encrypted
//! envelope, and the 64-bit proof-of-work that gates object admission.

pub mod address;
pub mod objects;
pub mod pow;
pub mod varint;
