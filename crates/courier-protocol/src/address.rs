//! Address encoding, decoding, and key derivation.
//!
//! An address is the base58 rendering of `(version, stream, ripe)` with
//! a 4-byte double-SHA-512 checksum, carrying the fixed `BM-` prefix:
//!
//! ```text
//! "BM-" ‖ base58( version_varint ‖ stream_varint ‖ ripe_stripped ‖ checksum )
//! checksum = first4( double_sha512( version_varint ‖ stream_varint ‖ ripe_stripped ) )
//! ```
//!
//! Leading zero bytes of the 20-byte ripe hash are stripped on encode
//! and restored by left-padding on decode.
//!
//! For version 4 and above the same double hash, taken over the full 64
//! bytes, also yields the *tag* (first half) used to locate the pubkey
//! on a gateway, and the seed of the ECDH private key (second half)
//! that decrypts the pubkey envelope.

use courier_crypto::hash::double_sha512;
use courier_types::{CourierError, Result};

use crate::varint::{decode_varint, encode_varint};

/// Fixed prefix of every address string.
pub const ADDRESS_PREFIX: &str = "BM-";

/// Length of the ripe hash identifying a key pair.
pub const RIPE_LEN: usize = 20;

/// Lowest supported address version.
pub const MIN_ADDRESS_VERSION: u64 = 1;

/// Highest supported address version.
pub const MAX_ADDRESS_VERSION: u64 = 4;

/// The only stream this client participates in.
pub const STREAM_NUMBER: u64 = 1;

/// Length of the trailing checksum.
const CHECKSUM_LEN: usize = 4;

// ---------------------------------------------------------------------------
// DecodedAddress
// ---------------------------------------------------------------------------

/// The `(version, stream, ripe)` triple carried by an address string.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DecodedAddress {
    /// Address version, `1..=4`.
    pub version: u64,
    /// Stream number; always 1 for this client.
    pub stream: u64,
    /// The 20-byte ripe hash, left-padded if it was stripped on the wire.
    pub ripe: [u8; RIPE_LEN],
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encodes `(version, stream, ripe)` into an address string.
///
/// # Errors
///
/// Returns [`CourierError::InvalidAddress`] when version or stream are
/// outside their supported ranges.
pub fn encode_address(version: u64, stream: u64, ripe: &[u8; RIPE_LEN]) -> Result<String> {
    validate_numbers(version, stream)?;

    let body = address_body(version, stream, ripe);
    let checksum = double_sha512(&body);

    let mut payload = body;
    payload.extend_from_slice(&checksum[..CHECKSUM_LEN]);

    Ok(format!(
        "{ADDRESS_PREFIX}{}",
        bs58::encode(payload).into_string()
    ))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decodes and validates an address string.
///
/// # Errors
///
/// Returns [`CourierError::InvalidAddress`] on a missing prefix, a
/// non-base58 body, a checksum mismatch, an unknown version, an
/// unsupported stream, or an over-long ripe hash.
pub fn decode_address(address: &str) -> Result<DecodedAddress> {
    let body = address
        .strip_prefix(ADDRESS_PREFIX)
        .ok_or_else(|| invalid(format!("missing {ADDRESS_PREFIX} prefix")))?;

    let payload = bs58::decode(body)
        .into_vec()
        .map_err(|e| invalid(format!("not valid base58: {e}")))?;

    if payload.len() <= CHECKSUM_LEN {
        return Err(invalid("payload shorter than its checksum".into()));
    }
    let (data, checksum) = payload.split_at(payload.len() - CHECKSUM_LEN);

    let expected = double_sha512(data);
    if checksum != &expected[..CHECKSUM_LEN] {
        return Err(invalid("checksum mismatch".into()));
    }

    let (version, consumed) =
        decode_varint(data).map_err(|e| invalid(format!("unreadable version: {e}")))?;
    let mut pos = consumed;
    let (stream, consumed) =
        decode_varint(&data[pos..]).map_err(|e| invalid(format!("unreadable stream: {e}")))?;
    pos += consumed;

    validate_numbers(version, stream)?;

    let stripped = &data[pos..];
    if stripped.len() > RIPE_LEN {
        return Err(invalid(format!(
            "ripe hash of {} bytes exceeds {RIPE_LEN}",
            stripped.len()
        )));
    }
    let mut ripe = [0u8; RIPE_LEN];
    ripe[RIPE_LEN - stripped.len()..].copy_from_slice(stripped);

    Ok(DecodedAddress {
        version,
        stream,
        ripe,
    })
}

// ---------------------------------------------------------------------------
// v4 key derivation
// ---------------------------------------------------------------------------

/// Derives the 64-byte address key for `(version, stream, ripe)`.
///
/// The first half is the gateway lookup tag; the second half seeds the
/// ECDH private key that decrypts v4+ pubkey envelopes.
pub fn derived_key(version: u64, stream: u64, ripe: &[u8; RIPE_LEN]) -> [u8; 64] {
    double_sha512(&address_body(version, stream, ripe))
}

/// Returns the 32-byte tag locating this address's pubkey on a gateway.
pub fn address_tag(address: &str) -> Result<[u8; 32]> {
    let decoded = decode_address(address)?;
    let key = derived_key(decoded.version, decoded.stream, &decoded.ripe);
    let mut tag = [0u8; 32];
    tag.copy_from_slice(&key[..32]);
    Ok(tag)
}

/// Returns the 32 bytes seeding the pubkey-envelope decryption key.
pub fn address_decryption_seed(address: &str) -> Result<[u8; 32]> {
    let decoded = decode_address(address)?;
    let key = derived_key(decoded.version, decoded.stream, &decoded.ripe);
    let mut seed = [0u8; 32];
    seed.copy_from_slice(&key[32..]);
    Ok(seed)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// `version_varint ‖ stream_varint ‖ ripe_stripped` — the data both the
/// checksum and the derived key are computed over.
fn address_body(version: u64, stream: u64, ripe: &[u8; RIPE_LEN]) -> Vec<u8> {
    let stripped: &[u8] = {
        let first_nonzero = ripe.iter().position(|&b| b != 0).unwrap_or(RIPE_LEN);
        &ripe[first_nonzero..]
    };

    let mut body = encode_varint(version);
    body.extend_from_slice(&encode_varint(stream));
    body.extend_from_slice(stripped);
    body
}

fn validate_numbers(version: u64, stream: u64) -> Result<()> {
    if !(MIN_ADDRESS_VERSION..=MAX_ADDRESS_VERSION).contains(&version) {
        return Err(invalid(format!("unknown address version {version}")));
    }
    if stream != STREAM_NUMBER {
        return Err(invalid(format!("unsupported stream {stream}")));
    }
    Ok(())
}

fn invalid(reason: String) -> CourierError {
    CourierError::InvalidAddress { reason }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
