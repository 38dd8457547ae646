//! Proof-of-work computation and verification.
//!
//! Every object admitted to the network carries a 64-bit nonce whose
//! double-SHA-512 against the payload hash falls under a target derived
//! from the payload length, the recipient's difficulty parameters, and
//! the object's time to live:
//!
//! ```text
//! divisor = (L + EB)·NTPB + ((L + EB)·TTL·NTPB) / 2^16
//! target  = 2^64 / divisor
//! ```
//!
//! The arithmetic runs in 128-bit integers; the result is stored and
//! compared as a *signed* 64-bit value, matching how the deployed
//! network stores it. A candidate value is acceptable iff
//! `0 ≤ value ≤ target`.
//!
//! The nonce search is CPU-bound and fans out over disjoint nonce
//! ranges; a shared cancel flag is observed between ranges.

use std::sync::atomic::{AtomicBool, Ordering};

use courier_crypto::hash::{double_sha512, sha512};
use courier_types::{CourierError, Result};
use rayon::prelude::*;

/// Floor applied to the time-to-live before it enters the target
/// formula. Objects at or past expiry are still charged for 5 minutes
/// of network life.
pub const MIN_POW_TTL: u64 = 300;

/// Shortest byte sequence that can be a valid object body (4-byte time
/// plus one-byte version and stream var-ints).
const MIN_OBJECT_BYTES: usize = 6;

/// Nonces scanned per worker per cancellation check.
const NONCES_PER_ROUND: u64 = 8_192;

// ---------------------------------------------------------------------------
// Target computation
// ---------------------------------------------------------------------------

/// Clamps `expiration_time − now` to at least [`MIN_POW_TTL`].
pub fn effective_ttl(expiration_time: u64, now: u64) -> u64 {
    expiration_time.saturating_sub(now).max(MIN_POW_TTL)
}

/// Computes the PoW target for a payload of `payload_len` bytes.
///
/// # Errors
///
/// Returns [`CourierError::InvalidParameter`] when
/// `nonce_trials_per_byte` or `extra_bytes` is zero (the divisor would
/// vanish).
pub fn pow_target(
    payload_len: usize,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
    time_to_live: u64,
) -> Result<i64> {
    if nonce_trials_per_byte == 0 || extra_bytes == 0 {
        return Err(CourierError::InvalidParameter {
            reason: format!(
                "nonce_trials_per_byte ({nonce_trials_per_byte}) and extra_bytes \
                 ({extra_bytes}) must both be non-zero"
            ),
        });
    }

    let length = payload_len as u128 + extra_bytes as u128;
    let trials = nonce_trials_per_byte as u128;
    let divisor = length * trials + (length * time_to_live as u128 * trials) / 65_536;

    Ok(((1u128 << 64) / divisor) as u64 as i64)
}

/// The value a nonce produces against a payload's initial hash:
/// the first 8 bytes, big-endian, of
/// `SHA-512(SHA-512(nonce_be ‖ initial_hash))`, read as a signed
/// 64-bit integer.
pub fn pow_value(initial_hash: &[u8; 64], nonce: u64) -> i64 {
    let mut data = [0u8; 72];
    data[..8].copy_from_slice(&nonce.to_be_bytes());
    data[8..].copy_from_slice(initial_hash);
    let digest = double_sha512(&data);

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(prefix)
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Finds the smallest nonce satisfying the target for `payload`.
///
/// The search fans out over disjoint nonce ranges; within each round
/// the smallest hit wins, so the returned nonce is the overall
/// smallest. `cancel` is observed at range granularity.
///
/// # Errors
///
/// - [`CourierError::InvalidParameter`] for zero difficulty inputs.
/// - [`CourierError::Cancelled`] when the cancel flag was raised.
pub fn do_pow(
    payload: &[u8],
    expiration_time: u64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
    now: u64,
    cancel: &AtomicBool,
) -> Result<u64> {
    let time_to_live = effective_ttl(expiration_time, now);
    let target = pow_target(payload.len(), nonce_trials_per_byte, extra_bytes, time_to_live)?;
    let initial_hash = sha512(payload);

    let round = NONCES_PER_ROUND * rayon::current_num_threads().max(1) as u64;
    let mut start = 0u64;

    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(CourierError::Cancelled {
                reason: format!("nonce search stopped before nonce {start}"),
            });
        }

        let end = start.checked_add(round).unwrap_or(u64::MAX);
        let found = (start..end)
            .into_par_iter()
            .filter_map(|nonce| {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                let value = pow_value(&initial_hash, nonce);
                (value >= 0 && value <= target).then_some(nonce)
            })
            .min();

        if let Some(nonce) = found {
            return Ok(nonce);
        }
        if end == u64::MAX {
            return Err(CourierError::NotFound {
                reason: "nonce space exhausted without a hit".into(),
            });
        }
        start = end;
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Checks whether `nonce` is sufficient work for `payload`.
///
/// Applies the same TTL clamp as the search side.
///
/// # Errors
///
/// - [`CourierError::Malformed`] when the payload is shorter than the
///   smallest possible object body.
/// - [`CourierError::InvalidParameter`] for zero difficulty inputs.
pub fn check_pow(
    payload: &[u8],
    nonce: u64,
    expiration_time: u64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
    now: u64,
) -> Result<bool> {
    if payload.len() < MIN_OBJECT_BYTES {
        return Err(CourierError::Malformed {
            reason: format!(
                "payload of {} bytes is shorter than a minimal object ({MIN_OBJECT_BYTES})",
                payload.len()
            ),
        });
    }

    let time_to_live = effective_ttl(expiration_time, now);
    let target = pow_target(payload.len(), nonce_trials_per_byte, extra_bytes, time_to_live)?;
    let value = pow_value(&sha512(payload), nonce);

    Ok(value >= 0 && value <= target)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
