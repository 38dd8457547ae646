//! secp256k1 key handling.
//!
//! Key material crosses this boundary as plain byte arrays: 32-byte
//! secret scalars and 65-byte uncompressed SEC1 points (the leading
//! `0x04` in place). Curve types from `k256` never escape this module.
//!
//! Signatures are exchanged in DER form, matching what the deployed
//! network produces and verifies.

use courier_types::{CourierError, Result};
use k256::ecdsa::signature::{Signer, Verifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};
use rand::rngs::OsRng;

/// Length of an uncompressed SEC1 point encoding.
pub const UNCOMPRESSED_KEY_LEN: usize = 65;

/// Length of a raw secret scalar.
pub const SECRET_KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// EcKeyPair
// ---------------------------------------------------------------------------

/// A secp256k1 keypair.
///
/// Used both for signing keys and encryption keys; the network makes no
/// structural distinction between the two. Does not implement
/// `Clone`/`Debug` to prevent secret leakage; the underlying
/// [`SecretKey`] zeroizes its memory on drop.
pub struct EcKeyPair {
    secret: SecretKey,
}

impl EcKeyPair {
    /// Generates a fresh keypair from OS entropy.
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Reconstructs a keypair from a raw 32-byte secret scalar.
    ///
    /// Also used to derive the v4 pubkey decryption key from the second
    /// half of an address's double hash.
    ///
    /// # Errors
    ///
    /// Returns [`CourierError::CryptoError`] if the bytes are zero or
    /// not below the curve order.
    pub fn from_secret_bytes(bytes: &[u8; SECRET_KEY_LEN]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| CourierError::CryptoError {
            reason: "secret scalar is zero or exceeds the curve order".into(),
        })?;
        Ok(Self { secret })
    }

    /// Returns the raw 32-byte secret scalar.
    pub fn secret_bytes(&self) -> [u8; SECRET_KEY_LEN] {
        self.secret.to_bytes().into()
    }

    /// Returns the public key as a 65-byte uncompressed SEC1 point.
    pub fn public_uncompressed(&self) -> [u8; UNCOMPRESSED_KEY_LEN] {
        let point = self.secret.public_key().to_encoded_point(false);
        let mut out = [0u8; UNCOMPRESSED_KEY_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }
}

// ---------------------------------------------------------------------------
// Point validation and ECDH
// ---------------------------------------------------------------------------

/// Checks that 65 bytes encode a valid uncompressed curve point.
///
/// # Errors
///
/// Returns [`CourierError::KeyMismatch`] if the bytes do not
/// reconstruct on the curve.
pub fn validate_uncompressed(bytes: &[u8; UNCOMPRESSED_KEY_LEN]) -> Result<()> {
    PublicKey::from_sec1_bytes(bytes)
        .map(|_| ())
        .map_err(|_| CourierError::KeyMismatch {
            reason: "bytes do not encode a point on the curve".into(),
        })
}

/// Performs ECDH and returns the x-coordinate of the shared point.
///
/// Both sides of an exchange derive the identical 32 bytes, which seed
/// the envelope's symmetric keys.
///
/// # Errors
///
/// - [`CourierError::CryptoError`] if the secret scalar is invalid.
/// - [`CourierError::KeyMismatch`] if the peer point is not on the curve.
pub fn ecdh_x(
    secret: &[u8; SECRET_KEY_LEN],
    their_public: &[u8; UNCOMPRESSED_KEY_LEN],
) -> Result<[u8; 32]> {
    let secret = SecretKey::from_slice(secret).map_err(|_| CourierError::CryptoError {
        reason: "secret scalar is zero or exceeds the curve order".into(),
    })?;
    let public =
        PublicKey::from_sec1_bytes(their_public).map_err(|_| CourierError::KeyMismatch {
            reason: "peer key does not reconstruct on the curve".into(),
        })?;

    let shared = k256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), public.as_affine());
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes());
    Ok(out)
}

// ---------------------------------------------------------------------------
// ECDSA (DER)
// ---------------------------------------------------------------------------

/// Signs a message with RFC 6979 deterministic ECDSA, returning the
/// DER-encoded signature.
pub fn sign_der(secret: &[u8; SECRET_KEY_LEN], message: &[u8]) -> Result<Vec<u8>> {
    let secret = SecretKey::from_slice(secret).map_err(|_| CourierError::CryptoError {
        reason: "secret scalar is zero or exceeds the curve order".into(),
    })?;
    let signing_key = SigningKey::from(&secret);
    let signature: Signature = signing_key.sign(message);
    Ok(signature.to_der().as_bytes().to_vec())
}

/// Verifies a DER-encoded ECDSA signature against a 65-byte
/// uncompressed public key.
///
/// # Errors
///
/// - [`CourierError::KeyMismatch`] if the key is not a curve point.
/// - [`CourierError::CryptoError`] if the signature is not valid DER or
///   does not verify.
pub fn verify_der(
    public: &[u8; UNCOMPRESSED_KEY_LEN],
    message: &[u8],
    signature_der: &[u8],
) -> Result<()> {
    let verifying_key =
        VerifyingKey::from_sec1_bytes(public).map_err(|_| CourierError::KeyMismatch {
            reason: "verification key does not reconstruct on the curve".into(),
        })?;
    let signature =
        Signature::from_der(signature_der).map_err(|_| CourierError::CryptoError {
            reason: "signature is not valid DER".into(),
        })?;
    verifying_key
        .verify(message, &signature)
        .map_err(|_| CourierError::CryptoError {
            reason: "signature verification failed".into(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
