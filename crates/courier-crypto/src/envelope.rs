//! Hybrid encryption envelope for version-4 objects.
//!
//! ECIES over secp256k1 in the reference construction: an ephemeral
//! keypair is generated per envelope, ECDH against the recipient key
//! yields the shared x-coordinate, and `SHA-512(x)` splits into an
//! AES-256-CBC key (first half) and an HMAC-SHA256 key (second half).
//! The MAC covers everything before it and is verified before any
//! decryption is attempted (Encrypt-then-MAC).
//!
//! # Wire layout
//!
//! ```text
//! [16 bytes] IV
//! [ 2 bytes] curve type (0x02CA, big-endian)
//! [ 2 bytes] x length   ‖ [x bytes] ephemeral x-coordinate
//! [ 2 bytes] y length   ‖ [y bytes] ephemeral y-coordinate
//! [n bytes ] AES-256-CBC ciphertext, PKCS#7 padded
//! [32 bytes] HMAC-SHA256 over all preceding bytes
//! ```

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use courier_types::{CourierError, Result};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::hash::sha512;
use crate::keys::{ecdh_x, EcKeyPair, SECRET_KEY_LEN, UNCOMPRESSED_KEY_LEN};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Wire identifier of the secp256k1 curve.
const CURVE_TYPE: u16 = 0x02CA;

/// AES block / IV length.
const IV_LEN: usize = 16;

/// Length of one point coordinate on the wire.
const COORD_LEN: usize = 32;

/// HMAC-SHA256 tag length.
const MAC_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypts `plaintext` to the holder of `recipient_public`.
///
/// # Errors
///
/// - [`CourierError::KeyMismatch`] if the recipient key is not a curve
///   point.
pub fn encrypt(plaintext: &[u8], recipient_public: &[u8; UNCOMPRESSED_KEY_LEN]) -> Result<Vec<u8>> {
    let ephemeral = EcKeyPair::generate();
    let mut shared_x = ecdh_x(&ephemeral.secret_bytes(), recipient_public)?;
    let (key_e, key_m) = derive_keys(&shared_x);
    shared_x.zeroize();

    let mut iv = [0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let ciphertext = aes_cbc_encrypt(&key_e, &iv, plaintext)?;

    let ephemeral_public = ephemeral.public_uncompressed();
    let mut out = Vec::with_capacity(
        IV_LEN + 2 + 2 + COORD_LEN + 2 + COORD_LEN + ciphertext.len() + MAC_LEN,
    );
    out.extend_from_slice(&iv);
    out.extend_from_slice(&CURVE_TYPE.to_be_bytes());
    out.extend_from_slice(&(COORD_LEN as u16).to_be_bytes());
    out.extend_from_slice(&ephemeral_public[1..33]);
    out.extend_from_slice(&(COORD_LEN as u16).to_be_bytes());
    out.extend_from_slice(&ephemeral_public[33..65]);
    out.extend_from_slice(&ciphertext);

    let mac = hmac_sha256(&key_m, &out)?;
    out.extend_from_slice(&mac);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Decrypts an envelope with the recipient's secret scalar.
///
/// The MAC is verified before the ciphertext is touched.
///
/// # Errors
///
/// - [`CourierError::Malformed`] if the envelope is truncated or its
///   length fields overrun the buffer.
/// - [`CourierError::KeyMismatch`] if the embedded ephemeral key does
///   not reconstruct on the curve.
/// - [`CourierError::DecryptFailed`] on MAC mismatch or bad padding.
pub fn decrypt(data: &[u8], recipient_secret: &[u8; SECRET_KEY_LEN]) -> Result<Vec<u8>> {
    // Shortest possible envelope: empty plaintext still pads to one
    // full AES block.
    let min_len = IV_LEN + 2 + 2 + 2 + IV_LEN + MAC_LEN;
    if data.len() < min_len {
        return Err(CourierError::Malformed {
            reason: format!("envelope of {} bytes is shorter than minimum {min_len}", data.len()),
        });
    }

    let mut pos = 0usize;
    let iv: [u8; IV_LEN] = data[pos..pos + IV_LEN]
        .try_into()
        .map_err(|_| truncated("IV"))?;
    pos += IV_LEN;

    let curve_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
    pos += 2;
    if curve_type != CURVE_TYPE {
        return Err(CourierError::KeyMismatch {
            reason: format!("unexpected curve type 0x{curve_type:04X}"),
        });
    }

    let (x, next) = read_coordinate(data, pos)?;
    pos = next;
    let (y, next) = read_coordinate(data, pos)?;
    pos = next;

    if data.len() < pos + MAC_LEN {
        return Err(truncated("ciphertext and MAC"));
    }
    let ciphertext = &data[pos..data.len() - MAC_LEN];
    let mac = &data[data.len() - MAC_LEN..];

    let mut ephemeral_public = [0u8; UNCOMPRESSED_KEY_LEN];
    ephemeral_public[0] = 0x04;
    ephemeral_public[1..33].copy_from_slice(&x);
    ephemeral_public[33..65].copy_from_slice(&y);

    let mut shared_x = ecdh_x(recipient_secret, &ephemeral_public)?;
    let (key_e, key_m) = derive_keys(&shared_x);
    shared_x.zeroize();

    verify_hmac_sha256(&key_m, &data[..data.len() - MAC_LEN], mac)?;

    aes_cbc_decrypt(&key_e, &iv, ciphertext)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Splits `SHA-512(shared_x)` into the cipher key and the MAC key.
fn derive_keys(shared_x: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let mut digest = sha512(shared_x);
    let mut key_e = [0u8; 32];
    let mut key_m = [0u8; 32];
    key_e.copy_from_slice(&digest[..32]);
    key_m.copy_from_slice(&digest[32..]);
    digest.zeroize();
    (key_e, key_m)
}

/// Reads a length-prefixed coordinate, left-padding to 32 bytes.
fn read_coordinate(data: &[u8], pos: usize) -> Result<([u8; COORD_LEN], usize)> {
    if data.len() < pos + 2 {
        return Err(truncated("coordinate length"));
    }
    let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    let start = pos + 2;
    if len > COORD_LEN {
        return Err(CourierError::Malformed {
            reason: format!("coordinate of {len} bytes exceeds {COORD_LEN}"),
        });
    }
    if data.len() < start + len {
        return Err(truncated("coordinate"));
    }
    let mut out = [0u8; COORD_LEN];
    out[COORD_LEN - len..].copy_from_slice(&data[start..start + len]);
    Ok((out, start + len))
}

fn truncated(what: &str) -> CourierError {
    CourierError::Malformed {
        reason: format!("envelope truncated while reading {what}"),
    }
}

fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let encryptor = Aes256CbcEnc::new(key.into(), iv.into());
    let mut buffer = vec![0u8; plaintext.len() + IV_LEN];
    buffer[..plaintext.len()].copy_from_slice(plaintext);
    let len = encryptor
        .encrypt_padded_mut::<Pkcs7>(&mut buffer, plaintext.len())
        .map(|ciphertext| ciphertext.len())
        .map_err(|_| CourierError::CryptoError {
            reason: "padding buffer too small for AES-CBC output".into(),
        })?;
    buffer.truncate(len);
    Ok(buffer)
}

fn aes_cbc_decrypt(key: &[u8; 32], iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let decryptor = Aes256CbcDec::new(key.into(), iv.into());
    let mut buffer = ciphertext.to_vec();
    let plaintext = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|_| CourierError::DecryptFailed {
            reason: "ciphertext padding is invalid".into(),
        })?;
    Ok(plaintext.to_vec())
}

fn hmac_sha256(key: &[u8; 32], data: &[u8]) -> Result<[u8; MAC_LEN]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| CourierError::CryptoError {
        reason: format!("HMAC-SHA256 key init failed: {e}"),
    })?;
    mac.update(data);
    let mut out = [0u8; MAC_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn verify_hmac_sha256(key: &[u8; 32], data: &[u8], expected: &[u8]) -> Result<()> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| CourierError::CryptoError {
        reason: format!("HMAC-SHA256 key init failed: {e}"),
    })?;
    mac.update(data);
    mac.verify_slice(expected)
        .map_err(|_| CourierError::DecryptFailed {
            reason: "envelope MAC mismatch".into(),
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let plaintext = b"an expiring object inner block";

        let envelope = encrypt(plaintext, &recipient.public_uncompressed())?;
        let decrypted = decrypt(&envelope, &recipient.secret_bytes())?;
        assert_eq!(decrypted, plaintext);
        Ok(())
    }

    #[test]
    fn roundtrip_empty_plaintext() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let envelope = encrypt(b"", &recipient.public_uncompressed())?;
        let decrypted = decrypt(&envelope, &recipient.secret_bytes())?;
        assert!(decrypted.is_empty());
        Ok(())
    }

    #[test]
    fn envelopes_are_unique_per_encryption() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let a = encrypt(b"same plaintext", &recipient.public_uncompressed())?;
        let b = encrypt(b"same plaintext", &recipient.public_uncompressed())?;
        // Fresh ephemeral key and IV every time.
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn any_single_bit_flip_fails_decryption() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let envelope = encrypt(b"integrity matters", &recipient.public_uncompressed())?;

        // Flip one bit in each region of the envelope: IV, ephemeral
        // key, ciphertext, and MAC. Every flip must be rejected.
        for index in [0, IV_LEN + 3, envelope.len() - MAC_LEN - 1, envelope.len() - 1] {
            let mut corrupted = envelope.clone();
            corrupted[index] ^= 0x01;
            let result = decrypt(&corrupted, &recipient.secret_bytes());
            assert!(result.is_err(), "flip at byte {index} must be rejected");
        }
        Ok(())
    }

    #[test]
    fn wrong_recipient_key_fails() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let other = EcKeyPair::generate();
        let envelope = encrypt(b"for the recipient only", &recipient.public_uncompressed())?;

        assert!(matches!(
            decrypt(&envelope, &other.secret_bytes()),
            Err(CourierError::DecryptFailed { .. })
        ));
        Ok(())
    }

    #[test]
    fn truncated_envelope_is_malformed() {
        let recipient = EcKeyPair::generate();
        assert!(matches!(
            decrypt(&[0u8; 10], &recipient.secret_bytes()),
            Err(CourierError::Malformed { .. })
        ));
    }

    #[test]
    fn garbage_ephemeral_point_is_key_mismatch() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let mut envelope = encrypt(b"payload", &recipient.public_uncompressed())?;
        // Overwrite the x-coordinate with a value that cannot lie on
        // the curve together with the stored y.
        for byte in envelope.iter_mut().skip(IV_LEN + 4).take(COORD_LEN) {
            *byte = 0xFF;
        }
        assert!(matches!(
            decrypt(&envelope, &recipient.secret_bytes()),
            Err(CourierError::KeyMismatch { .. })
        ));
        Ok(())
    }

    #[test]
    fn wrong_curve_type_rejected() -> Result<()> {
        let recipient = EcKeyPair::generate();
        let mut envelope = encrypt(b"payload", &recipient.public_uncompressed())?;
        envelope[IV_LEN] = 0x01;
        assert!(decrypt(&envelope, &recipient.secret_bytes()).is_err());
        Ok(())
    }
}
