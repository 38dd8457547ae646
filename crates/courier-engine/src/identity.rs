//! Local identity assembly.
//!
//! Creating an identity means generating two secp256k1 keypairs,
//! deriving the ripe hash and address string from them, and later
//! packaging the public halves into a signed pubkey object for
//! dissemination.

use courier_crypto::hash::ripe_of_keys;
use courier_crypto::keys::{self, EcKeyPair};
use courier_protocol::address;
use courier_protocol::objects::{self, Pubkey, BEHAVIOUR_DOES_ACK};
use courier_storage::records::AddressRecord;
use courier_types::{AddressId, Result};

/// Generates a fresh address of the given version.
///
/// The returned record has id 0; the caller persists it through the
/// store, which assigns the real id.
///
/// # Errors
///
/// [`courier_types::CourierError::InvalidAddress`] when the version or
/// stream is outside the supported range.
pub fn generate_address(version: u64, stream: u64) -> Result<AddressRecord> {
    let signing = EcKeyPair::generate();
    let encryption = EcKeyPair::generate();
    let ripe = ripe_of_keys(
        &signing.public_uncompressed(),
        &encryption.public_uncompressed(),
    );
    let address = address::encode_address(version, stream, &ripe)?;

    Ok(AddressRecord {
        id: AddressId(0),
        address,
        version,
        stream,
        ripe,
        private_signing_key: signing.secret_bytes(),
        private_encryption_key: encryption.secret_bytes(),
        last_pubkey_dissemination_time: 0,
    })
}

/// Builds the signed pubkey object announcing `address`.
///
/// Versions above 2 carry a signature over the canonical payload;
/// older versions go out unsigned.
pub fn build_signed_pubkey(
    address: &AddressRecord,
    expiration_time: u64,
    nonce_trials_per_byte: u64,
    extra_bytes: u64,
) -> Result<Pubkey> {
    let signing = EcKeyPair::from_secret_bytes(&address.private_signing_key)?;
    let encryption = EcKeyPair::from_secret_bytes(&address.private_encryption_key)?;

    let mut pubkey = Pubkey {
        address_version: address.version,
        stream: address.stream,
        behaviour_bitfield: BEHAVIOUR_DOES_ACK,
        public_signing_key: signing.public_uncompressed(),
        public_encryption_key: encryption.public_uncompressed(),
        nonce_trials_per_byte,
        extra_bytes,
        signature: Vec::new(),
        pow_nonce: None,
        expiration_time,
        ripe: address.ripe,
    };

    if address.version > 2 {
        let payload = objects::pubkey_signature_payload(&pubkey);
        pubkey.signature = keys::sign_der(&address.private_signing_key, &payload)?;
    }
    Ok(pubkey)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
