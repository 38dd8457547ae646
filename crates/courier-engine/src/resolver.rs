//! Pubkey resolution.
//!
//! Resolving an address yields the pubkey needed to encrypt to it:
//! first from the local cache (collapsing any duplicate rows back to
//! one), otherwise from a gateway — by tag for v4+ addresses, by ripe
//! hash for older ones — followed by parsing, validation against the
//! address, and persistence.

use std::sync::Arc;

use courier_protocol::address;
use courier_protocol::objects;
use courier_storage::records::PubkeyRecord;
use courier_storage::Store;
use courier_types::{AddressId, CourierError, PubkeyId, Result};

use crate::gateway::Gateway;

/// Resolves addresses to validated pubkeys.
pub struct PubkeyResolver {
    store: Arc<dyn Store>,
    gateway: Arc<dyn Gateway>,
    strict_eight_byte_time: bool,
}

impl PubkeyResolver {
    /// Creates a resolver over the given store and gateway.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn Gateway>,
        strict_eight_byte_time: bool,
    ) -> Self {
        Self {
            store,
            gateway,
            strict_eight_byte_time,
        }
    }

    /// Returns the pubkey for `address_string`.
    ///
    /// # Errors
    ///
    /// - [`CourierError::InvalidAddress`] for an unparseable address.
    /// - [`CourierError::NotFound`] when the gateway has no pubkey.
    /// - [`CourierError::InvalidPubkey`] when a fetched pubkey fails
    ///   validation against the address.
    /// - [`CourierError::NetworkError`] for gateway transport failures.
    pub fn resolve(&self, address_string: &str) -> Result<PubkeyRecord> {
        let decoded = address::decode_address(address_string)?;

        // Cached copies first. More than one row for a ripe hash
        // violates the uniqueness invariant; keep the first and delete
        // the rest.
        let mut cached = self.store.search_pubkeys_by_ripe(&decoded.ripe)?;
        if !cached.is_empty() {
            let keep = cached.remove(0);
            for duplicate in cached {
                tracing::info!(
                    pubkey = %duplicate.id,
                    "deleting duplicate cached pubkey"
                );
                self.store.delete_pubkey(duplicate.id)?;
            }
            return Ok(keep);
        }

        // Cache miss: ask a gateway. Version 4 pubkeys are filed under
        // the address tag, older ones under the ripe hash itself.
        let blob = if decoded.version >= 4 {
            let tag = address::address_tag(address_string)?;
            self.gateway.pubkey_by_tag(&tag)?
        } else {
            self.gateway.pubkey_by_ripe(&decoded.ripe)?
        };
        let blob = blob.ok_or_else(|| CourierError::NotFound {
            reason: format!("gateway has no pubkey for {address_string}"),
        })?;

        let pubkey = objects::parse_pubkey(
            &blob,
            Some(address_string),
            self.strict_eight_byte_time,
        )?;
        objects::validate_pubkey(&pubkey, address_string)?;

        let mut record = PubkeyRecord {
            id: PubkeyId(0),
            pubkey,
            belongs_to_me: false,
            corresponding_address_id: AddressId(0),
        };
        record.id = self.store.put_pubkey(record.clone())?;
        tracing::info!(
            address = address_string,
            pubkey = %record.id,
            "pubkey fetched from gateway and cached"
        );
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
