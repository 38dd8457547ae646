//! The consumed gateway surface.
//!
//! Gateways are HTTP servers that accept objects for dissemination and
//! serve pubkeys and inbound objects. The HTTP client itself lives
//! outside this workspace; [`Gateway`] is the contract it must satisfy.
//! Implementations are expected to apply the configured network timeout
//! and surface expiry as [`courier_types::CourierError::NetworkError`].

use courier_types::Result;

/// Synchronous gateway contract.
pub trait Gateway: Send + Sync {
    /// Fetches a pubkey object by its v4+ tag. `Ok(None)` when the
    /// gateway has no object under that tag.
    fn pubkey_by_tag(&self, tag: &[u8; 32]) -> Result<Option<Vec<u8>>>;

    /// Fetches a pubkey object by ripe hash (versions below 4).
    /// `Ok(None)` when the gateway has no object under that hash.
    fn pubkey_by_ripe(&self, ripe: &[u8; 20]) -> Result<Option<Vec<u8>>>;

    /// Pushes an encoded object for dissemination.
    ///
    /// # Errors
    ///
    /// - [`courier_types::CourierError::PowInsufficient`] when the
    ///   gateway rejects the object's proof of work.
    /// - [`courier_types::CourierError::NetworkError`] for transport
    ///   failures, timeouts, stream mismatches, and expired objects.
    fn post_object(&self, object: &[u8]) -> Result<()>;

    /// Pulls inbound objects addressed to `address` that arrived at or
    /// after `since`. An empty batch means the client is caught up.
    fn fetch_objects(&self, address: &str, since: u64) -> Result<Vec<Vec<u8>>>;

    /// Cheap reachability probe; dissemination and polling are skipped
    /// while this is false.
    fn is_available(&self) -> bool;
}
