//! The store contract consumed by the engine.
//!
//! Every operation is synchronous and transactional per call. `put_*`
//! assigns and returns the id; `get_*` by primary key returns `None`
//! for missing rows rather than an error (a missing referent is a
//! normal condition the orchestrator handles by dropping the
//! offending queue record). `search_*` methods are the indexed-column
//! lookups the engine relies on.

use courier_types::{AddressId, MessageId, PayloadId, PubkeyId, QueueRecordId, Result};

use crate::records::{AddressRecord, MessageRecord, PayloadRecord, PubkeyRecord, QueueRecord};

/// Synchronous persistence contract for the five entity families.
pub trait Store: Send + Sync {
    /// Whether the data-at-rest key is available. When false the
    /// periodic driver aborts its tick and lets the scheduler retry.
    fn is_unlocked(&self) -> bool;

    // -- Addresses --------------------------------------------------------

    /// Persists a new address and returns its assigned id.
    fn put_address(&self, record: AddressRecord) -> Result<AddressId>;
    /// Fetches an address by id.
    fn get_address(&self, id: AddressId) -> Result<Option<AddressRecord>>;
    /// Fetches an address by its address string.
    fn find_address_by_string(&self, address: &str) -> Result<Option<AddressRecord>>;
    /// Returns all local addresses.
    fn all_addresses(&self) -> Result<Vec<AddressRecord>>;
    /// Rewrites an existing address record.
    fn update_address(&self, record: &AddressRecord) -> Result<()>;

    // -- Pubkeys ----------------------------------------------------------

    /// Persists a new pubkey and returns its assigned id.
    fn put_pubkey(&self, record: PubkeyRecord) -> Result<PubkeyId>;
    /// Fetches a pubkey by id.
    fn get_pubkey(&self, id: PubkeyId) -> Result<Option<PubkeyRecord>>;
    /// Returns every pubkey whose ripe hash matches, in insertion order.
    fn search_pubkeys_by_ripe(&self, ripe: &[u8; 20]) -> Result<Vec<PubkeyRecord>>;
    /// Deletes a pubkey by id; missing rows are ignored.
    fn delete_pubkey(&self, id: PubkeyId) -> Result<()>;

    // -- Payloads ---------------------------------------------------------

    /// Persists a new payload and returns its assigned id.
    fn put_payload(&self, record: PayloadRecord) -> Result<PayloadId>;
    /// Fetches a payload by id.
    fn get_payload(&self, id: PayloadId) -> Result<Option<PayloadRecord>>;
    /// Returns every payload originated by the given address.
    fn search_payloads_by_address(&self, address: AddressId) -> Result<Vec<PayloadRecord>>;
    /// Deletes a payload by id; missing rows are ignored.
    fn delete_payload(&self, id: PayloadId) -> Result<()>;

    // -- Messages ---------------------------------------------------------

    /// Persists a new message and returns its assigned id.
    fn put_message(&self, record: MessageRecord) -> Result<MessageId>;
    /// Fetches a message by id.
    fn get_message(&self, id: MessageId) -> Result<Option<MessageRecord>>;
    /// Finds the pending message bound to the given ack data.
    fn find_message_by_ack(&self, ack_data: &[u8]) -> Result<Option<MessageRecord>>;
    /// Rewrites an existing message record.
    fn update_message(&self, record: &MessageRecord) -> Result<()>;

    // -- Queue records ----------------------------------------------------

    /// Persists a new queue record and returns its assigned id.
    fn put_queue_record(&self, record: QueueRecord) -> Result<QueueRecordId>;
    /// Fetches a queue record by id.
    fn get_queue_record(&self, id: QueueRecordId) -> Result<Option<QueueRecord>>;
    /// Returns all queue records in unspecified order.
    fn all_queue_records(&self) -> Result<Vec<QueueRecord>>;
    /// Rewrites an existing queue record.
    fn update_queue_record(&self, record: &QueueRecord) -> Result<()>;
    /// Deletes a queue record by id; missing rows are ignored.
    fn delete_queue_record(&self, id: QueueRecordId) -> Result<()>;
}
