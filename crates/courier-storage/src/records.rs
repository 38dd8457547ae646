//! Persisted entity records.
//!
//! One struct per store table. Records reference each other by id,
//! never by ownership: a pubkey points at its address (and the address
//! at its latest payload) through plain integers, which keeps the
//! pubkey/address cycle trivially representable.

use courier_protocol::objects::Pubkey;
use courier_types::{
    AddressId, MessageId, MessageStatus, ObjectKind, PayloadId, PubkeyId, QueueRecordId, TaskKind,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

// ---------------------------------------------------------------------------
// AddressRecord
// ---------------------------------------------------------------------------

/// A local identity: an address the user owns, with its key material.
///
/// Immutable after creation except for the dissemination timestamp.
/// The secret scalars are zeroized when the record is dropped.
pub struct AddressRecord {
    /// Store-assigned id; 0 until first persisted.
    pub id: AddressId,
    /// The address string, e.g. `BM-…`.
    pub address: String,
    /// Address version, `1..=4`.
    pub version: u64,
    /// Stream number.
    pub stream: u64,
    /// Ripe hash of the key pair.
    pub ripe: [u8; 20],
    /// Secret signing scalar.
    pub private_signing_key: [u8; 32],
    /// Secret encryption scalar.
    pub private_encryption_key: [u8; 32],
    /// Unix time the address's pubkey was last pushed to a gateway;
    /// 0 when never disseminated.
    pub last_pubkey_dissemination_time: u64,
}

impl Drop for AddressRecord {
    fn drop(&mut self) {
        self.private_signing_key.zeroize();
        self.private_encryption_key.zeroize();
    }
}

impl Clone for AddressRecord {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            address: self.address.clone(),
            version: self.version,
            stream: self.stream,
            ripe: self.ripe,
            private_signing_key: self.private_signing_key,
            private_encryption_key: self.private_encryption_key,
            last_pubkey_dissemination_time: self.last_pubkey_dissemination_time,
        }
    }
}

// ---------------------------------------------------------------------------
// PubkeyRecord
// ---------------------------------------------------------------------------

/// A cached pubkey: either one of our own or a peer's.
///
/// Invariant restored by the resolver and the periodic driver: at most
/// one record per ripe hash (per peer) survives a tick.
#[derive(Clone, Debug)]
pub struct PubkeyRecord {
    /// Store-assigned id; 0 until first persisted.
    pub id: PubkeyId,
    /// The wire-model pubkey.
    pub pubkey: Pubkey,
    /// Whether this pubkey belongs to a local address.
    pub belongs_to_me: bool,
    /// The local address it belongs to; 0 for peers' pubkeys.
    pub corresponding_address_id: AddressId,
}

// ---------------------------------------------------------------------------
// PayloadRecord
// ---------------------------------------------------------------------------

/// A fully encoded object awaiting (re-)dissemination.
///
/// Created when an object is assembled; deleted when it expires or is
/// superseded by a regenerated copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayloadRecord {
    /// Store-assigned id; 0 until first persisted.
    pub id: PayloadId,
    /// What kind of object the bytes encode.
    pub kind: ObjectKind,
    /// The encoded object, PoW-nonce-prefixed once work is done.
    pub bytes: Vec<u8>,
    /// Whether the nonce prefix is present.
    pub pow_done: bool,
    /// Unix time at which the object expires.
    pub expiration_time: u64,
    /// Originating local address, if any; 0 otherwise.
    pub related_address_id: AddressId,
    /// Whether this client created the object.
    pub belongs_to_me: bool,
}

// ---------------------------------------------------------------------------
// MessageRecord
// ---------------------------------------------------------------------------

/// A user-visible message, inbound or outbound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Store-assigned id; 0 until first persisted.
    pub id: MessageId,
    /// Sender address string.
    pub sender: String,
    /// Recipient address string.
    pub recipient: String,
    /// Plaintext subject.
    pub subject: String,
    /// Plaintext body.
    pub body: String,
    /// Lifecycle status; mutated only by the orchestrator.
    pub status: MessageStatus,
    /// Opaque acknowledgement data bound to this message; empty until
    /// the msg object is first assembled.
    pub ack_data: Vec<u8>,
}

// ---------------------------------------------------------------------------
// QueueRecord
// ---------------------------------------------------------------------------

/// One unit of queued work.
///
/// The meaning of the object references depends on
/// [`TaskKind`](courier_types::TaskKind); see its table. Ordered by
/// trigger time ascending. For a given `(task, object0)` pair at most
/// two live records exist: one per attempt generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Store-assigned id; 0 until first persisted.
    pub id: QueueRecordId,
    /// The work this record schedules.
    pub task: TaskKind,
    /// Unix time at which the record becomes due.
    pub trigger_time: u64,
    /// Failed executions so far.
    pub attempts: u32,
    /// Attempt generation: 0 for the first send of the underlying
    /// object, incremented for each regeneration. Selects the TTL.
    pub record_count: u32,
    /// First object reference (task-dependent).
    pub object0: u64,
    /// Second object reference (task-dependent).
    pub object1: u64,
    /// Third object reference (task-dependent).
    pub object2: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
