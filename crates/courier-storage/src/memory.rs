//! In-memory reference implementation of the store contract.
//!
//! Backs the engine's test suites and serves as executable
//! documentation of the contract. All state lives behind one
//! `std::sync::Mutex`; every call locks, applies, and returns, which
//! gives the same per-call transactional behaviour a real store
//! provides.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use courier_types::{
    AddressId, CourierError, MessageId, PayloadId, PubkeyId, QueueRecordId, Result,
};

use crate::records::{AddressRecord, MessageRecord, PayloadRecord, PubkeyRecord, QueueRecord};
use crate::store::Store;

#[derive(Default)]
struct Inner {
    next_id: u64,
    addresses: BTreeMap<u64, AddressRecord>,
    pubkeys: BTreeMap<u64, PubkeyRecord>,
    payloads: BTreeMap<u64, PayloadRecord>,
    messages: BTreeMap<u64, MessageRecord>,
    queue: BTreeMap<u64, QueueRecord>,
}

impl Inner {
    fn assign_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|e| CourierError::StoreError {
            reason: format!("store lock poisoned: {e}"),
        })
    }
}

impl Store for MemoryStore {
    fn is_unlocked(&self) -> bool {
        true
    }

    // -- Addresses --------------------------------------------------------

    fn put_address(&self, mut record: AddressRecord) -> Result<AddressId> {
        let mut inner = self.lock()?;
        let id = inner.assign_id();
        record.id = AddressId(id);
        inner.addresses.insert(id, record);
        Ok(AddressId(id))
    }

    fn get_address(&self, id: AddressId) -> Result<Option<AddressRecord>> {
        Ok(self.lock()?.addresses.get(&id.0).cloned())
    }

    fn find_address_by_string(&self, address: &str) -> Result<Option<AddressRecord>> {
        Ok(self
            .lock()?
            .addresses
            .values()
            .find(|record| record.address == address)
            .cloned())
    }

    fn all_addresses(&self) -> Result<Vec<AddressRecord>> {
        Ok(self.lock()?.addresses.values().cloned().collect())
    }

    fn update_address(&self, record: &AddressRecord) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.addresses.get_mut(&record.id.0) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(CourierError::StoreError {
                reason: format!("address {} does not exist", record.id),
            }),
        }
    }

    // -- Pubkeys ----------------------------------------------------------

    fn put_pubkey(&self, mut record: PubkeyRecord) -> Result<PubkeyId> {
        let mut inner = self.lock()?;
        let id = inner.assign_id();
        record.id = PubkeyId(id);
        inner.pubkeys.insert(id, record);
        Ok(PubkeyId(id))
    }

    fn get_pubkey(&self, id: PubkeyId) -> Result<Option<PubkeyRecord>> {
        Ok(self.lock()?.pubkeys.get(&id.0).cloned())
    }

    fn search_pubkeys_by_ripe(&self, ripe: &[u8; 20]) -> Result<Vec<PubkeyRecord>> {
        Ok(self
            .lock()?
            .pubkeys
            .values()
            .filter(|record| &record.pubkey.ripe == ripe)
            .cloned()
            .collect())
    }

    fn delete_pubkey(&self, id: PubkeyId) -> Result<()> {
        self.lock()?.pubkeys.remove(&id.0);
        Ok(())
    }

    // -- Payloads ---------------------------------------------------------

    fn put_payload(&self, mut record: PayloadRecord) -> Result<PayloadId> {
        let mut inner = self.lock()?;
        let id = inner.assign_id();
        record.id = PayloadId(id);
        inner.payloads.insert(id, record);
        Ok(PayloadId(id))
    }

    fn get_payload(&self, id: PayloadId) -> Result<Option<PayloadRecord>> {
        Ok(self.lock()?.payloads.get(&id.0).cloned())
    }

    fn search_payloads_by_address(&self, address: AddressId) -> Result<Vec<PayloadRecord>> {
        Ok(self
            .lock()?
            .payloads
            .values()
            .filter(|record| record.related_address_id == address)
            .cloned()
            .collect())
    }

    fn delete_payload(&self, id: PayloadId) -> Result<()> {
        self.lock()?.payloads.remove(&id.0);
        Ok(())
    }

    // -- Messages ---------------------------------------------------------

    fn put_message(&self, mut record: MessageRecord) -> Result<MessageId> {
        let mut inner = self.lock()?;
        let id = inner.assign_id();
        record.id = MessageId(id);
        inner.messages.insert(id, record);
        Ok(MessageId(id))
    }

    fn get_message(&self, id: MessageId) -> Result<Option<MessageRecord>> {
        Ok(self.lock()?.messages.get(&id.0).cloned())
    }

    fn find_message_by_ack(&self, ack_data: &[u8]) -> Result<Option<MessageRecord>> {
        if ack_data.is_empty() {
            return Ok(None);
        }
        Ok(self
            .lock()?
            .messages
            .values()
            .find(|record| record.ack_data == ack_data)
            .cloned())
    }

    fn update_message(&self, record: &MessageRecord) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.messages.get_mut(&record.id.0) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(CourierError::StoreError {
                reason: format!("message {} does not exist", record.id),
            }),
        }
    }

    // -- Queue records ----------------------------------------------------

    fn put_queue_record(&self, mut record: QueueRecord) -> Result<QueueRecordId> {
        let mut inner = self.lock()?;
        let id = inner.assign_id();
        record.id = QueueRecordId(id);
        inner.queue.insert(id, record);
        Ok(QueueRecordId(id))
    }

    fn get_queue_record(&self, id: QueueRecordId) -> Result<Option<QueueRecord>> {
        Ok(self.lock()?.queue.get(&id.0).cloned())
    }

    fn all_queue_records(&self) -> Result<Vec<QueueRecord>> {
        Ok(self.lock()?.queue.values().cloned().collect())
    }

    fn update_queue_record(&self, record: &QueueRecord) -> Result<()> {
        let mut inner = self.lock()?;
        match inner.queue.get_mut(&record.id.0) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(CourierError::StoreError {
                reason: format!("queue record {} does not exist", record.id),
            }),
        }
    }

    fn delete_queue_record(&self, id: QueueRecordId) -> Result<()> {
        self.lock()?.queue.remove(&id.0);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
