//! End-to-end engine flows against an in-memory store and a scripted
//! gateway.
//!
//! Every test drives the engine through [`Engine::tick`] with a fixed,
//! manually stepped clock. No test depends on wall-clock time, and
//! proof-of-work is disabled except where a test exercises it with
//! trivially cheap difficulty parameters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use courier_engine::clock::Clock;
use courier_engine::gateway::Gateway;
use courier_engine::{identity, Engine, StoreCleaner};
use courier_protocol::objects::{
    self, prepend_pow_nonce, serialize_ack, serialize_pubkey,
};
use courier_protocol::{address, pow};
use courier_storage::records::{MessageRecord, PayloadRecord, PubkeyRecord, QueueRecord};
use courier_storage::{MemoryStore, Store};
use courier_types::config::EngineConfig;
use courier_types::{
    AddressId, CourierError, MessageId, MessageStatus, ObjectKind, PayloadId, PubkeyId,
    QueueRecordId, Result, TaskKind,
};

/// Base timestamp for all scenarios: 2023-11-14T22:13:20Z.
const T0: u64 = 1_700_000_000;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

struct TestClock(AtomicU64);

impl TestClock {
    fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    fn set(&self, now: u64) {
        self.0.store(now, Ordering::Relaxed);
    }

    fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Scripted gateway: pubkeys served from maps, posted objects
/// recorded, inbound objects drained batch-by-batch.
#[derive(Default)]
struct TestGateway {
    pubkeys_by_tag: Mutex<HashMap<[u8; 32], Vec<u8>>>,
    pubkeys_by_ripe: Mutex<HashMap<[u8; 20], Vec<u8>>>,
    posted: Mutex<Vec<Vec<u8>>>,
    inbound: Mutex<Vec<Vec<u8>>>,
    unavailable: AtomicBool,
    fail_posts: AtomicBool,
}

impl TestGateway {
    fn publish_pubkey_by_tag(&self, tag: [u8; 32], blob: Vec<u8>) {
        self.pubkeys_by_tag.lock().expect("gateway lock").insert(tag, blob);
    }

    fn push_inbound(&self, blob: Vec<u8>) {
        self.inbound.lock().expect("gateway lock").push(blob);
    }

    fn posted_count(&self) -> usize {
        self.posted.lock().expect("gateway lock").len()
    }

    fn posted(&self) -> Vec<Vec<u8>> {
        self.posted.lock().expect("gateway lock").clone()
    }

    fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn set_fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::Relaxed);
    }
}

impl Gateway for TestGateway {
    fn pubkey_by_tag(&self, tag: &[u8; 32]) -> Result<Option<Vec<u8>>> {
        Ok(self.pubkeys_by_tag.lock().expect("gateway lock").get(tag).cloned())
    }

    fn pubkey_by_ripe(&self, ripe: &[u8; 20]) -> Result<Option<Vec<u8>>> {
        Ok(self.pubkeys_by_ripe.lock().expect("gateway lock").get(ripe).cloned())
    }

    fn post_object(&self, object: &[u8]) -> Result<()> {
        if self.fail_posts.load(Ordering::Relaxed) {
            return Err(CourierError::NetworkError {
                reason: "gateway refused the object".into(),
            });
        }
        self.posted.lock().expect("gateway lock").push(object.to_vec());
        Ok(())
    }

    fn fetch_objects(&self, _address: &str, _since: u64) -> Result<Vec<Vec<u8>>> {
        Ok(std::mem::take(&mut *self.inbound.lock().expect("gateway lock")))
    }

    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct CountingCleaner(AtomicU64);

impl StoreCleaner for CountingCleaner {
    fn clean(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    engine: Engine,
    store: Arc<MemoryStore>,
    gateway: Arc<TestGateway>,
    clock: Arc<TestClock>,
    cleaner: Arc<CountingCleaner>,
}

fn harness(config: EngineConfig) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(TestGateway::default());
    let clock = Arc::new(TestClock::new(T0));
    let cleaner = Arc::new(CountingCleaner::default());
    let engine = Engine::new(
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&gateway) as Arc<dyn Gateway>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        Arc::clone(&cleaner) as Arc<dyn StoreCleaner>,
        config,
    )
    .expect("valid configuration");
    Harness {
        engine,
        store,
        gateway,
        clock,
        cleaner,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        do_pow: false,
        ..EngineConfig::default()
    }
}

/// Trivially cheap PoW: divisor stays tiny, a hit lands within a few
/// hundred nonces.
fn cheap_pow_config() -> EngineConfig {
    EngineConfig {
        do_pow: true,
        network_nonce_trials_per_byte: 1,
        network_extra_bytes: 2,
        ..EngineConfig::default()
    }
}

/// Creates a local identity and persists it.
fn local_identity(harness: &Harness) -> courier_storage::records::AddressRecord {
    let record = identity::generate_address(4, 1).expect("generate");
    let id = harness.store.put_address(record).expect("persist");
    harness.store.get_address(id).expect("read").expect("present")
}

/// Creates a remote peer and publishes its pubkey on the gateway.
/// Returns the peer's address string.
fn published_peer(harness: &Harness, ntpb: u64, eb: u64) -> String {
    let peer = identity::generate_address(4, 1).expect("generate");
    let mut pubkey =
        identity::build_signed_pubkey(&peer, T0 + 60 * 86_400, ntpb, eb).expect("build");
    pubkey.pow_nonce = Some(1);
    let blob = serialize_pubkey(&pubkey, &peer.address).expect("serialize");
    let tag = address::address_tag(&peer.address).expect("tag");
    harness.gateway.publish_pubkey_by_tag(tag, blob);
    peer.address.clone()
}

/// Persists a draft message from `sender` to `recipient`.
fn draft_message(harness: &Harness, sender: &str, recipient: &str) -> MessageId {
    harness
        .store
        .put_message(MessageRecord {
            id: MessageId(0),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            subject: "subject".into(),
            body: "body".into(),
            status: MessageStatus::Draft,
            ack_data: Vec::new(),
        })
        .expect("persist message")
}

fn queue_records(harness: &Harness) -> Vec<QueueRecord> {
    harness.store.all_queue_records().expect("queue read")
}

fn message_status(harness: &Harness, id: MessageId) -> MessageStatus {
    harness
        .store
        .get_message(id)
        .expect("store read")
        .expect("message present")
        .status
}

// ---------------------------------------------------------------------------
// Send-message happy path
// ---------------------------------------------------------------------------

#[test]
fn send_message_happy_path_with_ack() {
    let harness = harness(fast_config());
    let sender = local_identity(&harness);
    let recipient = published_peer(&harness, 1, 2);
    let message_id = draft_message(&harness, &sender.address, &recipient);

    harness.engine.submit_message(message_id).expect("submit");
    assert_eq!(message_status(&harness, message_id), MessageStatus::Queued);
    assert_eq!(queue_records(&harness).len(), 2, "active + shadow record");

    harness.engine.tick().expect("tick");

    // The msg object reached the gateway and only the shadow retry
    // record remains, scheduled one first-attempt TTL out.
    assert_eq!(harness.gateway.posted_count(), 1);
    assert_eq!(
        message_status(&harness, message_id),
        MessageStatus::WaitingForAck
    );
    let records = queue_records(&harness);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, TaskKind::SendMessage);
    assert_eq!(records[0].record_count, 1);
    assert_eq!(records[0].trigger_time, T0 + 3_600);

    // The acknowledgement arrives well before the retry fires.
    harness.clock.set(T0 + 1_200);
    let ack_data = harness
        .store
        .get_message(message_id)
        .expect("store read")
        .expect("present")
        .ack_data;
    assert_eq!(ack_data.len(), 32);
    let ack_object = prepend_pow_nonce(5, &serialize_ack(T0 + 3_600, 1, &ack_data));
    harness.gateway.push_inbound(ack_object);

    harness.engine.tick().expect("tick");

    assert_eq!(message_status(&harness, message_id), MessageStatus::Delivered);
    assert!(
        queue_records(&harness).is_empty(),
        "ack cancels the whole send flow"
    );
}

#[test]
fn posted_msg_object_is_decryptable_by_recipient_only() {
    let harness = harness(fast_config());
    let sender = local_identity(&harness);

    // Publish the peer and keep its secret for decryption.
    let peer = identity::generate_address(4, 1).expect("generate");
    let mut pubkey = identity::build_signed_pubkey(&peer, T0 + 60 * 86_400, 1, 2).expect("build");
    pubkey.pow_nonce = Some(1);
    let blob = serialize_pubkey(&pubkey, &peer.address).expect("serialize");
    harness
        .gateway
        .publish_pubkey_by_tag(address::address_tag(&peer.address).expect("tag"), blob);

    let message_id = draft_message(&harness, &sender.address, &peer.address);
    harness.engine.submit_message(message_id).expect("submit");
    harness.engine.tick().expect("tick");

    let posted = harness.gateway.posted();
    assert_eq!(posted.len(), 1);

    // Without PoW the object has no nonce prefix; parse_msg expects
    // one, so prepend a placeholder as a relay would after working it.
    let object = prepend_pow_nonce(0, &posted[0]);
    let (expiration, stream, content) =
        objects::parse_msg(&object, &peer.private_encryption_key, false).expect("decrypts");
    assert_eq!(expiration, T0 + 3_600, "first attempt TTL");
    assert_eq!(stream, 1);
    assert_eq!(content.destination_ripe, peer.ripe);
    let (subject, body) = objects::decode_message_text(&content.message);
    assert_eq!(subject, "subject");
    assert_eq!(body, "body");

    // A third party cannot read it.
    let bystander = identity::generate_address(4, 1).expect("generate");
    assert!(objects::parse_msg(&object, &bystander.private_encryption_key, false).is_err());
}

#[test]
fn pow_enabled_send_produces_verifiable_work() {
    let harness = harness(cheap_pow_config());
    let sender = local_identity(&harness);
    let recipient = published_peer(&harness, 1, 2);
    let message_id = draft_message(&harness, &sender.address, &recipient);

    harness.engine.submit_message(message_id).expect("submit");
    harness.engine.tick().expect("tick");

    let posted = harness.gateway.posted();
    assert_eq!(posted.len(), 1);
    let object = &posted[0];
    assert!(object.len() > 8);

    let nonce = u64::from_be_bytes(object[..8].try_into().expect("8 bytes"));
    let body = &object[8..];
    let sufficient = pow::check_pow(body, nonce, T0 + 3_600, 1, 2, T0).expect("check");
    assert!(sufficient, "posted object must carry sufficient work");
}

// ---------------------------------------------------------------------------
// Retry, back-off, and the attempt cap
// ---------------------------------------------------------------------------

#[test]
fn unresolvable_recipient_backs_off_and_eventually_fails() {
    let config = EngineConfig {
        do_pow: false,
        maximum_attempts: 2,
        ..EngineConfig::default()
    };
    let harness = harness(config);
    let sender = local_identity(&harness);
    // Recipient is never published on the gateway.
    let recipient = identity::generate_address(4, 1).expect("generate").address.clone();
    let message_id = draft_message(&harness, &sender.address, &recipient);

    harness.engine.submit_message(message_id).expect("submit");

    for _ in 0..100 {
        if queue_records(&harness).is_empty() {
            break;
        }
        harness.clock.advance(200_000);
        harness.engine.tick().expect("tick");
    }

    assert!(
        queue_records(&harness).is_empty(),
        "no live records may survive the attempt cap"
    );
    assert_eq!(message_status(&harness, message_id), MessageStatus::Failed);
}

#[test]
fn failed_gateway_post_bumps_attempts() {
    let harness = harness(fast_config());
    let sender = local_identity(&harness);
    let recipient = published_peer(&harness, 1, 2);
    let message_id = draft_message(&harness, &sender.address, &recipient);

    harness.gateway.set_fail_posts(true);
    harness.engine.submit_message(message_id).expect("submit");
    harness.engine.tick().expect("tick");

    // The flow reached dissemination and is waiting out its back-off.
    let records = queue_records(&harness);
    let dissemination: Vec<_> = records
        .iter()
        .filter(|record| record.task == TaskKind::DisseminateMessage)
        .collect();
    assert_eq!(dissemination.len(), 1);
    assert_eq!(dissemination[0].attempts, 1);
    assert!(dissemination[0].trigger_time > T0);

    // Once the gateway recovers the retry succeeds.
    harness.gateway.set_fail_posts(false);
    harness.clock.advance(200);
    harness.engine.tick().expect("tick");
    assert_eq!(harness.gateway.posted_count(), 1);
    assert_eq!(
        message_status(&harness, message_id),
        MessageStatus::WaitingForAck
    );
}

// ---------------------------------------------------------------------------
// Queue uniqueness
// ---------------------------------------------------------------------------

#[test]
fn duplicate_send_records_collapse_to_two_ordered_records() {
    let harness = harness(fast_config());

    for (trigger, record_count) in [(T0 + 100, 0u32), (T0 + 200, 1), (T0 + 300, 1)] {
        harness
            .store
            .put_queue_record(QueueRecord {
                id: QueueRecordId(0),
                task: TaskKind::SendMessage,
                trigger_time: trigger,
                attempts: 0,
                record_count,
                object0: 77,
                object1: 0,
                object2: 0,
            })
            .expect("seed record");
    }

    harness.engine.tick().expect("tick");

    let records = queue_records(&harness);
    assert_eq!(records.len(), 2, "at most two live records per message");
    let mut triggers: Vec<u64> = records.iter().map(|record| record.trigger_time).collect();
    triggers.sort_unstable();
    assert!(triggers[0] < triggers[1], "strictly ordered trigger times");
}

// ---------------------------------------------------------------------------
// Expiry regeneration
// ---------------------------------------------------------------------------

#[test]
fn expiring_msg_payload_is_regenerated_with_subsequent_ttl() {
    let harness = harness(fast_config());
    let sender = local_identity(&harness);
    let recipient_address = published_peer(&harness, 1, 2);
    let message_id = draft_message(&harness, &sender.address, &recipient_address);

    // Resolve the pubkey into the store so the regenerated stage can
    // find it without the gateway.
    let decoded = address::decode_address(&recipient_address).expect("decode");
    let pubkey_blob = harness
        .gateway
        .pubkey_by_tag(&address::address_tag(&recipient_address).expect("tag"))
        .expect("gateway read")
        .expect("published");
    let pubkey =
        objects::parse_pubkey(&pubkey_blob, Some(&recipient_address), false).expect("parse");
    assert_eq!(pubkey.ripe, decoded.ripe);
    let pubkey_id = harness
        .store
        .put_pubkey(PubkeyRecord {
            id: PubkeyId(0),
            pubkey,
            belongs_to_me: false,
            corresponding_address_id: AddressId(0),
        })
        .expect("persist pubkey");

    // A worked msg payload with only 60 seconds of life left.
    let payload_id = harness
        .store
        .put_payload(PayloadRecord {
            id: PayloadId(0),
            kind: ObjectKind::Msg,
            bytes: vec![0u8; 64],
            pow_done: true,
            expiration_time: T0 + 60,
            related_address_id: sender.id,
            belongs_to_me: true,
        })
        .expect("persist payload");

    harness
        .store
        .put_queue_record(QueueRecord {
            id: QueueRecordId(0),
            task: TaskKind::DisseminateMessage,
            trigger_time: T0,
            attempts: 0,
            record_count: 0,
            object0: message_id.0,
            object1: payload_id.0,
            object2: pubkey_id.0,
        })
        .expect("seed record");

    // Keep the gateway down so the rebuilt flow parks at dissemination
    // where its fresh TTL is observable.
    harness.gateway.set_unavailable(true);
    harness.engine.tick().expect("tick");

    assert!(
        harness.store.get_payload(payload_id).expect("store read").is_none(),
        "the dying payload is discarded"
    );

    let records = queue_records(&harness);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, TaskKind::DisseminateMessage);
    assert!(records[0].record_count >= 1, "subsequent generation");

    let rebuilt = harness
        .store
        .get_payload(PayloadId(records[0].object1))
        .expect("store read")
        .expect("rebuilt payload");
    assert_eq!(
        rebuilt.expiration_time,
        T0 + 86_400,
        "rebuilt with the subsequent-attempts TTL"
    );
    assert_eq!(harness.gateway.posted_count(), 0);
}

// ---------------------------------------------------------------------------
// Identity flow
// ---------------------------------------------------------------------------

#[test]
fn create_identity_disseminates_pubkey() {
    // Cheap real PoW so the posted object carries its nonce prefix
    // and parses as a network object.
    let harness = harness(cheap_pow_config());
    let identity_record = local_identity(&harness);

    harness
        .engine
        .submit_create_identity(identity_record.id)
        .expect("submit");
    harness.engine.tick().expect("tick");

    assert_eq!(harness.gateway.posted_count(), 1, "pubkey reached the gateway");
    assert!(queue_records(&harness).is_empty());

    let refreshed = harness
        .store
        .get_address(identity_record.id)
        .expect("store read")
        .expect("present");
    assert_eq!(refreshed.last_pubkey_dissemination_time, T0);

    // The posted object parses and validates as our own pubkey.
    let posted = harness.gateway.posted();
    let parsed =
        objects::parse_pubkey(&posted[0], Some(&identity_record.address), false).expect("parse");
    assert!(parsed.pow_nonce.is_some());
    objects::validate_pubkey(&parsed, &identity_record.address).expect("valid for the address");
}

#[test]
fn expiring_pubkey_payload_rewinds_to_identity_creation() {
    let harness = harness(fast_config());
    let identity_record = local_identity(&harness);

    let payload_id = harness
        .store
        .put_payload(PayloadRecord {
            id: PayloadId(0),
            kind: ObjectKind::Pubkey,
            bytes: vec![0u8; 32],
            pow_done: true,
            expiration_time: T0 + 30,
            related_address_id: identity_record.id,
            belongs_to_me: true,
        })
        .expect("persist payload");
    harness
        .store
        .put_queue_record(QueueRecord {
            id: QueueRecordId(0),
            task: TaskKind::DisseminatePubkey,
            trigger_time: T0,
            attempts: 0,
            record_count: 0,
            object0: payload_id.0,
            object1: 0,
            object2: 0,
        })
        .expect("seed record");

    harness.gateway.set_unavailable(true);
    harness.engine.tick().expect("tick");

    assert!(harness.store.get_payload(payload_id).expect("store read").is_none());
    let records = queue_records(&harness);
    // The rewound create-identity record ran in the same tick and
    // produced a fresh dissemination record for the new payload.
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, TaskKind::DisseminatePubkey);
    let rebuilt = harness
        .store
        .get_payload(PayloadId(records[0].object0))
        .expect("store read")
        .expect("rebuilt payload");
    assert!(rebuilt.expiration_time > T0 + 30);
}

// ---------------------------------------------------------------------------
// Duplicate pubkey collapse
// ---------------------------------------------------------------------------

#[test]
fn duplicate_own_pubkeys_collapse_to_latest_expiration() {
    let harness = harness(fast_config());
    let identity_record = local_identity(&harness);

    let mut ids = Vec::new();
    let mut payload_ids = Vec::new();
    for expiration in [T0 + 1_000, T0 + 2_000] {
        let pubkey =
            identity::build_signed_pubkey(&identity_record, expiration, 1_000, 1_000)
                .expect("build");
        ids.push(
            harness
                .store
                .put_pubkey(PubkeyRecord {
                    id: PubkeyId(0),
                    pubkey,
                    belongs_to_me: true,
                    corresponding_address_id: identity_record.id,
                })
                .expect("persist pubkey"),
        );
        let payload_id = harness
            .store
            .put_payload(PayloadRecord {
                id: PayloadId(0),
                kind: ObjectKind::Pubkey,
                bytes: vec![0u8; 32],
                pow_done: true,
                expiration_time: expiration,
                related_address_id: identity_record.id,
                belongs_to_me: true,
            })
            .expect("persist payload");
        payload_ids.push(payload_id);
        harness
            .store
            .put_queue_record(QueueRecord {
                id: QueueRecordId(0),
                task: TaskKind::DisseminatePubkey,
                trigger_time: T0 + 10_000,
                attempts: 0,
                record_count: 0,
                object0: payload_id.0,
                object1: 0,
                object2: 0,
            })
            .expect("seed record");
    }

    harness.gateway.set_unavailable(true);
    harness.engine.tick().expect("tick");

    let survivors = harness
        .store
        .search_pubkeys_by_ripe(&identity_record.ripe)
        .expect("store read");
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].pubkey.expiration_time, T0 + 2_000);

    // The stale payload and its dissemination record are gone; the
    // fresh one keeps its record.
    assert!(harness.store.get_payload(payload_ids[0]).expect("read").is_none());
    assert!(harness.store.get_payload(payload_ids[1]).expect("read").is_some());
    let records = queue_records(&harness);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].object0, payload_ids[1].0);
}

// ---------------------------------------------------------------------------
// Inbound messages
// ---------------------------------------------------------------------------

#[test]
fn inbound_msg_is_stored_and_acknowledged() {
    let harness = harness(cheap_pow_config());
    let receiver = local_identity(&harness);

    // A remote peer builds a msg addressed to our identity.
    let peer = identity::generate_address(4, 1).expect("generate");
    let peer_signing =
        courier_crypto::keys::EcKeyPair::from_secret_bytes(&peer.private_signing_key)
            .expect("keys");
    let peer_encryption =
        courier_crypto::keys::EcKeyPair::from_secret_bytes(&peer.private_encryption_key)
            .expect("keys");

    let expiration = T0 + 3_600;
    let mut content = objects::MsgContent {
        sender_version: peer.version,
        sender_stream: peer.stream,
        behaviour_bitfield: objects::BEHAVIOUR_DOES_ACK,
        sender_signing_key: peer_signing.public_uncompressed(),
        sender_encryption_key: peer_encryption.public_uncompressed(),
        nonce_trials_per_byte: 1,
        extra_bytes: 2,
        destination_ripe: receiver.ripe,
        encoding: objects::MSG_ENCODING_SIMPLE,
        message: objects::encode_message_text("hi", "inbound body"),
        ack_data: vec![0x7E; 32],
        signature: Vec::new(),
    };
    content.signature = courier_crypto::keys::sign_der(
        &peer.private_signing_key,
        &objects::msg_signature_payload(&content, expiration, 1),
    )
    .expect("sign");

    let receiver_encryption =
        courier_crypto::keys::EcKeyPair::from_secret_bytes(&receiver.private_encryption_key)
            .expect("keys");
    let body = objects::serialize_msg(
        &content,
        expiration,
        1,
        &receiver_encryption.public_uncompressed(),
    )
    .expect("serialize");
    harness.gateway.push_inbound(prepend_pow_nonce(9, &body));

    harness.engine.tick().expect("tick");

    // Locate the stored message by scanning ids: the store is small,
    // the first message row is ours.
    let mut found = None;
    for raw_id in 1..20 {
        if let Some(message) = harness.store.get_message(MessageId(raw_id)).expect("read") {
            found = Some(message);
            break;
        }
    }
    let message = found.expect("inbound message stored");
    assert_eq!(message.sender, peer.address);
    assert_eq!(message.recipient, receiver.address);
    assert_eq!(message.subject, "hi");
    assert_eq!(message.body, "inbound body");
    assert_eq!(message.status, MessageStatus::Delivered);

    // The acknowledgement went back out, carrying the peer's ack data.
    let posted = harness.gateway.posted();
    assert_eq!(posted.len(), 1);
    let (_, _, ack_data) = objects::parse_ack(&posted[0], false).expect("ack parses");
    assert_eq!(ack_data, vec![0x7E; 32]);
}

// ---------------------------------------------------------------------------
// Driver housekeeping
// ---------------------------------------------------------------------------

#[test]
fn cleaning_runs_on_its_cadence() {
    let harness = harness(fast_config());
    local_identity(&harness);

    harness.engine.tick().expect("tick");
    assert_eq!(harness.cleaner.0.load(Ordering::Relaxed), 1);

    // Within the cadence: no extra run.
    harness.clock.advance(600);
    harness.engine.tick().expect("tick");
    assert_eq!(harness.cleaner.0.load(Ordering::Relaxed), 1);

    harness.clock.advance(3_601);
    harness.engine.tick().expect("tick");
    assert_eq!(harness.cleaner.0.load(Ordering::Relaxed), 2);
}

#[test]
fn stale_pubkey_is_queued_for_redissemination() {
    let harness = harness(fast_config());
    let mut identity_record = local_identity(&harness);
    identity_record.last_pubkey_dissemination_time = T0;
    harness.store.update_address(&identity_record).expect("update");

    harness
        .store
        .put_payload(PayloadRecord {
            id: PayloadId(0),
            kind: ObjectKind::Pubkey,
            bytes: vec![0u8; 32],
            pow_done: true,
            expiration_time: T0 + 120 * 86_400,
            related_address_id: identity_record.id,
            belongs_to_me: true,
        })
        .expect("persist payload");

    // Inside the period: nothing queued.
    harness.clock.set(T0 + 27 * 86_400);
    harness.gateway.set_unavailable(true);
    harness.engine.tick().expect("tick");
    assert!(queue_records(&harness).is_empty());

    // Past 28 days: a dissemination record appears.
    harness.clock.set(T0 + 28 * 86_400 + 1);
    harness.engine.tick().expect("tick");
    let records = queue_records(&harness);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].task, TaskKind::DisseminatePubkey);
}

#[test]
fn invalid_configuration_is_rejected_at_construction() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(TestGateway::default());
    let clock = Arc::new(TestClock::new(T0));
    let cleaner = Arc::new(CountingCleaner::default());
    let config = EngineConfig {
        maximum_attempts: 0,
        ..EngineConfig::default()
    };

    let result = Engine::new(store, gateway, clock, cleaner, config);
    assert!(matches!(result, Err(CourierError::ConfigError { .. })));
}
