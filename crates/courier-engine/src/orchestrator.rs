//! Task execution: the five state machines behind the queue.
//!
//! Each executor advances one queue record, commits its successor
//! record, and deletes itself only once the step's side effects are in
//! the store. A missing referent (the user deleted the message, a
//! payload was cleaned away) deletes the offending record and moves
//! on; transient failures — gateway trouble, cancelled PoW — bubble up
//! so the driver can bump the attempt count and reschedule.

use courier_crypto::keys::{self, EcKeyPair};
use courier_protocol::objects::{
    self, encode_message_text, prepend_pow_nonce, MsgContent, BEHAVIOUR_DOES_ACK,
    MSG_ENCODING_SIMPLE,
};
use courier_protocol::{address, pow};
use courier_storage::records::{PayloadRecord, PubkeyRecord, QueueRecord};
use courier_types::{
    AddressId, CourierError, MessageId, MessageStatus, ObjectKind, PayloadId, PubkeyId, Result,
    TaskKind,
};
use rand::RngCore;

use crate::queue::{self, ttl_for_generation};
use crate::resolver::PubkeyResolver;
use crate::Engine;

/// Length of the opaque acknowledgement data bound to each message.
const ACK_DATA_LEN: usize = 32;

impl Engine {
    // -----------------------------------------------------------------------
    // UI intents
    // -----------------------------------------------------------------------

    /// Submits a composed message for sending.
    ///
    /// Creates the active send record plus the shadow retry record one
    /// first-attempt TTL out; the shadow is deleted when the
    /// acknowledgement arrives in time.
    ///
    /// # Errors
    ///
    /// [`CourierError::NotFound`] when the message does not exist.
    pub fn submit_message(&self, message_id: MessageId) -> Result<()> {
        let mut message = self.store.get_message(message_id)?.ok_or_else(|| {
            CourierError::NotFound {
                reason: format!("message {message_id} does not exist"),
            }
        })?;

        message.status = MessageStatus::Queued;
        self.store.update_message(&message)?;

        let now = self.now();
        queue::enqueue(&*self.store, TaskKind::SendMessage, now, 0, message_id.0, 0, 0)?;
        queue::enqueue(
            &*self.store,
            TaskKind::SendMessage,
            now + self.config.first_attempt_ttl,
            1,
            message_id.0,
            0,
            0,
        )?;
        tracing::info!(message = %message_id, "message submitted for sending");
        Ok(())
    }

    /// Submits a local address for identity creation: its pubkey will
    /// be built, worked, and disseminated.
    ///
    /// # Errors
    ///
    /// [`CourierError::NotFound`] when the address does not exist.
    pub fn submit_create_identity(&self, address_id: AddressId) -> Result<()> {
        if self.store.get_address(address_id)?.is_none() {
            return Err(CourierError::NotFound {
                reason: format!("address {address_id} does not exist"),
            });
        }
        queue::enqueue(
            &*self.store,
            TaskKind::CreateIdentity,
            self.now(),
            0,
            address_id.0,
            0,
            0,
        )?;
        tracing::info!(address = %address_id, "identity creation queued");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub(crate) fn execute_record(&self, record: QueueRecord) -> Result<()> {
        tracing::debug!(
            record = %record.id,
            task = %record.task,
            attempts = record.attempts,
            "executing queue record"
        );
        match record.task {
            TaskKind::CreateIdentity => self.task_create_identity(record),
            TaskKind::DisseminatePubkey => self.task_disseminate_pubkey(record),
            TaskKind::SendMessage => self.task_send_message(record),
            TaskKind::ProcessOutgoingMessage => self.task_process_outgoing_message(record),
            TaskKind::DisseminateMessage => self.task_disseminate_message(record),
        }
    }

    // -----------------------------------------------------------------------
    // Identity flow
    // -----------------------------------------------------------------------

    /// Builds, signs, and (optionally) works the pubkey object for a
    /// local address, then queues its dissemination.
    fn task_create_identity(&self, record: QueueRecord) -> Result<()> {
        let Some(address) = self.store.get_address(AddressId(record.object0))? else {
            tracing::warn!(record = %record.id, "address is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };

        let now = self.now();
        let expiration = now + ttl_for_generation(record.record_count, &self.config);
        let pubkey = crate::identity::build_signed_pubkey(
            &address,
            expiration,
            self.config.network_nonce_trials_per_byte,
            self.config.network_extra_bytes,
        )?;
        let body = objects::serialize_pubkey(&pubkey, &address.address)?;
        let (bytes, pow_done, pow_nonce) = self.apply_pow(body, expiration)?;

        let payload_id = self.store.put_payload(PayloadRecord {
            id: PayloadId(0),
            kind: ObjectKind::Pubkey,
            bytes,
            pow_done,
            expiration_time: expiration,
            related_address_id: address.id,
            belongs_to_me: true,
        })?;

        let mut own = pubkey;
        own.pow_nonce = pow_nonce;
        self.store.put_pubkey(PubkeyRecord {
            id: PubkeyId(0),
            pubkey: own,
            belongs_to_me: true,
            corresponding_address_id: address.id,
        })?;

        queue::enqueue(
            &*self.store,
            TaskKind::DisseminatePubkey,
            now,
            record.record_count,
            payload_id.0,
            0,
            0,
        )?;
        self.store.delete_queue_record(record.id)?;
        tracing::info!(
            address = %address.id,
            payload = %payload_id,
            "pubkey object built and queued for dissemination"
        );
        Ok(())
    }

    /// Pushes a finished pubkey payload to a gateway, regenerating it
    /// when too little lifetime remains.
    fn task_disseminate_pubkey(&self, record: QueueRecord) -> Result<()> {
        let Some(payload) = self.store.get_payload(PayloadId(record.object0))? else {
            tracing::warn!(record = %record.id, "pubkey payload is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };

        let now = self.now();
        if payload.expiration_time.saturating_sub(now) < self.config.minimum_time_to_live {
            tracing::info!(
                payload = %payload.id,
                "pubkey payload expires too soon; regenerating"
            );
            self.store.delete_payload(payload.id)?;
            self.store.delete_queue_record(record.id)?;
            queue::enqueue(
                &*self.store,
                TaskKind::CreateIdentity,
                now,
                record.record_count.max(1),
                payload.related_address_id.0,
                0,
                0,
            )?;
            return Ok(());
        }

        if !self.gateway.is_available() {
            tracing::debug!(record = %record.id, "network down; leaving record queued");
            return Ok(());
        }
        self.gateway.post_object(&payload.bytes)?;
        self.store.delete_queue_record(record.id)?;

        if let Some(mut address) = self.store.get_address(payload.related_address_id)? {
            address.last_pubkey_dissemination_time = now;
            self.store.update_address(&address)?;
        }
        tracing::info!(payload = %payload.id, "pubkey disseminated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Send flow
    // -----------------------------------------------------------------------

    /// Resolves the recipient pubkey and hands the message to the
    /// encryption stage.
    fn task_send_message(&self, record: QueueRecord) -> Result<()> {
        let Some(mut message) = self.store.get_message(MessageId(record.object0))? else {
            tracing::warn!(record = %record.id, "message is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };

        // A terminally failed message never re-enters the flow; its
        // leftover shadow records drain away here.
        if message.status == MessageStatus::Failed {
            tracing::debug!(message = %message.id, "message already failed; dropping record");
            return self.store.delete_queue_record(record.id);
        }

        let now = self.now();

        // A retry generation re-creates its own shadow so an
        // acknowledgement always has a successor to cancel.
        if record.record_count > 0 && queue::matching_records(&*self.store, &record)?.is_empty() {
            queue::enqueue(
                &*self.store,
                TaskKind::SendMessage,
                now + self.config.subsequent_attempts_ttl,
                record.record_count + 1,
                record.object0,
                0,
                0,
            )?;
        }

        message.status = MessageStatus::Sending;
        self.store.update_message(&message)?;

        let resolver = PubkeyResolver::new(
            std::sync::Arc::clone(&self.store),
            std::sync::Arc::clone(&self.gateway),
            self.config.strict_eight_byte_time,
        );
        let pubkey_record = resolver.resolve(&message.recipient)?;

        queue::enqueue(
            &*self.store,
            TaskKind::ProcessOutgoingMessage,
            now,
            record.record_count,
            record.object0,
            pubkey_record.id.0,
            0,
        )?;
        self.store.delete_queue_record(record.id)?;
        tracing::info!(
            message = %message.id,
            pubkey = %pubkey_record.id,
            "recipient pubkey resolved"
        );
        Ok(())
    }

    /// Encrypts, signs, and works the msg object, then queues its
    /// dissemination.
    fn task_process_outgoing_message(&self, record: QueueRecord) -> Result<()> {
        let Some(mut message) = self.store.get_message(MessageId(record.object0))? else {
            tracing::warn!(record = %record.id, "message is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };
        let Some(pubkey_record) = self.store.get_pubkey(PubkeyId(record.object1))? else {
            tracing::warn!(record = %record.id, "recipient pubkey is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };
        let Some(sender) = self.store.find_address_by_string(&message.sender)? else {
            tracing::warn!(record = %record.id, "sender identity is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };

        let recipient = match address::decode_address(&message.recipient) {
            Ok(decoded) => decoded,
            Err(e) => {
                // A recipient that no longer parses can never succeed.
                tracing::warn!(message = %message.id, error = %e, "unusable recipient");
                message.status = MessageStatus::Failed;
                self.store.update_message(&message)?;
                return self.store.delete_queue_record(record.id);
            }
        };

        let now = self.now();
        let expiration = now + ttl_for_generation(record.record_count, &self.config);

        if message.ack_data.is_empty() {
            let mut ack_data = vec![0u8; ACK_DATA_LEN];
            rand::rngs::OsRng.fill_bytes(&mut ack_data);
            message.ack_data = ack_data;
            self.store.update_message(&message)?;
        }

        let signing = EcKeyPair::from_secret_bytes(&sender.private_signing_key)?;
        let encryption = EcKeyPair::from_secret_bytes(&sender.private_encryption_key)?;
        let mut content = MsgContent {
            sender_version: sender.version,
            sender_stream: sender.stream,
            behaviour_bitfield: BEHAVIOUR_DOES_ACK,
            sender_signing_key: signing.public_uncompressed(),
            sender_encryption_key: encryption.public_uncompressed(),
            nonce_trials_per_byte: self.config.network_nonce_trials_per_byte,
            extra_bytes: self.config.network_extra_bytes,
            destination_ripe: recipient.ripe,
            encoding: MSG_ENCODING_SIMPLE,
            message: encode_message_text(&message.subject, &message.body),
            ack_data: message.ack_data.clone(),
            signature: Vec::new(),
        };
        content.signature = keys::sign_der(
            &sender.private_signing_key,
            &objects::msg_signature_payload(&content, expiration, recipient.stream),
        )?;

        let body = objects::serialize_msg(
            &content,
            expiration,
            recipient.stream,
            &pubkey_record.pubkey.public_encryption_key,
        )?;

        // The recipient's demanded difficulty, floored at the network
        // minimums.
        let trials = pubkey_record
            .pubkey
            .nonce_trials_per_byte
            .max(self.config.network_nonce_trials_per_byte);
        let extra = pubkey_record
            .pubkey
            .extra_bytes
            .max(self.config.network_extra_bytes);
        let (bytes, pow_done, _) = self.apply_pow_with(body, expiration, trials, extra)?;

        let payload_id = self.store.put_payload(PayloadRecord {
            id: PayloadId(0),
            kind: ObjectKind::Msg,
            bytes,
            pow_done,
            expiration_time: expiration,
            related_address_id: sender.id,
            belongs_to_me: true,
        })?;

        queue::enqueue(
            &*self.store,
            TaskKind::DisseminateMessage,
            now,
            record.record_count,
            record.object0,
            payload_id.0,
            pubkey_record.id.0,
        )?;
        self.store.delete_queue_record(record.id)?;
        tracing::info!(
            message = %message.id,
            payload = %payload_id,
            "msg object built and queued for dissemination"
        );
        Ok(())
    }

    /// Pushes a finished msg payload to a gateway, rewinding the flow
    /// to the encryption stage when too little lifetime remains.
    fn task_disseminate_message(&self, record: QueueRecord) -> Result<()> {
        let Some(mut message) = self.store.get_message(MessageId(record.object0))? else {
            tracing::warn!(record = %record.id, "message is gone; dropping record");
            return self.store.delete_queue_record(record.id);
        };

        let now = self.now();
        let regenerate = |reason: &str| -> Result<()> {
            tracing::info!(message = %message.id, reason, "rebuilding msg object");
            self.store.delete_queue_record(record.id)?;
            queue::enqueue(
                &*self.store,
                TaskKind::ProcessOutgoingMessage,
                now,
                record.record_count.max(1),
                record.object0,
                record.object2,
                0,
            )?;
            Ok(())
        };

        let Some(payload) = self.store.get_payload(PayloadId(record.object1))? else {
            return regenerate("payload is gone");
        };
        if payload.expiration_time.saturating_sub(now) < self.config.minimum_time_to_live {
            self.store.delete_payload(payload.id)?;
            return regenerate("payload expires too soon");
        }

        if !self.gateway.is_available() {
            tracing::debug!(record = %record.id, "network down; leaving record queued");
            return Ok(());
        }
        self.gateway.post_object(&payload.bytes)?;
        self.store.delete_queue_record(record.id)?;

        message.status = MessageStatus::WaitingForAck;
        self.store.update_message(&message)?;
        tracing::info!(message = %message.id, payload = %payload.id, "msg disseminated");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Acknowledgements
    // -----------------------------------------------------------------------

    /// Handles acknowledgement data pulled from the network.
    ///
    /// Returns whether it matched a pending message. On a match the
    /// message becomes delivered and every record of its send flow is
    /// removed.
    pub(crate) fn handle_ack(&self, ack_data: &[u8]) -> Result<bool> {
        let Some(mut message) = self.store.find_message_by_ack(ack_data)? else {
            return Ok(false);
        };

        for record in self.store.all_queue_records()? {
            if record.task.is_send_flow() && record.object0 == message.id.0 {
                self.store.delete_queue_record(record.id)?;
            }
        }
        message.status = MessageStatus::Delivered;
        self.store.update_message(&message)?;
        tracing::info!(message = %message.id, "acknowledgement received; delivered");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // PoW plumbing
    // -----------------------------------------------------------------------

    /// Works a payload at network difficulty when PoW is enabled.
    /// Returns the final bytes, whether work was done, and the nonce.
    pub(crate) fn apply_pow(
        &self,
        body: Vec<u8>,
        expiration: u64,
    ) -> Result<(Vec<u8>, bool, Option<u64>)> {
        self.apply_pow_with(
            body,
            expiration,
            self.config.network_nonce_trials_per_byte,
            self.config.network_extra_bytes,
        )
    }

    fn apply_pow_with(
        &self,
        body: Vec<u8>,
        expiration: u64,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<(Vec<u8>, bool, Option<u64>)> {
        if !self.config.do_pow {
            return Ok((body, false, None));
        }
        let nonce = pow::do_pow(
            &body,
            expiration,
            nonce_trials_per_byte,
            extra_bytes,
            self.now(),
            &self.cancel,
        )?;
        Ok((prepend_pow_nonce(nonce, &body), true, Some(nonce)))
    }
}
