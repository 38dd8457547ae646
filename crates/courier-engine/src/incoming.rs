//! Inbound object processing.
//!
//! Objects pulled from a gateway arrive as opaque blobs. Each one is
//! tried first as an acknowledgement for a pending message, then as a
//! msg against every local identity's encryption key. Whatever matches
//! nothing is dropped — parse and decryption failures are local events
//! and never abort the tick.

use courier_crypto::keys;
use courier_protocol::objects::{self, decode_message_text};
use courier_protocol::address;
use courier_storage::records::MessageRecord;
use courier_types::{MessageId, MessageStatus, Result};

use crate::Engine;

impl Engine {
    /// Processes one inbound object blob.
    ///
    /// Store failures are the only errors that escape; everything
    /// wrong with the object itself just drops it.
    pub(crate) fn process_inbound(&self, blob: &[u8]) -> Result<()> {
        // Acknowledgement first: ack objects carry our own opaque data
        // verbatim, so a store lookup decides.
        if let Ok((_, _, ack_data)) = objects::parse_ack(blob, self.config.strict_eight_byte_time)
        {
            if self.handle_ack(&ack_data)? {
                return Ok(());
            }
        }

        // Not an ack we know: try to decrypt as a msg with each local
        // identity.
        for identity in self.store.all_addresses()? {
            let parsed = objects::parse_msg(
                blob,
                &identity.private_encryption_key,
                self.config.strict_eight_byte_time,
            );
            let (expiration, stream, content) = match parsed {
                Ok(parts) => parts,
                Err(_) => continue,
            };

            if content.destination_ripe != identity.ripe {
                tracing::warn!(
                    address = %identity.id,
                    "decrypted msg names a different destination; dropped"
                );
                return Ok(());
            }

            let signature_payload = objects::msg_signature_payload(&content, expiration, stream);
            if keys::verify_der(
                &content.sender_signing_key,
                &signature_payload,
                &content.signature,
            )
            .is_err()
            {
                tracing::warn!(address = %identity.id, "msg signature invalid; dropped");
                return Ok(());
            }

            return self.accept_msg(&identity.address, stream, &content);
        }

        tracing::debug!(len = blob.len(), "inbound object matched nothing; dropped");
        Ok(())
    }

    /// Stores a verified inbound msg and answers its acknowledgement.
    fn accept_msg(
        &self,
        recipient_address: &str,
        stream: u64,
        content: &objects::MsgContent,
    ) -> Result<()> {
        let sender_ripe = courier_crypto::hash::ripe_of_keys(
            &content.sender_signing_key,
            &content.sender_encryption_key,
        );
        let sender_address =
            address::encode_address(content.sender_version, content.sender_stream, &sender_ripe)?;

        let (subject, body) = decode_message_text(&content.message);
        let message_id = self.store.put_message(MessageRecord {
            id: MessageId(0),
            sender: sender_address.clone(),
            recipient: recipient_address.to_string(),
            subject,
            body,
            status: MessageStatus::Delivered,
            ack_data: Vec::new(),
        })?;
        tracing::info!(
            message = %message_id,
            sender = %sender_address,
            "inbound msg stored"
        );

        if !content.ack_data.is_empty() {
            self.send_ack(stream, &content.ack_data);
        }
        Ok(())
    }

    /// Disseminates the acknowledgement a sender asked for.
    ///
    /// Best-effort: a failed ack only means the sender retries with a
    /// longer TTL later, so failures are logged and swallowed.
    fn send_ack(&self, stream: u64, ack_data: &[u8]) {
        let now = self.now();
        let expiration = now + self.config.first_attempt_ttl;
        let body = objects::serialize_ack(expiration, stream, ack_data);

        let object = match self.apply_pow(body, expiration) {
            Ok((bytes, _, _)) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "ack proof of work failed");
                return;
            }
        };
        if !self.gateway.is_available() {
            tracing::debug!("network down; ack not sent");
            return;
        }
        if let Err(e) = self.gateway.post_object(&object) {
            tracing::warn!(error = %e, "ack dissemination failed");
        }
    }
}
