//! Object codec: pubkey, msg, and ack wire layouts.
//!
//! All objects share the same outer framing:
//!
//! ```text
//! [8 bytes]    pow nonce          (present once PoW is done)
//! [4|8 bytes]  expiration time    (8-byte iff the leading dword is zero)
//! ...          object-specific body
//! ```
//!
//! Pubkey bodies carry `version ‖ stream` var-ints followed by either
//! the key block in the clear (v ≤ 3) or a 32-byte tag plus the key
//! block inside an encrypted envelope (v ≥ 4). Msg bodies carry the
//! stream var-int and an envelope encrypted to the recipient. The
//! leading `0x04` of each uncompressed public key is stripped on the
//! wire and reinserted on parse.
//!
//! The 4-vs-8-byte time width is decided solely by whether the first
//! four bytes are zero. That heuristic misreads writers that legally
//! emit wide times, so the legacy 4-byte branch logs a warning and can
//! be disabled outright with the strict flag.

use courier_crypto::hash::ripe_of_keys;
use courier_crypto::{envelope, keys};
use courier_types::{CourierError, Result};

use crate::address::{
    self, MAX_ADDRESS_VERSION, MIN_ADDRESS_VERSION, RIPE_LEN, STREAM_NUMBER,
};
use crate::varint::{decode_varint, encode_varint};

/// Difficulty defaults assumed for pubkeys older than version 3, which
/// predate explicit difficulty fields.
pub const DEFAULT_NONCE_TRIALS_PER_BYTE: u64 = 320;
/// See [`DEFAULT_NONCE_TRIALS_PER_BYTE`].
pub const DEFAULT_EXTRA_BYTES: u64 = 14_000;

/// Behaviour bit: the owner sends acknowledgements.
pub const BEHAVIOUR_DOES_ACK: u32 = 1;

/// Message encoding 2: trivial `Subject:`/`Body:` text framing.
pub const MSG_ENCODING_SIMPLE: u64 = 2;

/// An uncompressed public key on the wire, `0x04` stripped.
const WIRE_KEY_LEN: usize = 64;

/// Length of a v4+ pubkey tag.
const TAG_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Pubkey
// ---------------------------------------------------------------------------

/// A pubkey object, parsed or awaiting serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pubkey {
    /// Address version this pubkey serves, `1..=4`.
    pub address_version: u64,
    /// Stream the owner participates in.
    pub stream: u64,
    /// Behaviour bitfield advertised by the owner.
    pub behaviour_bitfield: u32,
    /// Uncompressed public signing key, `0x04` prefix in place.
    pub public_signing_key: [u8; 65],
    /// Uncompressed public encryption key, `0x04` prefix in place.
    pub public_encryption_key: [u8; 65],
    /// Difficulty demanded of senders: nonce trials per byte.
    pub nonce_trials_per_byte: u64,
    /// Difficulty demanded of senders: extra bytes.
    pub extra_bytes: u64,
    /// DER signature over the canonical signature payload; empty for
    /// versions 2 and below.
    pub signature: Vec<u8>,
    /// PoW nonce; `Some` once work is done (always set on parsed
    /// network objects).
    pub pow_nonce: Option<u64>,
    /// Unix time at which the object expires.
    pub expiration_time: u64,
    /// Ripe hash recomputed from the two keys.
    pub ripe: [u8; RIPE_LEN],
}

// ---------------------------------------------------------------------------
// Pubkey serialization
// ---------------------------------------------------------------------------

/// Serializes a pubkey object for dissemination.
///
/// The PoW nonce is prefixed iff `pubkey.pow_nonce` is set; the usual
/// flow serializes without it, computes PoW over these bytes, and
/// prepends the nonce with [`prepend_pow_nonce`].
///
/// `owner_address` is the address string the pubkey belongs to; for
/// version 4 it supplies the tag and the envelope encryption key.
pub fn serialize_pubkey(pubkey: &Pubkey, owner_address: &str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if let Some(nonce) = pubkey.pow_nonce {
        out.extend_from_slice(&nonce.to_be_bytes());
    }
    out.extend_from_slice(&pubkey.expiration_time.to_be_bytes());
    out.extend_from_slice(&encode_varint(pubkey.address_version));
    out.extend_from_slice(&encode_varint(pubkey.stream));

    let inner = pubkey_key_block(pubkey);
    if pubkey.address_version >= 4 {
        let tag = address::address_tag(owner_address)?;
        let seed = address::address_decryption_seed(owner_address)?;
        let envelope_key = keys::EcKeyPair::from_secret_bytes(&seed)?;
        out.extend_from_slice(&tag);
        out.extend_from_slice(&envelope::encrypt(&inner, &envelope_key.public_uncompressed())?);
    } else {
        out.extend_from_slice(&inner);
    }
    Ok(out)
}

/// The key block: everything version-specific after tag/envelope
/// framing. Also the tail of the signature payload.
fn pubkey_key_block(pubkey: &Pubkey) -> Vec<u8> {
    let mut block = Vec::new();
    block.extend_from_slice(&pubkey.behaviour_bitfield.to_be_bytes());
    block.extend_from_slice(&pubkey.public_signing_key[1..]);
    block.extend_from_slice(&pubkey.public_encryption_key[1..]);
    if pubkey.address_version >= 3 {
        block.extend_from_slice(&encode_varint(pubkey.nonce_trials_per_byte));
        block.extend_from_slice(&encode_varint(pubkey.extra_bytes));
        block.extend_from_slice(&encode_varint(pubkey.signature.len() as u64));
        block.extend_from_slice(&pubkey.signature);
    }
    block
}

/// The canonical bytes a pubkey signature covers: the outer fields
/// (without nonce) plus the key block through the difficulty fields.
pub fn pubkey_signature_payload(pubkey: &Pubkey) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&pubkey.expiration_time.to_be_bytes());
    payload.extend_from_slice(&encode_varint(pubkey.address_version));
    payload.extend_from_slice(&encode_varint(pubkey.stream));
    payload.extend_from_slice(&pubkey.behaviour_bitfield.to_be_bytes());
    payload.extend_from_slice(&pubkey.public_signing_key[1..]);
    payload.extend_from_slice(&pubkey.public_encryption_key[1..]);
    payload.extend_from_slice(&encode_varint(pubkey.nonce_trials_per_byte));
    payload.extend_from_slice(&encode_varint(pubkey.extra_bytes));
    payload
}

// ---------------------------------------------------------------------------
// Pubkey parsing
// ---------------------------------------------------------------------------

/// Parses a pubkey object received from the network.
///
/// Network objects always carry the PoW nonce. `owner_address` must be
/// supplied for version-4 pubkeys so the envelope decryption key can be
/// derived from it.
///
/// # Errors
///
/// - [`CourierError::Malformed`] on truncation or out-of-range fields.
/// - [`CourierError::InvalidParameter`] when a v4 pubkey is parsed
///   without its owner address.
/// - [`CourierError::DecryptFailed`] / [`CourierError::KeyMismatch`]
///   from the v4 envelope.
pub fn parse_pubkey(
    data: &[u8],
    owner_address: Option<&str>,
    strict_eight_byte_time: bool,
) -> Result<Pubkey> {
    let mut reader = Reader::new(data);
    let pow_nonce = u64::from_be_bytes(reader.take_array::<8>("pow nonce")?);
    let expiration_time = reader.read_time(strict_eight_byte_time)?;
    let address_version =
        reader.varint_in_range("address version", MIN_ADDRESS_VERSION, MAX_ADDRESS_VERSION)?;
    let stream = reader.varint_in_range("stream", STREAM_NUMBER, STREAM_NUMBER)?;

    let decrypted;
    let mut inner = if address_version >= 4 {
        let owner = owner_address.ok_or_else(|| CourierError::InvalidParameter {
            reason: "owner address required to decrypt a version-4 pubkey".into(),
        })?;
        reader.take(TAG_LEN, "tag")?;
        let seed = address::address_decryption_seed(owner)?;
        decrypted = envelope::decrypt(reader.rest(), &seed)?;
        Reader::new(&decrypted)
    } else {
        Reader::new(reader.rest())
    };

    let behaviour_bitfield = u32::from_be_bytes(inner.take_array::<4>("behaviour bitfield")?);
    let public_signing_key = reinsert_prefix(inner.take_array::<WIRE_KEY_LEN>("signing key")?);
    let public_encryption_key =
        reinsert_prefix(inner.take_array::<WIRE_KEY_LEN>("encryption key")?);

    let mut nonce_trials_per_byte = DEFAULT_NONCE_TRIALS_PER_BYTE;
    let mut extra_bytes = DEFAULT_EXTRA_BYTES;
    let mut signature = Vec::new();
    if address_version >= 3 {
        nonce_trials_per_byte = inner.varint("nonce trials per byte")?;
        extra_bytes = inner.varint("extra bytes")?;
        let signature_len = inner.varint("signature length")? as usize;
        signature = inner.take(signature_len, "signature")?.to_vec();
    }

    let ripe = ripe_of_keys(&public_signing_key, &public_encryption_key);

    Ok(Pubkey {
        address_version,
        stream,
        behaviour_bitfield,
        public_signing_key,
        public_encryption_key,
        nonce_trials_per_byte,
        extra_bytes,
        signature,
        pow_nonce: Some(pow_nonce),
        expiration_time,
        ripe,
    })
}

/// Validates a pubkey against the address it claims to serve.
///
/// The address string recreated from the pubkey's keys, version, and
/// stream must match, and for versions above 2 the signature must
/// verify over the canonical signature payload.
///
/// # Errors
///
/// Returns [`CourierError::InvalidPubkey`] naming the failed check.
pub fn validate_pubkey(pubkey: &Pubkey, claimed_address: &str) -> Result<()> {
    address::decode_address(claimed_address)?;

    let recreated = address::encode_address(pubkey.address_version, pubkey.stream, &pubkey.ripe)?;
    if recreated != claimed_address {
        return Err(CourierError::InvalidPubkey {
            reason: format!("keys recreate {recreated}, not the claimed address"),
        });
    }

    if pubkey.address_version > 2 {
        let payload = pubkey_signature_payload(pubkey);
        keys::verify_der(&pubkey.public_signing_key, &payload, &pubkey.signature).map_err(
            |e| CourierError::InvalidPubkey {
                reason: format!("signature does not verify: {e}"),
            },
        )?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Msg
// ---------------------------------------------------------------------------

/// The plaintext content of a msg object, recovered after envelope
/// decryption.
///
/// Carries the sender's full key block so the recipient can reply and
/// verify the signature without a pubkey lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsgContent {
    /// Sender's address version.
    pub sender_version: u64,
    /// Sender's stream.
    pub sender_stream: u64,
    /// Sender's behaviour bitfield.
    pub behaviour_bitfield: u32,
    /// Sender's uncompressed public signing key, prefix in place.
    pub sender_signing_key: [u8; 65],
    /// Sender's uncompressed public encryption key, prefix in place.
    pub sender_encryption_key: [u8; 65],
    /// Difficulty the sender demands for replies.
    pub nonce_trials_per_byte: u64,
    /// See [`MsgContent::nonce_trials_per_byte`].
    pub extra_bytes: u64,
    /// Ripe hash of the intended recipient.
    pub destination_ripe: [u8; RIPE_LEN],
    /// Message encoding; this client writes [`MSG_ENCODING_SIMPLE`].
    pub encoding: u64,
    /// Encoded message text.
    pub message: Vec<u8>,
    /// Opaque acknowledgement data the recipient disseminates back.
    pub ack_data: Vec<u8>,
    /// DER signature over the canonical signature payload.
    pub signature: Vec<u8>,
}

/// Serializes a msg object (without PoW nonce), encrypting the content
/// to the recipient's encryption key.
pub fn serialize_msg(
    content: &MsgContent,
    expiration_time: u64,
    stream: u64,
    recipient_encryption_key: &[u8; 65],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&expiration_time.to_be_bytes());
    out.extend_from_slice(&encode_varint(stream));
    out.extend_from_slice(&envelope::encrypt(
        &msg_content_bytes(content, true),
        recipient_encryption_key,
    )?);
    Ok(out)
}

/// Parses a msg object with the recipient's encryption secret.
///
/// Returns the expiration time, the stream, and the decrypted content.
///
/// # Errors
///
/// [`CourierError::DecryptFailed`] when the envelope was not encrypted
/// to this secret — the caller tries its other identities.
pub fn parse_msg(
    data: &[u8],
    recipient_secret: &[u8; 32],
    strict_eight_byte_time: bool,
) -> Result<(u64, u64, MsgContent)> {
    let mut reader = Reader::new(data);
    reader.take_array::<8>("pow nonce")?;
    let expiration_time = reader.read_time(strict_eight_byte_time)?;
    let stream = reader.varint_in_range("stream", STREAM_NUMBER, STREAM_NUMBER)?;

    let plaintext = envelope::decrypt(reader.rest(), recipient_secret)?;
    let content = parse_msg_content(&plaintext)?;
    Ok((expiration_time, stream, content))
}

/// `content ‖ signature` fields as they appear inside the envelope.
/// With `include_signature` false this is the signed portion.
fn msg_content_bytes(content: &MsgContent, include_signature: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&encode_varint(content.sender_version));
    out.extend_from_slice(&encode_varint(content.sender_stream));
    out.extend_from_slice(&content.behaviour_bitfield.to_be_bytes());
    out.extend_from_slice(&content.sender_signing_key[1..]);
    out.extend_from_slice(&content.sender_encryption_key[1..]);
    if content.sender_version >= 3 {
        out.extend_from_slice(&encode_varint(content.nonce_trials_per_byte));
        out.extend_from_slice(&encode_varint(content.extra_bytes));
    }
    out.extend_from_slice(&content.destination_ripe);
    out.extend_from_slice(&encode_varint(content.encoding));
    out.extend_from_slice(&encode_varint(content.message.len() as u64));
    out.extend_from_slice(&content.message);
    out.extend_from_slice(&encode_varint(content.ack_data.len() as u64));
    out.extend_from_slice(&content.ack_data);
    if include_signature {
        out.extend_from_slice(&encode_varint(content.signature.len() as u64));
        out.extend_from_slice(&content.signature);
    }
    out
}

/// The canonical bytes a msg signature covers: the outer fields
/// (without nonce) plus the content through the ack data.
pub fn msg_signature_payload(
    content: &MsgContent,
    expiration_time: u64,
    stream: u64,
) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&expiration_time.to_be_bytes());
    payload.extend_from_slice(&encode_varint(stream));
    payload.extend_from_slice(&msg_content_bytes(content, false));
    payload
}

fn parse_msg_content(data: &[u8]) -> Result<MsgContent> {
    let mut reader = Reader::new(data);
    let sender_version =
        reader.varint_in_range("sender version", MIN_ADDRESS_VERSION, MAX_ADDRESS_VERSION)?;
    let sender_stream = reader.varint_in_range("sender stream", STREAM_NUMBER, STREAM_NUMBER)?;
    let behaviour_bitfield = u32::from_be_bytes(reader.take_array::<4>("behaviour bitfield")?);
    let sender_signing_key = reinsert_prefix(reader.take_array::<WIRE_KEY_LEN>("signing key")?);
    let sender_encryption_key =
        reinsert_prefix(reader.take_array::<WIRE_KEY_LEN>("encryption key")?);

    let mut nonce_trials_per_byte = DEFAULT_NONCE_TRIALS_PER_BYTE;
    let mut extra_bytes = DEFAULT_EXTRA_BYTES;
    if sender_version >= 3 {
        nonce_trials_per_byte = reader.varint("nonce trials per byte")?;
        extra_bytes = reader.varint("extra bytes")?;
    }

    let destination_ripe = reader.take_array::<RIPE_LEN>("destination ripe")?;
    let encoding = reader.varint("encoding")?;
    let message_len = reader.varint("message length")? as usize;
    let message = reader.take(message_len, "message")?.to_vec();
    let ack_len = reader.varint("ack length")? as usize;
    let ack_data = reader.take(ack_len, "ack data")?.to_vec();
    let signature_len = reader.varint("signature length")? as usize;
    let signature = reader.take(signature_len, "signature")?.to_vec();

    Ok(MsgContent {
        sender_version,
        sender_stream,
        behaviour_bitfield,
        sender_signing_key,
        sender_encryption_key,
        nonce_trials_per_byte,
        extra_bytes,
        destination_ripe,
        encoding,
        message,
        ack_data,
        signature,
    })
}

// ---------------------------------------------------------------------------
// Ack objects
// ---------------------------------------------------------------------------

/// Serializes an ack object (without PoW nonce) carrying the opaque
/// ack data from a received msg.
pub fn serialize_ack(expiration_time: u64, stream: u64, ack_data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&expiration_time.to_be_bytes());
    out.extend_from_slice(&encode_varint(stream));
    out.extend_from_slice(ack_data);
    out
}

/// Parses an ack object, returning `(expiration, stream, ack_data)`.
pub fn parse_ack(data: &[u8], strict_eight_byte_time: bool) -> Result<(u64, u64, Vec<u8>)> {
    let mut reader = Reader::new(data);
    reader.take_array::<8>("pow nonce")?;
    let expiration_time = reader.read_time(strict_eight_byte_time)?;
    let stream = reader.varint_in_range("stream", STREAM_NUMBER, STREAM_NUMBER)?;
    Ok((expiration_time, stream, reader.rest().to_vec()))
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Prefixes a computed PoW nonce to an encoded payload.
pub fn prepend_pow_nonce(nonce: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&nonce.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Encodes subject and body with the simple text framing (encoding 2).
pub fn encode_message_text(subject: &str, body: &str) -> Vec<u8> {
    format!("Subject:{subject}\nBody:{body}").into_bytes()
}

/// Splits simple-framed text back into `(subject, body)`.
///
/// Content that does not carry the framing comes back with an empty
/// subject and the raw text as body.
pub fn decode_message_text(message: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(message);
    if let Some(rest) = text.strip_prefix("Subject:") {
        if let Some((subject, body)) = rest.split_once("\nBody:") {
            return (subject.to_string(), body.to_string());
        }
    }
    (String::new(), text.into_owned())
}

fn reinsert_prefix(wire_key: [u8; WIRE_KEY_LEN]) -> [u8; 65] {
    let mut key = [0u8; 65];
    key[0] = 0x04;
    key[1..].copy_from_slice(&wire_key);
    key
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Cursor over an object buffer with bounds-checked reads.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let slice = self
            .data
            .get(self.pos..self.pos + len)
            .ok_or_else(|| CourierError::Malformed {
                reason: format!(
                    "object truncated while reading {field}: need {len} bytes, {} remain",
                    self.data.len().saturating_sub(self.pos)
                ),
            })?;
        self.pos += len;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn varint(&mut self, field: &str) -> Result<u64> {
        let (value, consumed) =
            decode_varint(&self.data[self.pos.min(self.data.len())..]).map_err(|_| {
                CourierError::Malformed {
                    reason: format!("object truncated while reading {field} var-int"),
                }
            })?;
        self.pos += consumed;
        Ok(value)
    }

    fn varint_in_range(&mut self, field: &str, min: u64, max: u64) -> Result<u64> {
        let value = self.varint(field)?;
        if value < min || value > max {
            return Err(CourierError::Malformed {
                reason: format!("{field} value {value} outside valid range {min}..={max}"),
            });
        }
        Ok(value)
    }

    /// Reads the expiration time field, applying the width heuristic:
    /// a zero leading dword means an 8-byte field follows.
    fn read_time(&mut self, strict_eight_byte: bool) -> Result<u64> {
        if strict_eight_byte {
            return Ok(u64::from_be_bytes(self.take_array::<8>("time")?));
        }

        let head = u32::from_be_bytes(self.take_array::<4>("time")?);
        if head == 0 {
            self.pos -= 4;
            Ok(u64::from_be_bytes(self.take_array::<8>("time")?))
        } else {
            tracing::warn!(
                time = head,
                "parsed legacy 4-byte time field; wide times with a zero upper \
                 dword are indistinguishable from it"
            );
            Ok(head as u64)
        }
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
