//! Core shared types for the Courier store-and-forward messaging client.
//!
//! This crate defines the types used across the workspace: entity ids,
//! lifecycle enums, the central [`CourierError`], and the engine
//! configuration. No other crate should define shared types.

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Entity ids
// ---------------------------------------------------------------------------

/// Store-assigned id of a local address (identity).
///
/// All persisted entities are owned by the local store and referenced by
/// integer ids; the engine never holds ownership pointers between them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct AddressId(pub u64);

/// Store-assigned id of a cached or own pubkey.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PubkeyId(pub u64);

/// Store-assigned id of an encoded payload awaiting dissemination.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PayloadId(pub u64);

/// Store-assigned id of a user-visible message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

/// Store-assigned id of a queued work record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct QueueRecordId(pub u64);

macro_rules! impl_id_display {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl From<u64> for $ty {
                fn from(raw: u64) -> Self {
                    Self(raw)
                }
            }
        )*
    };
}

impl_id_display!(AddressId, PubkeyId, PayloadId, MessageId, QueueRecordId);

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// Classifies the kind of network object carried by a payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A request for a peer's pubkey.
    Getpubkey,
    /// A pubkey announcement.
    Pubkey,
    /// An encrypted person-to-person message.
    Msg,
    /// An acknowledgement for a previously sent msg.
    Ack,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Getpubkey => write!(f, "getpubkey"),
            Self::Pubkey => write!(f, "pubkey"),
            Self::Msg => write!(f, "msg"),
            Self::Ack => write!(f, "ack"),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageStatus
// ---------------------------------------------------------------------------

/// User-visible lifecycle state of an outgoing message.
///
/// Mutated only by the orchestrator; mirrors the queue state of the
/// message's send flow.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Composed but not yet submitted for sending.
    Draft,
    /// Submitted; a send record exists but work has not started.
    Queued,
    /// The send flow is actively encrypting, doing PoW, or pushing.
    Sending,
    /// Pushed to the network; awaiting the recipient's acknowledgement.
    WaitingForAck,
    /// Acknowledged by the recipient.
    Delivered,
    /// Abandoned after the attempt cap was exceeded.
    Failed,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Queued => write!(f, "queued"),
            Self::Sending => write!(f, "sending"),
            Self::WaitingForAck => write!(f, "waiting-for-ack"),
            Self::Delivered => write!(f, "delivered"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// The kind of work recorded by a queue record.
///
/// The meaning of a record's object references depends on the task:
///
/// | task | object0 | object1 | object2 |
/// |---|---|---|---|
/// | `CreateIdentity` | address | — | — |
/// | `DisseminatePubkey` | pubkey payload | — | — |
/// | `SendMessage` | message | — | — |
/// | `ProcessOutgoingMessage` | message | pubkey | — |
/// | `DisseminateMessage` | message | msg payload | pubkey |
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    /// Build, sign, and PoW a pubkey object for a local address.
    CreateIdentity,
    /// Push a finished pubkey payload to a gateway.
    DisseminatePubkey,
    /// Resolve the recipient pubkey for an outgoing message.
    SendMessage,
    /// Encrypt and PoW an outgoing message against a known pubkey.
    ProcessOutgoingMessage,
    /// Push a finished msg payload to a gateway.
    DisseminateMessage,
}

impl TaskKind {
    /// Whether this task belongs to the message send flow.
    ///
    /// Send-flow records share dedup and ack-cancellation behaviour:
    /// they reference a message as object0 and are all removed when the
    /// message is acknowledged.
    pub fn is_send_flow(self) -> bool {
        matches!(
            self,
            Self::SendMessage | Self::ProcessOutgoingMessage | Self::DisseminateMessage
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateIdentity => write!(f, "create-identity"),
            Self::DisseminatePubkey => write!(f, "disseminate-pubkey"),
            Self::SendMessage => write!(f, "send-message"),
            Self::ProcessOutgoingMessage => write!(f, "process-outgoing-message"),
            Self::DisseminateMessage => write!(f, "disseminate-message"),
        }
    }
}

// ---------------------------------------------------------------------------
// CourierError
// ---------------------------------------------------------------------------

/// Central error type for the Courier engine.
///
/// All crates in the workspace convert their internal errors into variants
/// of this enum, ensuring a unified error handling surface. Parse and
/// crypto errors are local (the offending object is dropped and logged);
/// network errors reschedule the originating queue record; store errors
/// abort the current tick but never the process.
#[derive(Debug, Error)]
pub enum CourierError {
    /// Wire data failed to parse: truncated buffer, var-int overrun,
    /// or a field outside its validation range.
    #[error("malformed wire data: {reason}")]
    Malformed {
        /// Human-readable description of the parse failure.
        reason: String,
    },

    /// A caller supplied an unusable parameter (e.g. a zero PoW divisor).
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Human-readable description of the rejected parameter.
        reason: String,
    },

    /// An address string is malformed, has a bad checksum, or carries an
    /// unknown version or stream.
    #[error("invalid address: {reason}")]
    InvalidAddress {
        /// Human-readable description of why the address is invalid.
        reason: String,
    },

    /// A pubkey failed validation against the address it claims to serve.
    #[error("invalid pubkey: {reason}")]
    InvalidPubkey {
        /// Human-readable description of the validation failure.
        reason: String,
    },

    /// Envelope decryption failed: the MAC did not verify.
    #[error("decryption failed: {reason}")]
    DecryptFailed {
        /// Human-readable description of the decryption failure.
        reason: String,
    },

    /// The ephemeral key embedded in an envelope does not reconstruct
    /// on the configured curve.
    #[error("key mismatch: {reason}")]
    KeyMismatch {
        /// Human-readable description of the key reconstruction failure.
        reason: String,
    },

    /// A cryptographic primitive failed (signing, key derivation).
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// A gateway call failed or timed out.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable description of the network failure.
        reason: String,
    },

    /// A requested entity does not exist locally or on the gateway.
    #[error("not found: {reason}")]
    NotFound {
        /// Human-readable description of what was missing.
        reason: String,
    },

    /// A long-running operation observed the cancel flag and stopped.
    #[error("cancelled: {reason}")]
    Cancelled {
        /// Human-readable description of where cancellation was observed.
        reason: String,
    },

    /// The local store rejected or failed an operation.
    #[error("store error: {reason}")]
    StoreError {
        /// Human-readable description of the store failure.
        reason: String,
    },

    /// Proof-of-work verification rejected a payload.
    #[error("proof of work insufficient: {reason}")]
    PowInsufficient {
        /// Human-readable description including the offending values.
        reason: String,
    },

    /// A send flow exhausted its permitted attempts.
    #[error("maximum attempts exceeded: {reason}")]
    MaxAttemptsExceeded {
        /// Human-readable description including the attempt count.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },
}

/// Convenience result type using [`CourierError`].
pub type Result<T> = std::result::Result<T, CourierError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_is_raw_integer() {
        assert_eq!(AddressId(7).to_string(), "7");
        assert_eq!(QueueRecordId(42).to_string(), "42");
    }

    #[test]
    fn id_serde_json_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let id = MessageId(123);
        let json = serde_json::to_string(&id)?;
        let parsed: MessageId = serde_json::from_str(&json)?;
        assert_eq!(id, parsed);
        Ok(())
    }

    #[test]
    fn object_kind_display() {
        assert_eq!(ObjectKind::Pubkey.to_string(), "pubkey");
        assert_eq!(ObjectKind::Msg.to_string(), "msg");
        assert_eq!(ObjectKind::Ack.to_string(), "ack");
        assert_eq!(ObjectKind::Getpubkey.to_string(), "getpubkey");
    }

    #[test]
    fn message_status_display() {
        assert_eq!(MessageStatus::WaitingForAck.to_string(), "waiting-for-ack");
        assert_eq!(MessageStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn send_flow_tasks() {
        assert!(TaskKind::SendMessage.is_send_flow());
        assert!(TaskKind::ProcessOutgoingMessage.is_send_flow());
        assert!(TaskKind::DisseminateMessage.is_send_flow());
        assert!(!TaskKind::CreateIdentity.is_send_flow());
        assert!(!TaskKind::DisseminatePubkey.is_send_flow());
    }

    #[test]
    fn task_kind_display() {
        assert_eq!(TaskKind::SendMessage.to_string(), "send-message");
        assert_eq!(
            TaskKind::ProcessOutgoingMessage.to_string(),
            "process-outgoing-message"
        );
    }

    #[test]
    fn error_display_contains_reason() {
        let err = CourierError::Malformed {
            reason: "var-int overruns buffer".into(),
        };
        assert!(err.to_string().contains("var-int overruns buffer"));
    }
}
