//! Engine configuration with documented defaults.
//!
//! All operational parameters of the object lifecycle engine are
//! centralized here. Every value has a default matching the deployed
//! network's expectations.

use serde::{Deserialize, Serialize};

use crate::{CourierError, Result};

/// Seconds in one day.
const DAY_SECS: u64 = 86_400;

/// Global engine configuration.
///
/// Constructed once at startup and handed to the engine by value; the
/// engine never reaches for hidden global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether this client computes proof-of-work itself. When false,
    /// payloads are handed to the gateway without a nonce and the
    /// gateway is expected to do the work.
    pub do_pow: bool,

    /// Time-to-live (seconds) for the first attempt to send an object.
    /// A low TTL makes the PoW cheap, which pays off when the recipient
    /// is online and acknowledges immediately.
    pub first_attempt_ttl: u64,

    /// Time-to-live (seconds) for every attempt after the first.
    pub subsequent_attempts_ttl: u64,

    /// Minimum remaining lifetime (seconds) an outbound payload must
    /// have. Below this the payload is discarded and regenerated with a
    /// fresh TTL and new proof of work.
    pub minimum_time_to_live: u64,

    /// Number of times a queued task is attempted before it is
    /// abandoned and its message marked failed.
    pub maximum_attempts: u32,

    /// Seconds between runs of the external store-cleaning collaborator.
    pub time_between_database_cleaning: u64,

    /// Network-standard nonce trials per byte for objects we create.
    pub network_nonce_trials_per_byte: u64,

    /// Network-standard extra bytes for objects we create.
    pub network_extra_bytes: u64,

    /// How far (seconds) behind the network we must be before the
    /// periodic driver polls the gateway for inbound objects.
    pub minimum_time_behind_network: u64,

    /// Timeout (seconds) applied to in-flight gateway calls.
    pub network_timeout_secs: u64,

    /// Seconds after which a local pubkey is re-disseminated so the
    /// network keeps a live copy. Defaults to 28 days.
    pub pubkey_redissemination_period: u64,

    /// When true, object times are always parsed as 8-byte fields and
    /// the legacy 4-byte width is rejected. The legacy heuristic treats
    /// a zero leading dword as "8-byte time follows", which misreads an
    /// 8-byte time whose upper dword is genuinely zero.
    pub strict_eight_byte_time: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            do_pow: true,
            first_attempt_ttl: 3_600,
            subsequent_attempts_ttl: DAY_SECS,
            minimum_time_to_live: 120,
            maximum_attempts: 500,
            time_between_database_cleaning: 3_600,
            network_nonce_trials_per_byte: 1_000,
            network_extra_bytes: 1_000,
            minimum_time_behind_network: 30,
            network_timeout_secs: 30,
            pubkey_redissemination_period: 28 * DAY_SECS,
            strict_eight_byte_time: false,
        }
    }
}

impl EngineConfig {
    /// Validates all configuration values.
    ///
    /// Returns an error if any value is outside its acceptable range.
    pub fn validate(&self) -> Result<()> {
        if self.first_attempt_ttl == 0 {
            return Err(CourierError::ConfigError {
                reason: "first_attempt_ttl must be greater than 0".into(),
            });
        }

        if self.subsequent_attempts_ttl < self.first_attempt_ttl {
            return Err(CourierError::ConfigError {
                reason: "subsequent_attempts_ttl must not be below first_attempt_ttl".into(),
            });
        }

        if self.minimum_time_to_live == 0 {
            return Err(CourierError::ConfigError {
                reason: "minimum_time_to_live must be greater than 0".into(),
            });
        }

        if self.maximum_attempts == 0 {
            return Err(CourierError::ConfigError {
                reason: "maximum_attempts must be greater than 0".into(),
            });
        }

        if self.network_nonce_trials_per_byte == 0 || self.network_extra_bytes == 0 {
            return Err(CourierError::ConfigError {
                reason: "network PoW parameters must be greater than 0".into(),
            });
        }

        if self.pubkey_redissemination_period == 0 {
            return Err(CourierError::ConfigError {
                reason: "pubkey_redissemination_period must be greater than 0".into(),
            });
        }

        Ok(())
    }
}
