//! The object lifecycle engine.
//!
//! Drives every outbound object through its durable state machine:
//! identity creation and pubkey dissemination, message encryption and
//! proof-of-work, gateway dissemination, acknowledgement handling, and
//! regeneration when an object expires before it could be delivered.
//!
//! The engine is a plain value assembled at startup from explicit
//! handles — store, gateway, clock, cleaner — and owned by the external
//! wake-up scheduler, which calls [`Engine::tick`] on it. There are no
//! process-wide singletons and no hidden globals; everything the engine
//! touches arrives through its constructor.

pub mod clock;
pub mod driver;
pub mod gateway;
pub mod identity;
pub mod incoming;
pub mod orchestrator;
pub mod queue;
pub mod resolver;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use courier_storage::Store;
use courier_types::config::EngineConfig;
use courier_types::Result;

use crate::clock::Clock;
use crate::gateway::Gateway;

// ---------------------------------------------------------------------------
// StoreCleaner
// ---------------------------------------------------------------------------

/// The external collaborator that prunes defunct rows from the store.
///
/// The engine only decides *when* cleaning is due; what gets deleted is
/// the store's business.
pub trait StoreCleaner: Send + Sync {
    /// Runs one cleaning pass.
    fn clean(&self) -> Result<()>;
}

/// A cleaner that does nothing; for deployments where the store prunes
/// itself.
pub struct NoopCleaner;

impl StoreCleaner for NoopCleaner {
    fn clean(&self) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The engine value. One instance per process, owned by the scheduler.
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: Arc<dyn Gateway>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cleaner: Arc<dyn StoreCleaner>,
    pub(crate) config: EngineConfig,
    /// Raised to stop long-running work (the PoW search observes it
    /// between nonce ranges).
    pub(crate) cancel: Arc<AtomicBool>,
    /// Unix time inbound objects were last pulled from the gateway.
    pub(crate) last_inbound_poll: AtomicU64,
    /// Unix time the cleaning collaborator last ran.
    pub(crate) last_cleaning_run: AtomicU64,
}

impl Engine {
    /// Assembles an engine from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`courier_types::CourierError::ConfigError`] when the
    /// configuration fails validation.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
        cleaner: Arc<dyn StoreCleaner>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            gateway,
            clock,
            cleaner,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
            last_inbound_poll: AtomicU64::new(0),
            last_cleaning_run: AtomicU64::new(0),
        })
    }

    /// The flag long-running work polls for cooperative cancellation.
    ///
    /// The scheduler raises it (via [`Engine::request_stop`]) when the
    /// process is asked to shut down.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Asks in-flight work to stop at its next suspension point.
    pub fn request_stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Current engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> u64 {
        self.clock.now()
    }
}
