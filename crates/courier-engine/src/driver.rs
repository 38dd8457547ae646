//! The periodic driver: one tick of engine work.
//!
//! The external wake-up scheduler calls [`Engine::tick`] whenever the
//! device allows background work. A tick drains every due queue
//! record, pulls inbound objects once the client has fallen far enough
//! behind the network, triggers the store-cleaning collaborator on its
//! cadence, and re-disseminates local pubkeys that are growing stale.
//!
//! Error policy per record: a transient failure bumps the attempt
//! count and pushes the trigger time out by exponential back-off; a
//! record over the attempt cap is deleted (failing its message if it
//! was a send); store failures abort the tick — the scheduler simply
//! invokes the engine again later.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use courier_types::{AddressId, CourierError, MessageId, MessageStatus, ObjectKind, Result, TaskKind};

use crate::queue::{self, ttl_for_generation};
use crate::Engine;

impl Engine {
    /// Runs one tick of background processing.
    ///
    /// # Errors
    ///
    /// [`CourierError::StoreError`] when the store is locked or fails
    /// mid-tick; the tick is abandoned and the scheduler retries.
    pub fn tick(&self) -> Result<()> {
        if !self.store.is_unlocked() {
            return Err(CourierError::StoreError {
                reason: "data-at-rest key unavailable; tick aborted".into(),
            });
        }

        self.drain_due_records()?;
        self.poll_inbound()?;
        self.run_cleaning_if_due()?;
        self.collapse_duplicate_own_pubkeys()?;
        self.check_pubkey_redissemination()?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queue draining
    // -----------------------------------------------------------------------

    /// Processes every due record in trigger-time order, following
    /// freshly created successor records within the same tick. Each
    /// record id is executed at most once per tick, so a record that
    /// stays queued (e.g. network down) cannot spin.
    fn drain_due_records(&self) -> Result<()> {
        let mut executed: HashSet<u64> = HashSet::new();

        loop {
            let mut records = self.store.all_queue_records()?;
            records.sort_by_key(|record| record.trigger_time);
            records.retain(|record| !executed.contains(&record.id.0));
            if records.is_empty() {
                return Ok(());
            }

            for record in records {
                executed.insert(record.id.0);

                // Another record processed earlier this round may have
                // deleted this one (dedup, ack handling).
                let Some(mut record) = self.store.get_queue_record(record.id)? else {
                    continue;
                };

                if record.attempts > self.config.maximum_attempts {
                    self.abandon_record(&record)?;
                    continue;
                }

                if record.task == TaskKind::SendMessage
                    && queue::collapse_and_adjust(&*self.store, &mut record, &self.config)?
                {
                    continue;
                }

                let now = self.now();
                if record.trigger_time > now {
                    continue;
                }

                match self.execute_record(record.clone()) {
                    Ok(()) => {}
                    Err(CourierError::StoreError { reason }) => {
                        return Err(CourierError::StoreError { reason });
                    }
                    Err(error) => self.reschedule_after_failure(record, &error)?,
                }
            }
        }
    }

    /// A record past the attempt cap is deleted; a send flow marks its
    /// message failed.
    fn abandon_record(&self, record: &courier_storage::records::QueueRecord) -> Result<()> {
        tracing::warn!(
            record = %record.id,
            task = %record.task,
            attempts = record.attempts,
            "attempt cap exceeded; abandoning record"
        );
        if record.task.is_send_flow() {
            if let Some(mut message) = self.store.get_message(MessageId(record.object0))? {
                message.status = MessageStatus::Failed;
                self.store.update_message(&message)?;
            }
        }
        self.store.delete_queue_record(record.id)
    }

    /// Bumps the attempt count and pushes the trigger time out by
    /// exponential back-off, capped at the generation's TTL.
    fn reschedule_after_failure(
        &self,
        mut record: courier_storage::records::QueueRecord,
        error: &CourierError,
    ) -> Result<()> {
        record.attempts += 1;
        let cap = ttl_for_generation(record.record_count, &self.config);
        record.trigger_time = self.now() + queue::backoff_secs(record.attempts, cap);
        tracing::warn!(
            record = %record.id,
            task = %record.task,
            attempts = record.attempts,
            trigger_time = record.trigger_time,
            error = %error,
            "task failed; rescheduled"
        );

        // The record may have deleted itself before failing.
        if self.store.get_queue_record(record.id)?.is_some() {
            self.store.update_queue_record(&record)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Inbound polling
    // -----------------------------------------------------------------------

    /// Pulls inbound objects for every identity until caught up, once
    /// the client is further behind the network than the configured
    /// threshold.
    fn poll_inbound(&self) -> Result<()> {
        let now = self.now();
        let last = self.last_inbound_poll.load(Ordering::Relaxed);
        if now.saturating_sub(last) <= self.config.minimum_time_behind_network {
            return Ok(());
        }
        if !self.gateway.is_available() {
            return Ok(());
        }
        let addresses = self.store.all_addresses()?;
        if addresses.is_empty() {
            return Ok(());
        }

        for identity in &addresses {
            loop {
                let batch = match self.gateway.fetch_objects(&identity.address, last) {
                    Ok(batch) => batch,
                    Err(error) => {
                        tracing::warn!(
                            address = %identity.id,
                            error = %error,
                            "inbound fetch failed; will retry next tick"
                        );
                        return Ok(());
                    }
                };
                if batch.is_empty() {
                    break;
                }
                for blob in &batch {
                    self.process_inbound(blob)?;
                }
            }
        }

        self.last_inbound_poll.store(self.now(), Ordering::Relaxed);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Triggers the external cleaning collaborator on its cadence.
    fn run_cleaning_if_due(&self) -> Result<()> {
        let now = self.now();
        let last = self.last_cleaning_run.load(Ordering::Relaxed);
        if last != 0 && now.saturating_sub(last) < self.config.time_between_database_cleaning {
            return Ok(());
        }
        tracing::debug!("running store cleaning");
        self.cleaner.clean()?;
        self.last_cleaning_run.store(now, Ordering::Relaxed);
        Ok(())
    }

    /// Restores the one-pubkey-per-own-address invariant: among
    /// duplicate rows for an address the latest expiration survives;
    /// the others go, along with that address's pubkey payloads and
    /// their dissemination records.
    fn collapse_duplicate_own_pubkeys(&self) -> Result<()> {
        for identity in self.store.all_addresses()? {
            let hits = self.store.search_pubkeys_by_ripe(&identity.ripe)?;
            if hits.len() <= 1 {
                continue;
            }

            let keep = hits
                .iter()
                .map(|hit| hit.pubkey.expiration_time)
                .max()
                .unwrap_or(0);
            let mut kept_one = false;

            for hit in hits {
                if hit.pubkey.expiration_time == keep && !kept_one {
                    kept_one = true;
                    continue;
                }
                tracing::info!(
                    pubkey = %hit.id,
                    address = %identity.id,
                    "deleting duplicate own pubkey"
                );
                self.store.delete_pubkey(hit.id)?;
                self.delete_stale_pubkey_payloads(identity.id, keep)?;
            }
        }
        Ok(())
    }

    /// Deletes pubkey payloads of an address that expire before the
    /// surviving pubkey does, plus any records disseminating them.
    fn delete_stale_pubkey_payloads(&self, address: AddressId, keep_expiration: u64) -> Result<()> {
        let payloads = self.store.search_payloads_by_address(address)?;
        for payload in payloads {
            if payload.kind != ObjectKind::Pubkey || payload.expiration_time >= keep_expiration {
                continue;
            }
            for record in self.store.all_queue_records()? {
                if record.task == TaskKind::DisseminatePubkey && record.object0 == payload.id.0 {
                    self.store.delete_queue_record(record.id)?;
                }
            }
            self.store.delete_payload(payload.id)?;
        }
        Ok(())
    }

    /// Queues a fresh dissemination for local pubkeys the network has
    /// not seen for a whole re-dissemination period.
    fn check_pubkey_redissemination(&self) -> Result<()> {
        let now = self.now();
        let queue_records = self.store.all_queue_records()?;

        for identity in self.store.all_addresses()? {
            if identity.last_pubkey_dissemination_time == 0 {
                // Never disseminated: the identity-creation flow is
                // still responsible for the first push.
                continue;
            }
            let age = now.saturating_sub(identity.last_pubkey_dissemination_time);
            if age < self.config.pubkey_redissemination_period {
                continue;
            }

            let freshest_payload = self
                .store
                .search_payloads_by_address(identity.id)?
                .into_iter()
                .filter(|payload| payload.kind == ObjectKind::Pubkey)
                .max_by_key(|payload| payload.expiration_time);

            match freshest_payload {
                Some(payload) => {
                    let pending = queue_records.iter().any(|record| {
                        record.task == TaskKind::DisseminatePubkey
                            && record.object0 == payload.id.0
                    });
                    if !pending {
                        tracing::info!(
                            address = %identity.id,
                            payload = %payload.id,
                            "pubkey re-dissemination due"
                        );
                        queue::enqueue(
                            &*self.store,
                            TaskKind::DisseminatePubkey,
                            now,
                            1,
                            payload.id.0,
                            0,
                            0,
                        )?;
                    }
                }
                None => {
                    let pending = queue_records.iter().any(|record| {
                        record.task == TaskKind::CreateIdentity
                            && record.object0 == identity.id.0
                    });
                    if !pending {
                        tracing::info!(
                            address = %identity.id,
                            "pubkey payload missing; rebuilding identity object"
                        );
                        queue::enqueue(
                            &*self.store,
                            TaskKind::CreateIdentity,
                            now,
                            1,
                            identity.id.0,
                            0,
                            0,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
