//! Queue record creation, deduplication, and back-off.
//!
//! The queue table is the engine's durable to-do list. Records are
//! processed in trigger-time order; for a given `(task, object0)` pair
//! at most two live records may exist — one per attempt generation —
//! and the deduplication pass here restores that invariant whenever
//! stray duplicates appear.

use courier_storage::records::QueueRecord;
use courier_storage::Store;
use courier_types::config::EngineConfig;
use courier_types::{QueueRecordId, Result, TaskKind};

/// Creates and persists a queue record, returning its assigned id.
pub fn enqueue(
    store: &dyn Store,
    task: TaskKind,
    trigger_time: u64,
    record_count: u32,
    object0: u64,
    object1: u64,
    object2: u64,
) -> Result<QueueRecordId> {
    let id = store.put_queue_record(QueueRecord {
        id: QueueRecordId(0),
        task,
        trigger_time,
        attempts: 0,
        record_count,
        object0,
        object1,
        object2,
    })?;
    tracing::debug!(
        record = %id,
        task = %task,
        trigger_time,
        record_count,
        "queue record created"
    );
    Ok(id)
}

/// The TTL an attempt generation uses: cheap work for the first try,
/// a full day for every retry.
pub fn ttl_for_generation(record_count: u32, config: &EngineConfig) -> u64 {
    if record_count == 0 {
        config.first_attempt_ttl
    } else {
        config.subsequent_attempts_ttl
    }
}

/// Exponential back-off applied after a failed attempt:
/// `min(2^attempts minutes, cap)`.
///
/// The shift is clamped so extreme attempt counts cannot overflow.
pub fn backoff_secs(attempts: u32, cap_secs: u64) -> u64 {
    let minutes = 1u64.checked_shl(attempts.min(30)).unwrap_or(u64::MAX);
    minutes.saturating_mul(60).min(cap_secs)
}

/// Returns other live records with the same task and object0.
pub fn matching_records(store: &dyn Store, record: &QueueRecord) -> Result<Vec<QueueRecord>> {
    Ok(store
        .all_queue_records()?
        .into_iter()
        .filter(|other| {
            other.id != record.id && other.task == record.task && other.object0 == record.object0
        })
        .collect())
}

/// Restores queue uniqueness around `record` and defers it when a
/// sibling should run first.
///
/// Among the sibling records for the same `(task, object0)` only the
/// one with the earliest trigger time survives; the rest are deleted.
/// If that survivor fires earlier than `record`, `record`'s trigger
/// time is pushed past it by the TTL of the survivor's generation and
/// the caller skips `record` this tick.
///
/// Returns `true` when `record` was deferred.
pub fn collapse_and_adjust(
    store: &dyn Store,
    record: &mut QueueRecord,
    config: &EngineConfig,
) -> Result<bool> {
    let mut siblings = matching_records(store, record)?;

    if siblings.len() > 1 {
        siblings.sort_by_key(|sibling| sibling.trigger_time);
        for extra in siblings.split_off(1) {
            tracing::info!(
                record = %extra.id,
                task = %extra.task,
                "deleting duplicate queue record"
            );
            store.delete_queue_record(extra.id)?;
        }
    }

    for sibling in &siblings {
        if sibling.trigger_time < record.trigger_time {
            record.trigger_time =
                sibling.trigger_time + ttl_for_generation(sibling.record_count, config);
            store.update_queue_record(record)?;
            tracing::info!(
                record = %record.id,
                task = %record.task,
                trigger_time = record.trigger_time,
                "deferred behind an earlier record for the same object"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
