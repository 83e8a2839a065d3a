//! Crash recovery
//!
//! Runs once at process start, before the scheduler: retire queue items
//! whose run record is gone or terminal, take over leases left by a
//! previous owner, then reconcile run records with the queue. Recovery
//! never resumes mid-node — an interrupted run is requeued and restarts
//! from its resolved entry node. Per-item errors are logged and skipped;
//! recovery never aborts startup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use tabflow_core::{QueueItemStatus, RunEventKind, RunStatus};
use tabflow_storage::{RecoveredLease, Storage, StoreError};

use crate::bus::EventBus;

/// What recovery did
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Queue items retired because their record was missing or terminal
    pub precleaned: Vec<Uuid>,

    /// Leases taken over from previous owners
    pub recovered: Vec<RecoveredLease>,

    /// Run records whose status was synced to the queue
    pub reconciled: usize,
}

/// Recover queue and run state after a restart
#[instrument(skip(storage, bus), fields(owner_id = %owner_id))]
pub async fn recover(
    storage: &Arc<dyn Storage>,
    bus: &EventBus,
    owner_id: &str,
    lease_ttl: Duration,
) -> RecoveryReport {
    let mut report = RecoveryReport::default();
    let now = Utc::now();

    // Phase 1: pre-clean stale queue items
    match storage.list_items(None).await {
        Ok(items) => {
            for item in items {
                let retire = match storage.get_run(item.id).await {
                    Ok(None) => true,
                    Ok(Some(record)) => record.is_terminal(),
                    Err(e) => {
                        warn!(run_id = %item.id, "pre-clean read failed: {e}");
                        false
                    }
                };
                if retire {
                    match storage.mark_done(item.id).await {
                        Ok(_) => report.precleaned.push(item.id),
                        Err(e) => warn!(run_id = %item.id, "pre-clean retire failed: {e}"),
                    }
                }
            }
        }
        Err(e) => warn!("pre-clean listing failed: {e}"),
    }

    // Phase 2: take over foreign leases
    match storage.recover_orphan_leases(owner_id, now, lease_ttl).await {
        Ok(recovered) => {
            for lease in &recovered {
                let event = RunEventKind::RunRecovered {
                    from_status: lease.from_status.to_string(),
                    to_status: lease.to_status.to_string(),
                    prev_owner_id: lease.prev_owner_id.clone(),
                };
                if let Err(e) = bus.publish(lease.run_id, event).await {
                    warn!(run_id = %lease.run_id, "run.recovered append failed: {e}");
                }
            }
            report.recovered = recovered;
        }
        Err(e) => warn!("orphan lease recovery failed: {e}"),
    }

    // Phase 3: sync run records to the queue's view
    for lease in &report.recovered {
        let status = match lease.to_status {
            QueueItemStatus::Queued => RunStatus::Queued,
            QueueItemStatus::Paused => RunStatus::Paused,
            QueueItemStatus::Running => RunStatus::Running,
        };
        match storage.set_run_status(lease.run_id, status).await {
            Ok(_) => report.reconciled += 1,
            Err(StoreError::RunTerminal(_)) => {
                // The record finished while recovery ran; retire the item
                if let Err(e) = storage.mark_done(lease.run_id).await {
                    warn!(run_id = %lease.run_id, "terminal reconcile retire failed: {e}");
                }
            }
            Err(e) => warn!(run_id = %lease.run_id, "status reconcile failed: {e}"),
        }
    }

    info!(
        precleaned = report.precleaned.len(),
        recovered = report.recovered.len(),
        reconciled = report.reconciled,
        "recovery complete"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tabflow_core::{QueueItem, RunRecord};
    use tabflow_storage::MemoryStorage;

    const TTL: Duration = Duration::from_secs(60);

    async fn setup() -> (Arc<dyn Storage>, Arc<EventBus>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let bus = EventBus::new(Arc::clone(&storage));
        (storage, bus)
    }

    async fn seed(storage: &Arc<dyn Storage>, status: RunStatus) -> Uuid {
        let run_id = Uuid::now_v7();
        let flow_id = Uuid::now_v7();
        let mut record = RunRecord::queued(run_id, flow_id, Utc::now());
        record.status = status;
        storage.save_run(record).await.unwrap();
        storage
            .enqueue(QueueItem::queued(run_id, flow_id, 0, Utc::now()))
            .await
            .unwrap();
        run_id
    }

    #[tokio::test]
    async fn running_run_is_requeued_under_new_owner() {
        let (storage, bus) = setup().await;
        let run_id = seed(&storage, RunStatus::Running).await;
        storage
            .mark_running(run_id, "sw-old", Utc::now(), TTL)
            .await
            .unwrap();

        let report = recover(&storage, &bus, "sw-new", TTL).await;

        assert_eq!(report.recovered.len(), 1);
        assert_eq!(report.recovered[0].prev_owner_id, "sw-old");

        let item = storage.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Queued);
        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Queued);

        let events = storage.list_events(run_id, 0, None).await.unwrap();
        assert!(matches!(
            &events[0].kind,
            RunEventKind::RunRecovered { from_status, to_status, prev_owner_id }
                if from_status == "running" && to_status == "queued" && prev_owner_id == "sw-old"
        ));
    }

    #[tokio::test]
    async fn paused_run_keeps_paused_under_adopted_lease() {
        let (storage, bus) = setup().await;
        let run_id = seed(&storage, RunStatus::Paused).await;
        storage
            .mark_paused(run_id, "sw-old", Utc::now(), TTL)
            .await
            .unwrap();

        recover(&storage, &bus, "sw-new", TTL).await;

        let item = storage.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Paused);
        assert_eq!(item.lease.as_ref().unwrap().owner_id, "sw-new");
        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Paused);
    }

    #[tokio::test]
    async fn terminal_and_orphan_items_are_precleaned() {
        let (storage, bus) = setup().await;

        // Item with a terminal record
        let done = seed(&storage, RunStatus::Succeeded).await;
        // Item with no record at all
        let ghost = Uuid::now_v7();
        storage
            .enqueue(QueueItem::queued(ghost, Uuid::now_v7(), 0, Utc::now()))
            .await
            .unwrap();

        let report = recover(&storage, &bus, "sw-new", TTL).await;

        assert!(report.precleaned.contains(&done));
        assert!(report.precleaned.contains(&ghost));
        assert!(storage.get_item(done).await.unwrap().is_none());
        assert!(storage.get_item(ghost).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recovery_after_mark_done_is_a_noop() {
        let (storage, bus) = setup().await;
        let run_id = seed(&storage, RunStatus::Running).await;
        storage
            .mark_running(run_id, "sw-old", Utc::now(), TTL)
            .await
            .unwrap();

        // Simulate: run completed and was retired before the crash
        storage
            .set_run_status(run_id, RunStatus::Succeeded)
            .await
            .unwrap();
        storage.mark_done(run_id).await.unwrap();
        let before = storage.get_run(run_id).await.unwrap().unwrap();

        let report = recover(&storage, &bus, "sw-next", TTL).await;

        assert!(report.recovered.is_empty());
        assert!(storage.get_item(run_id).await.unwrap().is_none());
        let after = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn own_leases_are_untouched() {
        let (storage, bus) = setup().await;
        let run_id = seed(&storage, RunStatus::Running).await;
        storage
            .mark_running(run_id, "sw-same", Utc::now(), TTL)
            .await
            .unwrap();

        let report = recover(&storage, &bus, "sw-same", TTL).await;
        assert!(report.recovered.is_empty());

        let item = storage.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Running);
    }
}
