//! Store trait definitions
//!
//! One trait per collection; [`Storage`] bundles them for the engine.
//! Implementations must be thread-safe, and every method must be atomic:
//! it either applies all of its writes or none of them. That transactional
//! wrapper is the engine's integrity boundary.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use tabflow_core::{
    Flow, PersistentVar, QueueItem, QueueItemStatus, RunEvent, RunEventKind, RunRecord,
    RunStatus, TriggerSpec,
};

use crate::error::StoreError;

/// Filter for listing runs
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub status: Option<RunStatus>,
    pub flow_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// A lease recovered from a previous owner
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredLease {
    pub run_id: Uuid,
    pub from_status: QueueItemStatus,
    pub to_status: QueueItemStatus,
    pub prev_owner_id: String,
}

/// Flow collection, keyed by flow id
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Get a flow; rejects records with a mismatched schema version
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, StoreError>;

    async fn list_flows(&self) -> Result<Vec<Flow>, StoreError>;

    /// Upsert; the caller owns normalization and timestamps
    async fn save_flow(&self, flow: Flow) -> Result<(), StoreError>;

    async fn delete_flow(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Run records, keyed by run id
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError>;

    /// Most recently updated first
    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError>;

    /// Upsert. Refuses to modify a terminal record.
    async fn save_run(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Narrow status transition; refuses on terminal records
    async fn set_run_status(&self, id: Uuid, status: RunStatus) -> Result<RunRecord, StoreError>;

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Append-only event log keyed by `(run_id, seq)`
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event, assigning the next sequence number from the run
    /// record and incrementing it, all in one transaction. Refuses when
    /// the run is missing or terminal.
    async fn append_event(
        &self,
        run_id: Uuid,
        kind: RunEventKind,
    ) -> Result<RunEvent, StoreError>;

    /// Events for a run in sequence order, starting at `from_seq`
    async fn list_events(
        &self,
        run_id: Uuid,
        from_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<RunEvent>, StoreError>;
}

/// Durable run queue with leases
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a fresh queued item; conflicts if the run is already queued
    async fn enqueue(&self, item: QueueItem) -> Result<(), StoreError>;

    async fn get_item(&self, run_id: Uuid) -> Result<Option<QueueItem>, StoreError>;

    /// Items in claim order (priority descending, created-at ascending)
    async fn list_items(
        &self,
        status: Option<QueueItemStatus>,
    ) -> Result<Vec<QueueItem>, StoreError>;

    /// 1-based position among queued items, or None once claimed/absent
    async fn queued_position(&self, run_id: Uuid) -> Result<Option<usize>, StoreError>;

    /// Atomically claim the first queued item: transition to `running`
    /// and stamp a lease for the owner
    async fn claim_next(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Option<QueueItem>, StoreError>;

    /// Advance lease expiry for everything this owner holds; returns the
    /// number of leases renewed
    async fn heartbeat(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<usize, StoreError>;

    async fn mark_running(
        &self,
        run_id: Uuid,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn mark_paused(
        &self,
        run_id: Uuid,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove the item; true if it existed
    async fn mark_done(&self, run_id: Uuid) -> Result<bool, StoreError>;

    /// Remove the item only while it is still queued
    async fn cancel(&self, run_id: Uuid) -> Result<bool, StoreError>;

    /// Put a claimed item back to `queued`, dropping its lease
    async fn requeue(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Requeue every item whose lease has expired; returns their run ids
    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Take over items leased by other owners: running items go back to
    /// `queued`, paused items keep `paused` under a fresh lease
    async fn recover_orphan_leases(
        &self,
        new_owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: Duration,
    ) -> Result<Vec<RecoveredLease>, StoreError>;
}

/// Process-wide persistent variables, keyed by name
#[async_trait]
pub trait VarStore: Send + Sync {
    async fn get_var(&self, name: &str) -> Result<Option<PersistentVar>, StoreError>;

    async fn list_vars(&self) -> Result<Vec<PersistentVar>, StoreError>;

    async fn set_var(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<PersistentVar, StoreError>;

    async fn delete_var(&self, name: &str) -> Result<bool, StoreError>;
}

/// Trigger specs, keyed by trigger id
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn get_trigger(&self, id: Uuid) -> Result<Option<TriggerSpec>, StoreError>;

    async fn list_triggers(&self) -> Result<Vec<TriggerSpec>, StoreError>;

    async fn save_trigger(&self, spec: TriggerSpec) -> Result<(), StoreError>;

    async fn delete_trigger(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Everything the engine needs from a backend
pub trait Storage:
    FlowStore + RunStore + EventStore + QueueStore + VarStore + TriggerStore + 'static
{
}

impl<T> Storage for T where
    T: FlowStore + RunStore + EventStore + QueueStore + VarStore + TriggerStore + 'static
{
}
