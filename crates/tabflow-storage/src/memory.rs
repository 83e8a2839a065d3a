//! In-memory implementation of the store traits
//!
//! The reference backend. All collections live behind one mutex, so every
//! trait method is a single scoped transaction: it observes and mutates a
//! consistent snapshot or fails without side effects. Tests simulate a
//! process restart by handing the same `Arc<MemoryStorage>` to a fresh
//! engine.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use tabflow_core::{
    Flow, Lease, PersistentVar, QueueItem, QueueItemStatus, RunEvent, RunEventKind, RunRecord,
    RunStatus, TriggerSpec, FLOW_SCHEMA_VERSION,
};

use crate::error::StoreError;
use crate::store::*;

#[derive(Default)]
struct State {
    flows: HashMap<Uuid, Flow>,
    runs: HashMap<Uuid, RunRecord>,
    events: BTreeMap<(Uuid, u64), RunEvent>,
    queue: HashMap<Uuid, QueueItem>,
    vars: HashMap<String, PersistentVar>,
    triggers: HashMap<Uuid, TriggerSpec>,
}

/// In-memory store; cheap to create, safe to share via `Arc`
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<State>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events stored for a run (test helper)
    pub fn event_count(&self, run_id: Uuid) -> usize {
        let state = self.state.lock();
        state
            .events
            .range((run_id, 0)..=(run_id, u64::MAX))
            .count()
    }

    /// Clear all collections (test helper)
    pub fn clear(&self) {
        let mut state = self.state.lock();
        *state = State::default();
    }
}

fn sorted_queue(items: impl Iterator<Item = QueueItem>) -> Vec<QueueItem> {
    let mut items: Vec<_> = items.collect();
    items.sort_by(QueueItem::claim_order);
    items
}

#[async_trait]
impl FlowStore for MemoryStorage {
    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, StoreError> {
        let state = self.state.lock();
        match state.flows.get(&id) {
            Some(flow) if flow.schema_version != FLOW_SCHEMA_VERSION => {
                Err(StoreError::SchemaVersion {
                    expected: FLOW_SCHEMA_VERSION,
                    actual: flow.schema_version,
                })
            }
            other => Ok(other.cloned()),
        }
    }

    async fn list_flows(&self) -> Result<Vec<Flow>, StoreError> {
        let state = self.state.lock();
        let mut flows: Vec<_> = state
            .flows
            .values()
            .filter(|f| {
                if f.schema_version != FLOW_SCHEMA_VERSION {
                    warn!(flow_id = %f.id, version = f.schema_version, "skipping flow with mismatched schema version");
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        flows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(flows)
    }

    async fn save_flow(&self, flow: Flow) -> Result<(), StoreError> {
        if flow.schema_version != FLOW_SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                expected: FLOW_SCHEMA_VERSION,
                actual: flow.schema_version,
            });
        }
        let mut state = self.state.lock();
        state.flows.insert(flow.id, flow);
        Ok(())
    }

    async fn delete_flow(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        Ok(state.flows.remove(&id).is_some())
    }
}

#[async_trait]
impl RunStore for MemoryStorage {
    async fn get_run(&self, id: Uuid) -> Result<Option<RunRecord>, StoreError> {
        let state = self.state.lock();
        Ok(state.runs.get(&id).cloned())
    }

    async fn list_runs(&self, filter: RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let state = self.state.lock();
        let mut runs: Vec<_> = state
            .runs
            .values()
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .filter(|r| filter.flow_id.map_or(true, |f| r.flow_id == f))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            runs.truncate(limit);
        }
        Ok(runs)
    }

    async fn save_run(&self, record: RunRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(existing) = state.runs.get(&record.id) {
            if existing.is_terminal() && *existing != record {
                return Err(StoreError::RunTerminal(record.id));
            }
        }
        state.runs.insert(record.id, record);
        Ok(())
    }

    async fn set_run_status(&self, id: Uuid, status: RunStatus) -> Result<RunRecord, StoreError> {
        let mut state = self.state.lock();
        let record = state.runs.get_mut(&id).ok_or(StoreError::RunNotFound(id))?;
        if record.is_terminal() {
            if record.status == status {
                return Ok(record.clone());
            }
            return Err(StoreError::RunTerminal(id));
        }
        record.status = status;
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn delete_run(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        let removed = state.runs.remove(&id).is_some();
        if removed {
            let keys: Vec<_> = state
                .events
                .range((id, 0)..=(id, u64::MAX))
                .map(|(k, _)| *k)
                .collect();
            for key in keys {
                state.events.remove(&key);
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl EventStore for MemoryStorage {
    async fn append_event(
        &self,
        run_id: Uuid,
        kind: RunEventKind,
    ) -> Result<RunEvent, StoreError> {
        let mut state = self.state.lock();
        let record = state
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if record.is_terminal() {
            return Err(StoreError::RunTerminal(run_id));
        }

        let now = Utc::now();
        let seq = record.next_seq;
        record.next_seq += 1;
        record.updated_at = now;

        let event = RunEvent {
            run_id,
            seq,
            at: now,
            kind,
        };
        state.events.insert((run_id, seq), event.clone());
        Ok(event)
    }

    async fn list_events(
        &self,
        run_id: Uuid,
        from_seq: u64,
        limit: Option<usize>,
    ) -> Result<Vec<RunEvent>, StoreError> {
        let state = self.state.lock();
        let iter = state
            .events
            .range((run_id, from_seq)..=(run_id, u64::MAX))
            .map(|(_, e)| e.clone());
        Ok(match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        })
    }
}

#[async_trait]
impl QueueStore for MemoryStorage {
    async fn enqueue(&self, item: QueueItem) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.queue.contains_key(&item.id) {
            return Err(StoreError::Conflict(format!(
                "run {} is already queued",
                item.id
            )));
        }
        state.queue.insert(item.id, item);
        Ok(())
    }

    async fn get_item(&self, run_id: Uuid) -> Result<Option<QueueItem>, StoreError> {
        let state = self.state.lock();
        Ok(state.queue.get(&run_id).cloned())
    }

    async fn list_items(
        &self,
        status: Option<QueueItemStatus>,
    ) -> Result<Vec<QueueItem>, StoreError> {
        let state = self.state.lock();
        Ok(sorted_queue(
            state
                .queue
                .values()
                .filter(|i| status.map_or(true, |s| i.status == s))
                .cloned(),
        ))
    }

    async fn queued_position(&self, run_id: Uuid) -> Result<Option<usize>, StoreError> {
        let state = self.state.lock();
        let queued = sorted_queue(
            state
                .queue
                .values()
                .filter(|i| i.status == QueueItemStatus::Queued)
                .cloned(),
        );
        Ok(queued.iter().position(|i| i.id == run_id).map(|p| p + 1))
    }

    async fn claim_next(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> Result<Option<QueueItem>, StoreError> {
        let mut state = self.state.lock();
        let next = sorted_queue(
            state
                .queue
                .values()
                .filter(|i| i.status == QueueItemStatus::Queued)
                .cloned(),
        )
        .into_iter()
        .next();

        let Some(next) = next else {
            return Ok(None);
        };
        let item = state
            .queue
            .get_mut(&next.id)
            .ok_or(StoreError::QueueItemNotFound(next.id))?;
        item.status = QueueItemStatus::Running;
        item.lease = Some(Lease {
            owner_id: owner_id.to_string(),
            expires_at: now + lease_ttl,
        });
        Ok(Some(item.clone()))
    }

    async fn heartbeat(
        &self,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock();
        let mut renewed = 0;
        for item in state.queue.values_mut() {
            if let Some(lease) = &mut item.lease {
                if lease.owner_id == owner_id {
                    lease.expires_at = now + lease_ttl;
                    renewed += 1;
                }
            }
        }
        Ok(renewed)
    }

    async fn mark_running(
        &self,
        run_id: Uuid,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let item = state
            .queue
            .get_mut(&run_id)
            .ok_or(StoreError::QueueItemNotFound(run_id))?;
        item.status = QueueItemStatus::Running;
        item.lease = Some(Lease {
            owner_id: owner_id.to_string(),
            expires_at: now + lease_ttl,
        });
        Ok(())
    }

    async fn mark_paused(
        &self,
        run_id: Uuid,
        owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let item = state
            .queue
            .get_mut(&run_id)
            .ok_or(StoreError::QueueItemNotFound(run_id))?;
        item.status = QueueItemStatus::Paused;
        item.lease = Some(Lease {
            owner_id: owner_id.to_string(),
            expires_at: now + lease_ttl,
        });
        Ok(())
    }

    async fn mark_done(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        Ok(state.queue.remove(&run_id).is_some())
    }

    async fn cancel(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        match state.queue.get(&run_id) {
            Some(item) if item.status == QueueItemStatus::Queued => {
                state.queue.remove(&run_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn requeue(&self, run_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let item = state
            .queue
            .get_mut(&run_id)
            .ok_or(StoreError::QueueItemNotFound(run_id))?;
        item.status = QueueItemStatus::Queued;
        item.lease = None;
        Ok(())
    }

    async fn reclaim_expired_leases(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.lock();
        let mut reclaimed = vec![];
        for item in state.queue.values_mut() {
            let expired = item
                .lease
                .as_ref()
                .map(|l| l.is_expired(now))
                .unwrap_or(false);
            if expired {
                item.status = QueueItemStatus::Queued;
                item.lease = None;
                reclaimed.push(item.id);
            }
        }
        Ok(reclaimed)
    }

    async fn recover_orphan_leases(
        &self,
        new_owner_id: &str,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> Result<Vec<RecoveredLease>, StoreError> {
        let mut state = self.state.lock();
        let mut recovered = vec![];
        for item in state.queue.values_mut() {
            if item.status == QueueItemStatus::Queued {
                continue;
            }
            let prev_owner = match &item.lease {
                Some(lease) if lease.owner_id != new_owner_id => lease.owner_id.clone(),
                // A claimed item without a lease violates the queue
                // invariant; adopt it as if the owner were unknown.
                None => String::new(),
                _ => continue,
            };
            let from_status = item.status;
            match item.status {
                QueueItemStatus::Running => {
                    item.status = QueueItemStatus::Queued;
                    item.lease = None;
                }
                QueueItemStatus::Paused => {
                    item.lease = Some(Lease {
                        owner_id: new_owner_id.to_string(),
                        expires_at: now + lease_ttl,
                    });
                }
                QueueItemStatus::Queued => unreachable!(),
            }
            recovered.push(RecoveredLease {
                run_id: item.id,
                from_status,
                to_status: item.status,
                prev_owner_id: prev_owner,
            });
        }
        Ok(recovered)
    }
}

#[async_trait]
impl VarStore for MemoryStorage {
    async fn get_var(&self, name: &str) -> Result<Option<PersistentVar>, StoreError> {
        let state = self.state.lock();
        Ok(state.vars.get(name).cloned())
    }

    async fn list_vars(&self) -> Result<Vec<PersistentVar>, StoreError> {
        let state = self.state.lock();
        let mut vars: Vec<_> = state.vars.values().cloned().collect();
        vars.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(vars)
    }

    async fn set_var(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<PersistentVar, StoreError> {
        let mut state = self.state.lock();
        let var = PersistentVar {
            name: name.to_string(),
            value,
            updated_at: Utc::now(),
        };
        state.vars.insert(name.to_string(), var.clone());
        Ok(var)
    }

    async fn delete_var(&self, name: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        Ok(state.vars.remove(name).is_some())
    }
}

#[async_trait]
impl TriggerStore for MemoryStorage {
    async fn get_trigger(&self, id: Uuid) -> Result<Option<TriggerSpec>, StoreError> {
        let state = self.state.lock();
        Ok(state.triggers.get(&id).cloned())
    }

    async fn list_triggers(&self) -> Result<Vec<TriggerSpec>, StoreError> {
        let state = self.state.lock();
        let mut triggers: Vec<_> = state.triggers.values().cloned().collect();
        triggers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(triggers)
    }

    async fn save_trigger(&self, spec: TriggerSpec) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.triggers.insert(spec.id, spec);
        Ok(())
    }

    async fn delete_trigger(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        Ok(state.triggers.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tabflow_core::JsonMap;

    fn storage() -> MemoryStorage {
        MemoryStorage::new()
    }

    async fn seed_run(storage: &MemoryStorage) -> Uuid {
        let run_id = Uuid::now_v7();
        let record = RunRecord::queued(run_id, Uuid::now_v7(), Utc::now());
        storage.save_run(record).await.unwrap();
        run_id
    }

    #[tokio::test]
    async fn append_assigns_dense_sequence() {
        let storage = storage();
        let run_id = seed_run(&storage).await;

        for expected in 0..5u64 {
            let event = storage
                .append_event(
                    run_id,
                    RunEventKind::Log {
                        level: tabflow_core::LogLevel::Info,
                        message: format!("event {expected}"),
                        data: None,
                    },
                )
                .await
                .unwrap();
            assert_eq!(event.seq, expected);
        }

        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(record.next_seq, 5);

        let events = storage.list_events(run_id, 0, None).await.unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn append_refuses_terminal_runs() {
        let storage = storage();
        let run_id = seed_run(&storage).await;
        storage
            .set_run_status(run_id, RunStatus::Canceled)
            .await
            .unwrap();

        let result = storage
            .append_event(
                run_id,
                RunEventKind::Log {
                    level: tabflow_core::LogLevel::Info,
                    message: "late".to_string(),
                    data: None,
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::RunTerminal(_))));
    }

    #[tokio::test]
    async fn terminal_status_never_changes() {
        let storage = storage();
        let run_id = seed_run(&storage).await;
        storage
            .set_run_status(run_id, RunStatus::Succeeded)
            .await
            .unwrap();

        // Same status is a no-op, a different one is refused
        storage
            .set_run_status(run_id, RunStatus::Succeeded)
            .await
            .unwrap();
        let result = storage.set_run_status(run_id, RunStatus::Failed).await;
        assert!(matches!(result, Err(StoreError::RunTerminal(_))));
    }

    #[tokio::test]
    async fn list_events_pages_from_seq() {
        let storage = storage();
        let run_id = seed_run(&storage).await;
        for i in 0..10u64 {
            storage
                .append_event(
                    run_id,
                    RunEventKind::Log {
                        level: tabflow_core::LogLevel::Debug,
                        message: format!("{i}"),
                        data: None,
                    },
                )
                .await
                .unwrap();
        }

        let page = storage.list_events(run_id, 4, Some(3)).await.unwrap();
        let seqs: Vec<u64> = page.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn claim_follows_priority_then_fifo() {
        let storage = storage();
        let now = Utc::now();
        let low = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
        let high = QueueItem::queued(
            Uuid::now_v7(),
            Uuid::now_v7(),
            10,
            now + chrono::Duration::seconds(1),
        );
        storage.enqueue(low.clone()).await.unwrap();
        storage.enqueue(high.clone()).await.unwrap();

        let claimed = storage
            .claim_next("owner-a", Utc::now(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, high.id);
        assert_eq!(claimed.status, QueueItemStatus::Running);
        assert_eq!(claimed.lease.as_ref().unwrap().owner_id, "owner-a");

        let claimed = storage
            .claim_next("owner-a", Utc::now(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, low.id);

        assert!(storage
            .claim_next("owner-a", Utc::now(), Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn queued_position_is_one_based_in_claim_order() {
        let storage = storage();
        let now = Utc::now();
        let first = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
        let jumper = QueueItem::queued(
            Uuid::now_v7(),
            Uuid::now_v7(),
            5,
            now + chrono::Duration::seconds(1),
        );
        storage.enqueue(first.clone()).await.unwrap();
        storage.enqueue(jumper.clone()).await.unwrap();

        assert_eq!(storage.queued_position(jumper.id).await.unwrap(), Some(1));
        assert_eq!(storage.queued_position(first.id).await.unwrap(), Some(2));
        assert_eq!(storage.queued_position(Uuid::now_v7()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn heartbeat_advances_all_owner_leases() {
        let storage = storage();
        let now = Utc::now();
        let ttl = Duration::from_secs(10);
        for _ in 0..3 {
            let item = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
            storage.enqueue(item).await.unwrap();
        }
        storage.claim_next("owner-a", now, ttl).await.unwrap();
        storage.claim_next("owner-a", now, ttl).await.unwrap();
        storage.claim_next("owner-b", now, ttl).await.unwrap();

        let later = now + chrono::Duration::seconds(60);
        let renewed = storage.heartbeat("owner-a", later, ttl).await.unwrap();
        assert_eq!(renewed, 2);

        // owner-b's lease was not renewed and is now expired
        let reclaimed = storage.reclaim_expired_leases(later).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn cancel_only_removes_queued_items() {
        let storage = storage();
        let item = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, Utc::now());
        storage.enqueue(item.clone()).await.unwrap();

        storage
            .claim_next("owner-a", Utc::now(), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!storage.cancel(item.id).await.unwrap());

        storage.requeue(item.id).await.unwrap();
        assert!(storage.cancel(item.id).await.unwrap());
        assert!(storage.get_item(item.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recover_requeues_running_and_adopts_paused() {
        let storage = storage();
        let now = Utc::now();
        let ttl = Duration::from_secs(30);

        let running = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
        let paused = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
        storage.enqueue(running.clone()).await.unwrap();
        storage.enqueue(paused.clone()).await.unwrap();
        storage
            .mark_running(running.id, "sw-old", now, ttl)
            .await
            .unwrap();
        storage
            .mark_paused(paused.id, "sw-old", now, ttl)
            .await
            .unwrap();

        let recovered = storage
            .recover_orphan_leases("sw-new", now, ttl)
            .await
            .unwrap();
        assert_eq!(recovered.len(), 2);

        let running_item = storage.get_item(running.id).await.unwrap().unwrap();
        assert_eq!(running_item.status, QueueItemStatus::Queued);
        assert!(running_item.lease.is_none());

        let paused_item = storage.get_item(paused.id).await.unwrap().unwrap();
        assert_eq!(paused_item.status, QueueItemStatus::Paused);
        assert_eq!(paused_item.lease.as_ref().unwrap().owner_id, "sw-new");

        let prev: Vec<&str> = recovered.iter().map(|r| r.prev_owner_id.as_str()).collect();
        assert_eq!(prev, vec!["sw-old", "sw-old"]);
    }

    #[tokio::test]
    async fn recover_ignores_own_leases() {
        let storage = storage();
        let now = Utc::now();
        let ttl = Duration::from_secs(30);
        let item = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, now);
        storage.enqueue(item.clone()).await.unwrap();
        storage.mark_running(item.id, "sw-new", now, ttl).await.unwrap();

        let recovered = storage
            .recover_orphan_leases("sw-new", now, ttl)
            .await
            .unwrap();
        assert!(recovered.is_empty());
    }

    #[tokio::test]
    async fn flow_schema_version_is_enforced() {
        let storage = storage();
        let mut flow = Flow {
            id: Uuid::now_v7(),
            schema_version: FLOW_SCHEMA_VERSION,
            name: "f".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            entry_node_id: None,
            nodes: vec![],
            edges: vec![],
            variables: vec![],
            policy: None,
            bindings: vec![],
        };
        storage.save_flow(flow.clone()).await.unwrap();
        assert!(storage.get_flow(flow.id).await.unwrap().is_some());

        flow.schema_version = 2;
        let result = storage.save_flow(flow).await;
        assert!(matches!(result, Err(StoreError::SchemaVersion { .. })));
    }

    #[tokio::test]
    async fn enqueue_conflicts_on_duplicate() {
        let storage = storage();
        let item = QueueItem::queued(Uuid::now_v7(), Uuid::now_v7(), 0, Utc::now());
        storage.enqueue(item.clone()).await.unwrap();
        assert!(matches!(
            storage.enqueue(item).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn persistent_vars_round_trip() {
        let storage = storage();
        storage
            .set_var("session", serde_json::json!({"token": "abc"}))
            .await
            .unwrap();

        let var = storage.get_var("session").await.unwrap().unwrap();
        assert_eq!(var.value["token"], "abc");

        assert!(storage.delete_var("session").await.unwrap());
        assert!(storage.get_var("session").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_a_run_drops_its_events() {
        let storage = storage();
        let run_id = seed_run(&storage).await;
        let other = seed_run(&storage).await;
        for _ in 0..3 {
            for id in [run_id, other] {
                storage
                    .append_event(
                        id,
                        RunEventKind::Log {
                            level: tabflow_core::LogLevel::Info,
                            message: "x".to_string(),
                            data: None,
                        },
                    )
                    .await
                    .unwrap();
            }
        }

        assert!(storage.delete_run(run_id).await.unwrap());
        assert_eq!(storage.event_count(run_id), 0);
        assert_eq!(storage.event_count(other), 3);
    }

    #[tokio::test]
    async fn save_run_preserves_args() {
        let storage = storage();
        let run_id = Uuid::now_v7();
        let mut record = RunRecord::queued(run_id, Uuid::now_v7(), Utc::now());
        let mut args = JsonMap::new();
        args.insert("city".to_string(), serde_json::json!("oslo"));
        record.args = args;
        storage.save_run(record.clone()).await.unwrap();

        let loaded = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }
}
