//! Run control
//!
//! [`RunHandle`] is the live control surface for one executing run: its
//! pause gate, cancel flag and a live view of its variables.
//! [`RunControl`] is the shared service RPC and the debug controller go
//! through, so pause/resume/cancel semantics cannot diverge between
//! callers. Cancel is idempotent and always safe to call.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tabflow_core::{
    JsonMap, QueueItemStatus, RunError, RunEventKind, RunRecord, RunStatus,
};
use tabflow_storage::Storage;

use crate::bus::EventBus;
use crate::pause::PauseGate;

/// Live control surface for one run
pub struct RunHandle {
    pub run_id: Uuid,
    gate: PauseGate,
    vars: RwLock<JsonMap>,
    current_node: RwLock<Option<String>>,
}

impl RunHandle {
    pub fn new(run_id: Uuid) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            gate: PauseGate::new(),
            vars: RwLock::new(JsonMap::new()),
            current_node: RwLock::new(None),
        })
    }

    pub fn gate(&self) -> &PauseGate {
        &self.gate
    }

    pub fn request_pause(&self) {
        self.gate.pause();
    }

    pub fn resume(&self) {
        self.gate.resume();
    }

    pub fn cancel(&self, reason: Option<String>) {
        self.gate.cancel(reason);
    }

    pub fn vars_snapshot(&self) -> JsonMap {
        self.vars.read().clone()
    }

    pub fn get_var(&self, name: &str) -> Option<serde_json::Value> {
        self.vars.read().get(name).cloned()
    }

    pub fn set_var(&self, name: &str, value: serde_json::Value) {
        self.vars.write().insert(name.to_string(), value);
    }

    pub(crate) fn replace_vars(&self, vars: JsonMap) {
        *self.vars.write() = vars;
    }

    pub(crate) fn apply_patch(&self, patch: &JsonMap) {
        let mut vars = self.vars.write();
        for (k, v) in patch {
            vars.insert(k.clone(), v.clone());
        }
    }

    pub fn current_node(&self) -> Option<String> {
        self.current_node.read().clone()
    }

    pub(crate) fn set_current_node(&self, node_id: Option<String>) {
        *self.current_node.write() = node_id;
    }
}

/// Shared pause/resume/cancel service over live and stored runs
pub struct RunControl {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    kick: Arc<Notify>,
    live: DashMap<Uuid, Arc<RunHandle>>,
}

impl RunControl {
    pub fn new(storage: Arc<dyn Storage>, bus: Arc<EventBus>, kick: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            storage,
            bus,
            kick,
            live: DashMap::new(),
        })
    }

    pub(crate) fn register(&self, handle: Arc<RunHandle>) {
        self.live.insert(handle.run_id, handle);
    }

    pub(crate) fn unregister(&self, run_id: Uuid) {
        self.live.remove(&run_id);
    }

    /// Handle of a currently executing run
    pub fn handle(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.live.get(&run_id).map(|h| Arc::clone(&h))
    }

    pub fn active_count(&self) -> usize {
        self.live.len()
    }

    /// Request a pause; the runner parks at its next suspension point
    pub async fn pause(&self, run_id: Uuid) -> Result<(), RunError> {
        match self.handle(run_id) {
            Some(handle) => {
                handle.request_pause();
                Ok(())
            }
            None => Err(RunError::validation(format!(
                "run {run_id} is not active"
            ))),
        }
    }

    /// Resume a paused run
    ///
    /// A live runner is released through its gate. A paused run without a
    /// live runner (recovered after a crash) is put back on the queue and
    /// restarts from its entry node.
    pub async fn resume(&self, run_id: Uuid) -> Result<(), RunError> {
        if let Some(handle) = self.handle(run_id) {
            handle.resume();
            return Ok(());
        }

        let item = self.storage.get_item(run_id).await?;
        match item {
            Some(item) if item.status == QueueItemStatus::Paused => {
                self.storage.requeue(run_id).await?;
                self.storage.set_run_status(run_id, RunStatus::Queued).await?;
                self.kick.notify_one();
                info!(%run_id, "requeued recovered paused run");
                Ok(())
            }
            _ => Err(RunError::validation(format!("run {run_id} is not paused"))),
        }
    }

    /// Cancel a run; idempotent in every state
    pub async fn cancel(&self, run_id: Uuid, reason: Option<String>) -> Result<(), RunError> {
        // A live runner finalizes itself at the next suspension point
        if let Some(handle) = self.handle(run_id) {
            handle.cancel(reason);
            return Ok(());
        }

        let record = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| RunError::validation(format!("run {run_id} not found")))?;
        if record.is_terminal() {
            debug!(%run_id, "cancel on terminal run is a no-op");
            return Ok(());
        }

        // Queued or orphaned-paused: the queue serves the cancel directly
        self.storage.mark_done(run_id).await?;
        if let Err(e) = self
            .bus
            .publish(run_id, RunEventKind::RunCanceled { reason: reason.clone() })
            .await
        {
            warn!(%run_id, "failed to append run.canceled: {e}");
        }
        self.finalize_canceled(record, reason).await?;
        Ok(())
    }

    async fn finalize_canceled(
        &self,
        mut record: RunRecord,
        reason: Option<String>,
    ) -> Result<(), RunError> {
        let now = Utc::now();
        record.status = RunStatus::Canceled;
        record.error = Some(RunError::canceled(reason.as_deref()));
        record.finished_at = Some(now);
        record.updated_at = now;
        // next_seq moved when run.canceled was appended; reload the cursor
        if let Some(fresh) = self.storage.get_run(record.id).await? {
            record.next_seq = fresh.next_seq;
        }
        self.storage.save_run(record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabflow_core::QueueItem;

    async fn setup() -> (Arc<RunControl>, Arc<dyn Storage>, Arc<EventBus>) {
        let storage: Arc<dyn Storage> = Arc::new(tabflow_storage::MemoryStorage::new());
        let bus = EventBus::new(Arc::clone(&storage));
        let control = RunControl::new(Arc::clone(&storage), Arc::clone(&bus), Arc::new(Notify::new()));
        (control, storage, bus)
    }

    #[tokio::test]
    async fn cancel_queued_run_writes_event_and_record() {
        let (control, storage, _bus) = setup().await;
        let run_id = Uuid::now_v7();
        let flow_id = Uuid::now_v7();
        storage
            .save_run(RunRecord::queued(run_id, flow_id, Utc::now()))
            .await
            .unwrap();
        storage
            .enqueue(QueueItem::queued(run_id, flow_id, 0, Utc::now()))
            .await
            .unwrap();

        control.cancel(run_id, Some("user".to_string())).await.unwrap();

        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Canceled);
        assert!(record.finished_at.is_some());
        assert!(storage.get_item(run_id).await.unwrap().is_none());

        let events = storage.list_events(run_id, 0, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].kind,
            RunEventKind::RunCanceled { ref reason } if reason.as_deref() == Some("user")
        ));
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (control, storage, _bus) = setup().await;
        let run_id = Uuid::now_v7();
        let flow_id = Uuid::now_v7();
        storage
            .save_run(RunRecord::queued(run_id, flow_id, Utc::now()))
            .await
            .unwrap();
        storage
            .enqueue(QueueItem::queued(run_id, flow_id, 0, Utc::now()))
            .await
            .unwrap();

        control.cancel(run_id, Some("first".to_string())).await.unwrap();
        control.cancel(run_id, Some("second".to_string())).await.unwrap();
        control.cancel(run_id, None).await.unwrap();

        // Exactly one run.canceled, terminal status untouched
        let events = storage.list_events(run_id, 0, None).await.unwrap();
        let canceled = events
            .iter()
            .filter(|e| matches!(e.kind, RunEventKind::RunCanceled { .. }))
            .count();
        assert_eq!(canceled, 1);

        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert!(matches!(
            record.error.as_ref().unwrap().message.as_str(),
            "first"
        ));
    }

    #[tokio::test]
    async fn pause_requires_live_runner() {
        let (control, _storage, _bus) = setup().await;
        let err = control.pause(Uuid::now_v7()).await.unwrap_err();
        assert_eq!(err.code, tabflow_core::ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn resume_requeues_recovered_paused_run() {
        let (control, storage, _bus) = setup().await;
        let run_id = Uuid::now_v7();
        let flow_id = Uuid::now_v7();
        let mut record = RunRecord::queued(run_id, flow_id, Utc::now());
        record.status = RunStatus::Paused;
        storage.save_run(record).await.unwrap();
        storage
            .enqueue(QueueItem::queued(run_id, flow_id, 0, Utc::now()))
            .await
            .unwrap();
        storage
            .mark_paused(run_id, "sw-old", Utc::now(), std::time::Duration::from_secs(30))
            .await
            .unwrap();

        control.resume(run_id).await.unwrap();

        let item = storage.get_item(run_id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueItemStatus::Queued);
        assert!(item.lease.is_none());
        let record = storage.get_run(run_id).await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Queued);
    }

    #[tokio::test]
    async fn live_handle_vars_are_visible() {
        let (control, _storage, _bus) = setup().await;
        let handle = RunHandle::new(Uuid::now_v7());
        control.register(Arc::clone(&handle));

        handle.set_var("count", serde_json::json!(3));
        let live = control.handle(handle.run_id).unwrap();
        assert_eq!(live.get_var("count"), Some(serde_json::json!(3)));

        control.unregister(handle.run_id);
        assert!(control.handle(handle.run_id).is_none());
    }
}
