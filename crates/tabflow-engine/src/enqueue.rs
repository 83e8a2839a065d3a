//! Enqueue service
//!
//! The single path that creates runs, shared by the RPC surface and the
//! trigger subsystem: validate, persist the run record, enqueue the queue
//! item, append `run.queued`, kick the scheduler.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, instrument};
use uuid::Uuid;

use tabflow_core::{
    DebugConfig, JsonMap, QueueItem, RunError, RunEventKind, RunRecord, TriggerContext,
};
use tabflow_storage::Storage;

use crate::bus::EventBus;

/// Bounds enforced on enqueue input
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = -1000..=1000;
pub const MAX_ATTEMPTS_RANGE: std::ops::RangeInclusive<u32> = 1..=100;

/// Input to [`EnqueueService::enqueue`]
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub flow_id: Uuid,
    pub start_node_id: Option<String>,
    pub priority: i32,
    pub max_attempts: u32,
    pub args: JsonMap,
    pub trigger: Option<TriggerContext>,
    pub debug: Option<DebugConfig>,
    pub tab_id: Option<i64>,
}

impl EnqueueRequest {
    pub fn new(flow_id: Uuid) -> Self {
        Self {
            flow_id,
            start_node_id: None,
            priority: 0,
            max_attempts: 1,
            args: JsonMap::new(),
            trigger: None,
            debug: None,
            tab_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_args(mut self, args: JsonMap) -> Self {
        self.args = args;
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerContext) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = Some(debug);
        self
    }
}

/// What the caller gets back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueReceipt {
    pub run_id: Uuid,

    /// 1-based position in the priority-sorted queued list; −1 means
    /// already claimed or unknown — a snapshot, not an error
    pub position: i64,
}

/// The only path that creates runs
pub struct EnqueueService {
    storage: Arc<dyn Storage>,
    bus: Arc<EventBus>,
    kick: Arc<Notify>,
}

impl EnqueueService {
    pub fn new(storage: Arc<dyn Storage>, bus: Arc<EventBus>, kick: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self { storage, bus, kick })
    }

    #[instrument(skip(self, request), fields(flow_id = %request.flow_id))]
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueReceipt, RunError> {
        let flow = self
            .storage
            .get_flow(request.flow_id)
            .await?
            .ok_or_else(|| {
                RunError::validation(format!("flow {} does not exist", request.flow_id))
            })?;

        if let Some(start) = &request.start_node_id {
            if flow.node(start).is_none() {
                return Err(RunError::validation(format!(
                    "start node {start} is not in flow {}",
                    flow.id
                )));
            }
        }
        if !PRIORITY_RANGE.contains(&request.priority) {
            return Err(RunError::validation(format!(
                "priority {} out of range {:?}",
                request.priority, PRIORITY_RANGE
            )));
        }
        if !MAX_ATTEMPTS_RANGE.contains(&request.max_attempts) {
            return Err(RunError::validation(format!(
                "max attempts {} out of range {:?}",
                request.max_attempts, MAX_ATTEMPTS_RANGE
            )));
        }

        let run_id = Uuid::now_v7();
        let now = Utc::now();

        let mut record = RunRecord::queued(run_id, flow.id, now);
        record.start_node_id = request.start_node_id.clone();
        record.max_attempts = request.max_attempts;
        record.args = request.args.clone();
        record.trigger = request.trigger.clone();
        record.debug = request.debug.clone();
        record.tab_id = request
            .tab_id
            .or_else(|| request.trigger.as_ref().and_then(|t| t.source_tab_id));
        self.storage.save_run(record).await?;

        // run.queued lands before the item becomes claimable so it is
        // always the first event, even if a poll claims immediately
        self.bus
            .publish(
                run_id,
                RunEventKind::RunQueued {
                    flow_id: flow.id,
                    priority: request.priority,
                    args: request.args.clone(),
                    trigger: request.trigger.clone(),
                },
            )
            .await?;

        let mut item = QueueItem::queued(run_id, flow.id, request.priority, now);
        item.max_attempts = request.max_attempts;
        item.args = request.args;
        item.trigger = request.trigger;
        item.debug = request.debug.clone();
        self.storage.enqueue(item).await?;

        // Non-blocking: the scheduler picks this up on its next pump
        self.kick.notify_one();

        let position = self
            .storage
            .queued_position(run_id)
            .await?
            .map(|p| p as i64)
            .unwrap_or(-1);
        debug!(%run_id, position, "run enqueued");

        Ok(EnqueueReceipt { run_id, position })
    }
}
