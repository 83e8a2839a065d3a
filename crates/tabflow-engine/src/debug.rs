//! Debug controller
//!
//! Single entry point for debugging: attach/detach, pause/resume,
//! step-over, breakpoint edits, state snapshots and variable access.
//! Step mode lives in the [`BreakpointRegistry`]; the controller never
//! caches it. Variable reads prefer the live runner and fall back to
//! replaying `vars.patch` events over the initial seed when the run is no
//! longer active.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use tabflow_core::{replay_vars, RunError, RunEventKind, RunStatus};
use tabflow_storage::Storage;

use crate::breakpoints::BreakpointRegistry;
use crate::bus::EventBus;
use crate::control::RunControl;

/// Commands accepted by [`DebugController::handle`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DebugCommand {
    Attach { run_id: Uuid },
    Detach { run_id: Uuid },
    Pause { run_id: Uuid },
    Resume { run_id: Uuid },
    StepOver { run_id: Uuid },
    SetBreakpoints { run_id: Uuid, node_ids: Vec<String> },
    AddBreakpoint { run_id: Uuid, node_id: String },
    RemoveBreakpoint { run_id: Uuid, node_id: String },
    GetState { run_id: Uuid },
    GetVar { run_id: Uuid, name: String },
    SetVar { run_id: Uuid, name: String, value: Value },
}

impl DebugCommand {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Attach { run_id }
            | Self::Detach { run_id }
            | Self::Pause { run_id }
            | Self::Resume { run_id }
            | Self::StepOver { run_id }
            | Self::SetBreakpoints { run_id, .. }
            | Self::AddBreakpoint { run_id, .. }
            | Self::RemoveBreakpoint { run_id, .. }
            | Self::GetState { run_id }
            | Self::GetVar { run_id, .. }
            | Self::SetVar { run_id, .. } => *run_id,
        }
    }
}

/// Snapshot pushed to debug subscribers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebuggerState {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub current_node_id: Option<String>,
    pub breakpoints: Vec<String>,
    pub step_armed: bool,
    pub live: bool,
    pub attached: bool,
}

pub type DebugListener = Arc<dyn Fn(&DebuggerState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugSubscriptionId(u64);

struct DebugSubscription {
    id: DebugSubscriptionId,
    run_id: Option<Uuid>,
    listener: DebugListener,
}

/// Debugging facade over the control service, breakpoint registry and
/// event log
pub struct DebugController {
    storage: Arc<dyn Storage>,
    control: Arc<RunControl>,
    breakpoints: Arc<BreakpointRegistry>,
    attached: DashMap<Uuid, ()>,
    subscriptions: RwLock<Vec<DebugSubscription>>,
    next_sub: AtomicU64,
}

impl DebugController {
    pub fn new(
        storage: Arc<dyn Storage>,
        control: Arc<RunControl>,
        breakpoints: Arc<BreakpointRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            storage,
            control,
            breakpoints,
            attached: DashMap::new(),
            subscriptions: RwLock::new(Vec::new()),
            next_sub: AtomicU64::new(1),
        })
    }

    /// Push state snapshots on pause/resume events
    pub fn attach_to_bus(self: &Arc<Self>, bus: &EventBus) {
        let controller = Arc::downgrade(self);
        bus.subscribe(
            None,
            Arc::new(move |event| {
                if !matches!(
                    event.kind,
                    RunEventKind::RunPaused { .. } | RunEventKind::RunResumed {}
                ) {
                    return;
                }
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                let run_id = event.run_id;
                tokio::spawn(async move {
                    controller.push_state(run_id).await;
                });
            }),
        );
    }

    /// Execute one debug command; results are plain JSON for the RPC
    /// surface
    pub async fn handle(&self, command: DebugCommand) -> Result<Value, RunError> {
        let run_id = command.run_id();
        debug!(%run_id, ?command, "debug command");
        match command {
            DebugCommand::Attach { run_id } => {
                self.attached.insert(run_id, ());
                let state = self.snapshot(run_id).await?;
                self.fan_out(&state);
                Ok(serde_json::to_value(state).unwrap_or(Value::Null))
            }
            DebugCommand::Detach { run_id } => {
                self.attached.remove(&run_id);
                Ok(json!({ "detached": true }))
            }
            DebugCommand::Pause { run_id } => {
                self.control.pause(run_id).await?;
                Ok(json!({ "requested": true }))
            }
            DebugCommand::Resume { run_id } => {
                self.control.resume(run_id).await?;
                self.push_state(run_id).await;
                Ok(json!({ "resumed": true }))
            }
            DebugCommand::StepOver { run_id } => {
                // Arm one pause-at-next-node, then release the gate
                self.breakpoints.arm_step(run_id);
                self.control.resume(run_id).await?;
                self.push_state(run_id).await;
                Ok(json!({ "stepping": true }))
            }
            DebugCommand::SetBreakpoints { run_id, node_ids } => {
                self.breakpoints.set_breakpoints(run_id, node_ids);
                self.push_state(run_id).await;
                Ok(json!({ "ok": true }))
            }
            DebugCommand::AddBreakpoint { run_id, node_id } => {
                self.breakpoints.add_breakpoint(run_id, node_id);
                self.push_state(run_id).await;
                Ok(json!({ "ok": true }))
            }
            DebugCommand::RemoveBreakpoint { run_id, node_id } => {
                self.breakpoints.remove_breakpoint(run_id, &node_id);
                self.push_state(run_id).await;
                Ok(json!({ "ok": true }))
            }
            DebugCommand::GetState { run_id } => {
                let state = self.snapshot(run_id).await?;
                Ok(serde_json::to_value(state).unwrap_or(Value::Null))
            }
            DebugCommand::GetVar { run_id, name } => {
                let value = self.get_var(run_id, &name).await?;
                Ok(value.unwrap_or(Value::Null))
            }
            DebugCommand::SetVar { run_id, name, value } => {
                let handle = self.control.handle(run_id).ok_or_else(|| {
                    RunError::validation("setVar requires a live run")
                })?;
                handle.set_var(&name, value);
                Ok(json!({ "ok": true }))
            }
        }
    }

    /// Read a variable: live runner first, event replay otherwise
    pub async fn get_var(&self, run_id: Uuid, name: &str) -> Result<Option<Value>, RunError> {
        if let Some(handle) = self.control.handle(run_id) {
            return Ok(handle.get_var(name));
        }

        let record = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| RunError::validation(format!("run {run_id} not found")))?;
        let flow = self
            .storage
            .get_flow(record.flow_id)
            .await?
            .ok_or_else(|| RunError::validation(format!("flow {} not found", record.flow_id)))?;

        let seed = flow.seed_vars(&record.args);
        let events = self.storage.list_events(run_id, 0, None).await?;
        let vars = replay_vars(&seed, &events);
        Ok(vars.get(name).cloned())
    }

    /// Build a state snapshot from session state, the run record and the
    /// breakpoint registry
    pub async fn snapshot(&self, run_id: Uuid) -> Result<DebuggerState, RunError> {
        let record = self
            .storage
            .get_run(run_id)
            .await?
            .ok_or_else(|| RunError::validation(format!("run {run_id} not found")))?;
        let handle = self.control.handle(run_id);
        let bp = self.breakpoints.state(run_id);

        let mut breakpoints: Vec<String> = bp.breakpoints.into_iter().collect();
        breakpoints.sort();

        Ok(DebuggerState {
            run_id,
            status: record.status,
            current_node_id: handle
                .as_ref()
                .and_then(|h| h.current_node())
                .or(record.current_node_id),
            breakpoints,
            step_armed: bp.step_armed,
            live: handle.is_some(),
            attached: self.attached.contains_key(&run_id),
        })
    }

    /// Register a state listener, optionally filtered to one run
    pub fn subscribe(&self, run_id: Option<Uuid>, listener: DebugListener) -> DebugSubscriptionId {
        let id = DebugSubscriptionId(self.next_sub.fetch_add(1, Ordering::SeqCst));
        self.subscriptions.write().push(DebugSubscription {
            id,
            run_id,
            listener,
        });
        id
    }

    pub fn unsubscribe(&self, id: DebugSubscriptionId) {
        self.subscriptions.write().retain(|s| s.id != id);
    }

    async fn push_state(&self, run_id: Uuid) {
        match self.snapshot(run_id).await {
            Ok(state) => self.fan_out(&state),
            Err(e) => warn!(%run_id, "debug snapshot failed: {e}"),
        }
    }

    fn fan_out(&self, state: &DebuggerState) {
        let listeners: Vec<DebugListener> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.run_id.is_none() || s.run_id == Some(state.run_id))
                .map(|s| Arc::clone(&s.listener))
                .collect()
        };
        for listener in listeners {
            listener(state);
        }
    }
}
