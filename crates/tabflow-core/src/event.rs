//! Run events
//!
//! The append-only observation log for a run. Events are keyed by
//! `(run_id, seq)` with `seq` dense from 0 and are immutable once written.
//! Each event carries enough context that run state can be reconstructed
//! by replaying the log from the start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RunError;
use crate::policy::GotoTarget;
use crate::run::TriggerContext;
use crate::JsonMap;

/// Why a run paused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PauseReason {
    /// The next node is a breakpoint
    Breakpoint { node_id: String },

    /// Step-over was armed and hit the next node
    Step { node_id: String },

    /// Explicit pause request
    Manual,
}

/// The on-error decision recorded on a `node.failed` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OnErrorDecision {
    Stop,
    Continue,
    Goto { target: GotoTarget },
    Retry { next_attempt: u32, delay_ms: u64 },
}

/// Log severity for `log` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Event payloads, tagged by type on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEventKind {
    #[serde(rename = "run.queued")]
    RunQueued {
        flow_id: Uuid,
        priority: i32,
        #[serde(default)]
        args: JsonMap,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trigger: Option<TriggerContext>,
    },

    #[serde(rename = "run.started")]
    RunStarted {
        flow_id: Uuid,
        entry_node_id: String,
    },

    #[serde(rename = "run.paused")]
    RunPaused { reason: PauseReason },

    #[serde(rename = "run.resumed")]
    RunResumed {},

    #[serde(rename = "run.recovered")]
    RunRecovered {
        from_status: String,
        to_status: String,
        prev_owner_id: String,
    },

    #[serde(rename = "run.succeeded")]
    RunSucceeded {
        #[serde(default)]
        outputs: JsonMap,
    },

    #[serde(rename = "run.failed")]
    RunFailed {
        error: RunError,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
    },

    #[serde(rename = "run.canceled")]
    RunCanceled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    #[serde(rename = "node.queued")]
    NodeQueued { node_id: String },

    #[serde(rename = "node.started")]
    NodeStarted { node_id: String, attempt: u32 },

    #[serde(rename = "node.succeeded")]
    NodeSucceeded {
        node_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        outputs: Option<JsonMap>,
    },

    #[serde(rename = "node.failed")]
    NodeFailed {
        node_id: String,
        attempt: u32,
        error: RunError,
        decision: OnErrorDecision,
    },

    #[serde(rename = "node.skipped")]
    NodeSkipped { node_id: String, reason: String },

    #[serde(rename = "vars.patch")]
    VarsPatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node_id: Option<String>,
        patch: JsonMap,
    },

    #[serde(rename = "log")]
    Log {
        level: LogLevel,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
}

impl RunEventKind {
    /// The wire name of this event type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::RunQueued { .. } => "run.queued",
            Self::RunStarted { .. } => "run.started",
            Self::RunPaused { .. } => "run.paused",
            Self::RunResumed {} => "run.resumed",
            Self::RunRecovered { .. } => "run.recovered",
            Self::RunSucceeded { .. } => "run.succeeded",
            Self::RunFailed { .. } => "run.failed",
            Self::RunCanceled { .. } => "run.canceled",
            Self::NodeQueued { .. } => "node.queued",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeSucceeded { .. } => "node.succeeded",
            Self::NodeFailed { .. } => "node.failed",
            Self::NodeSkipped { .. } => "node.skipped",
            Self::VarsPatch { .. } => "vars.patch",
            Self::Log { .. } => "log",
        }
    }

    /// Whether this event ends a run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RunSucceeded { .. } | Self::RunFailed { .. } | Self::RunCanceled { .. }
        )
    }

    /// The node this event concerns, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeQueued { node_id }
            | Self::NodeStarted { node_id, .. }
            | Self::NodeSucceeded { node_id, .. }
            | Self::NodeFailed { node_id, .. }
            | Self::NodeSkipped { node_id, .. } => Some(node_id),
            Self::VarsPatch { node_id, .. } => node_id.as_deref(),
            _ => None,
        }
    }
}

/// A stored event: envelope plus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: Uuid,
    pub seq: u64,
    pub at: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// Replay `vars.patch` events over a seed to reconstruct final vars
pub fn replay_vars(seed: &JsonMap, events: &[RunEvent]) -> JsonMap {
    let mut vars = seed.clone();
    for event in events {
        if let RunEventKind::VarsPatch { patch, .. } = &event.kind {
            for (k, v) in patch {
                vars.insert(k.clone(), v.clone());
            }
        }
    }
    vars
}
