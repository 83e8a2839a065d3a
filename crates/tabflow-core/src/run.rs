//! Run records
//!
//! The durable state of one flow execution. Progress detail lives in the
//! append-only event log; the record carries the coarse status, cursor and
//! final result. Once a record reaches a terminal status it never changes
//! again and no further events may be appended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RunError;
use crate::trigger::TriggerKind;
use crate::JsonMap;

/// Lifecycle status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// Where a run came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<Uuid>,

    pub kind: TriggerKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tab_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    pub fired_at: DateTime<Utc>,
}

impl TriggerContext {
    pub fn manual() -> Self {
        Self {
            trigger_id: None,
            kind: TriggerKind::Manual,
            source_tab_id: None,
            source_url: None,
            fired_at: Utc::now(),
        }
    }
}

/// Debug configuration a run is enqueued with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DebugConfig {
    #[serde(default)]
    pub breakpoints: Vec<String>,

    #[serde(default)]
    pub pause_on_start: bool,
}

/// Durable state of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub flow_id: Uuid,
    pub status: RunStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub took_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<i64>,

    /// Entry override the run was enqueued with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,

    /// Cursor into the flow while the run progresses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,

    pub attempt: u32,
    pub max_attempts: u32,

    #[serde(default)]
    pub args: JsonMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugConfig>,

    /// Next event sequence number; dense from 0
    pub next_seq: u64,

    #[serde(default)]
    pub outputs: JsonMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl RunRecord {
    /// Fresh queued record with no events yet
    pub fn queued(id: Uuid, flow_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            flow_id,
            status: RunStatus::Queued,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            took_ms: None,
            tab_id: None,
            start_node_id: None,
            current_node_id: None,
            attempt: 0,
            max_attempts: 1,
            args: JsonMap::new(),
            trigger: None,
            debug: None,
            next_seq: 0,
            outputs: JsonMap::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
