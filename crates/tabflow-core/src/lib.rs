//! # tabflow-core
//!
//! Data model for the tabflow browser-automation engine.
//!
//! Everything here is plain data shared by the storage, engine and RPC
//! crates: workflow graphs ([`Flow`], [`Node`], [`Edge`]), execution
//! policies ([`Policy`]), durable run state ([`RunRecord`]), the
//! append-only event log ([`RunEvent`]), scheduling records
//! ([`QueueItem`]) and trigger specifications ([`TriggerSpec`]), plus
//! graph validation and traversal.

pub mod error;
pub mod event;
pub mod flow;
pub mod graph;
pub mod policy;
pub mod queue;
pub mod rules;
pub mod run;
pub mod trigger;

/// JSON object map used for args, vars, outputs and patches
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

pub use error::{ErrorCode, RunError};
pub use event::{
    replay_vars, LogLevel, OnErrorDecision, PauseReason, RunEvent, RunEventKind,
};
pub use flow::{
    Edge, Flow, FlowPolicy, Node, UnsupportedNodePolicy, VariableDef, DEFAULT_EDGE_LABEL,
    FLOW_SCHEMA_VERSION, ON_ERROR_EDGE_LABEL,
};
pub use graph::{find_next_node, reachable_nodes, resolve_entry_node, validate_flow};
pub use policy::{
    ArtifactPolicy, Backoff, GotoTarget, Jitter, OnErrorPolicy, Policy, RetryPolicy,
    ScreenshotPolicy, TimeoutPolicy, TimeoutScope, WaitPolicy,
};
pub use queue::{Lease, QueueItem, QueueItemStatus};
pub use rules::{any_rule_matches, UrlRule};
pub use run::{DebugConfig, RunRecord, RunStatus, TriggerContext};
pub use trigger::{
    CronSchedule, DomObserveOptions, PersistentVar, TriggerConfig, TriggerKind, TriggerSpec,
};
