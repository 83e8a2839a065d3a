//! Input validation and normalization
//!
//! Everything arriving over the channel is validated here before it
//! reaches storage: non-empty ids, numeric ranges, enum whitelists.
//! Flows and triggers are normalized — ids assigned, timestamps managed,
//! schema version stamped — so persisted records are always well-formed.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use tabflow_core::{
    validate_flow, DebugConfig, Edge, Flow, FlowPolicy, JsonMap, Node, RunError, RunStatus,
    TriggerConfig, TriggerSpec, UrlRule, VariableDef, FLOW_SCHEMA_VERSION,
};
use tabflow_storage::Storage;

/// Flow as submitted by a client; storage-managed fields are optional
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowInput {
    #[serde(default)]
    pub id: Option<Uuid>,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub entry_node_id: Option<String>,

    pub nodes: Vec<Node>,

    #[serde(default)]
    pub edges: Vec<Edge>,

    #[serde(default)]
    pub variables: Vec<VariableDef>,

    #[serde(default)]
    pub policy: Option<FlowPolicy>,

    #[serde(default)]
    pub bindings: Vec<UrlRule>,
}

/// Normalize and validate a flow before persistence.
///
/// `createdAt` is preserved across updates and `updatedAt` refreshed;
/// the graph must pass full structural validation.
pub async fn normalize_flow(
    storage: &dyn Storage,
    input: FlowInput,
) -> Result<Flow, RunError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(RunError::validation("flow name must not be empty"));
    }
    for node in &input.nodes {
        if node.id.trim().is_empty() {
            return Err(RunError::validation("node ids must not be empty"));
        }
        if node.kind.trim().is_empty() {
            return Err(RunError::validation(format!(
                "node {} has an empty kind",
                node.id
            )));
        }
    }
    for edge in &input.edges {
        if edge.id.trim().is_empty() {
            return Err(RunError::validation("edge ids must not be empty"));
        }
    }

    let now = Utc::now();
    let id = input.id.unwrap_or_else(Uuid::now_v7);
    let created_at = match storage.get_flow(id).await {
        Ok(Some(existing)) => existing.created_at,
        _ => now,
    };

    let flow = Flow {
        id,
        schema_version: FLOW_SCHEMA_VERSION,
        name,
        description: input.description,
        created_at,
        updated_at: now,
        entry_node_id: input.entry_node_id,
        nodes: input.nodes,
        edges: input.edges,
        variables: input.variables,
        policy: input.policy,
        bindings: input.bindings,
    };
    validate_flow(&flow)?;
    Ok(flow)
}

/// Trigger as submitted by a client
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerInput {
    #[serde(default)]
    pub id: Option<Uuid>,

    pub flow_id: Uuid,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub args: JsonMap,

    pub config: TriggerConfig,
}

fn default_enabled() -> bool {
    true
}

/// Normalize and validate a trigger before persistence
pub async fn normalize_trigger(
    storage: &dyn Storage,
    input: TriggerInput,
) -> Result<TriggerSpec, RunError> {
    if storage.get_flow(input.flow_id).await?.is_none() {
        return Err(RunError::validation(format!(
            "flow {} does not exist",
            input.flow_id
        )));
    }
    validate_trigger_config(&input.config)?;

    let now = Utc::now();
    let id = input.id.unwrap_or_else(Uuid::now_v7);
    let created_at = match storage.get_trigger(id).await {
        Ok(Some(existing)) => existing.created_at,
        _ => now,
    };

    Ok(TriggerSpec {
        id,
        flow_id: input.flow_id,
        name: input.name.trim().to_string(),
        enabled: input.enabled,
        created_at,
        updated_at: now,
        args: input.args,
        config: input.config,
    })
}

fn validate_trigger_config(config: &TriggerConfig) -> Result<(), RunError> {
    match config {
        TriggerConfig::Manual => Ok(()),
        TriggerConfig::Url { rules } => {
            if rules.is_empty() {
                return Err(RunError::validation("url trigger needs at least one rule"));
            }
            for rule in rules {
                let value = match rule {
                    UrlRule::UrlPrefix(v) | UrlRule::Domain(v) | UrlRule::PathPrefix(v) => v,
                };
                if value.trim().is_empty() {
                    return Err(RunError::validation("url rule value must not be empty"));
                }
            }
            Ok(())
        }
        TriggerConfig::Cron { schedule } => {
            if schedule.hour > 23 {
                return Err(RunError::validation("cron hour must be 0-23"));
            }
            Ok(())
        }
        TriggerConfig::Interval { period_minutes } => {
            if *period_minutes < 1 {
                return Err(RunError::validation("interval period must be >= 1 minute"));
            }
            Ok(())
        }
        TriggerConfig::Once { .. } => Ok(()),
        TriggerConfig::Command { command } => {
            if command.trim().is_empty() {
                return Err(RunError::validation("command must not be empty"));
            }
            Ok(())
        }
        TriggerConfig::ContextMenu { title } => {
            if title.trim().is_empty() {
                return Err(RunError::validation("menu title must not be empty"));
            }
            Ok(())
        }
        TriggerConfig::Dom { selector, .. } => {
            if selector.trim().is_empty() {
                return Err(RunError::validation("dom selector must not be empty"));
            }
            Ok(())
        }
    }
}

// =============================================================================
// Request parameter shapes
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct IdParams {
    pub id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIdParams {
    pub run_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRunsParams {
    #[serde(default)]
    pub status: Option<RunStatus>,

    #[serde(default)]
    pub flow_id: Option<Uuid>,

    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetEventsParams {
    pub run_id: Uuid,

    #[serde(default)]
    pub from_seq: u64,

    #[serde(default)]
    pub limit: Option<usize>,
}

pub const EVENT_PAGE_MAX: usize = 1000;
pub const EVENT_PAGE_DEFAULT: usize = 200;

impl GetEventsParams {
    pub fn page_limit(&self) -> usize {
        self.limit.unwrap_or(EVENT_PAGE_DEFAULT).clamp(1, EVENT_PAGE_MAX)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRunParams {
    pub flow_id: Uuid,

    #[serde(default)]
    pub start_node_id: Option<String>,

    #[serde(default)]
    pub priority: i32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub args: JsonMap,

    #[serde(default)]
    pub debug: Option<DebugConfig>,

    #[serde(default)]
    pub tab_id: Option<i64>,
}

fn default_max_attempts() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRunParams {
    pub flow_id: Uuid,

    #[serde(default)]
    pub start_node_id: Option<String>,

    #[serde(default)]
    pub args: JsonMap,

    #[serde(default)]
    pub debug: Option<DebugConfig>,

    #[serde(default)]
    pub tab_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRunParams {
    pub run_id: Uuid,

    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FireTriggerParams {
    pub trigger_id: Uuid,

    #[serde(default)]
    pub source_tab_id: Option<i64>,

    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    #[serde(default)]
    pub run_id: Option<Uuid>,
}

/// Parse request params, mapping failures to `VALIDATION_ERROR`
pub fn parse_params<T: serde::de::DeserializeOwned>(
    method: &str,
    params: Value,
) -> Result<T, RunError> {
    serde_json::from_value(params)
        .map_err(|e| RunError::validation(format!("invalid params for {method}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabflow_storage::{FlowStore, MemoryStorage};

    fn node_json(id: &str) -> Value {
        json!({"id": id, "kind": "log", "config": {"msg": id}})
    }

    #[tokio::test]
    async fn normalize_assigns_id_and_version() {
        let storage = MemoryStorage::new();
        let input: FlowInput = serde_json::from_value(json!({
            "name": "  padded name  ",
            "nodes": [node_json("a")],
        }))
        .unwrap();

        let flow = normalize_flow(&storage, input).await.unwrap();
        assert_eq!(flow.schema_version, FLOW_SCHEMA_VERSION);
        assert_eq!(flow.name, "padded name");
        assert_eq!(flow.created_at, flow.updated_at);
    }

    #[tokio::test]
    async fn normalize_preserves_created_at_on_update() {
        let storage = MemoryStorage::new();
        let input: FlowInput = serde_json::from_value(json!({
            "name": "v1",
            "nodes": [node_json("a")],
        }))
        .unwrap();
        let original = normalize_flow(&storage, input).await.unwrap();
        storage.save_flow(original.clone()).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let update: FlowInput = serde_json::from_value(json!({
            "id": original.id,
            "name": "v2",
            "nodes": [node_json("a")],
        }))
        .unwrap();
        let updated = normalize_flow(&storage, update).await.unwrap();

        assert_eq!(updated.created_at, original.created_at);
        assert!(updated.updated_at > original.updated_at);
        assert_eq!(updated.name, "v2");
    }

    #[tokio::test]
    async fn normalize_rejects_structural_problems() {
        let storage = MemoryStorage::new();

        let empty_name: FlowInput = serde_json::from_value(json!({
            "name": "   ",
            "nodes": [node_json("a")],
        }))
        .unwrap();
        assert!(normalize_flow(&storage, empty_name).await.is_err());

        let cycle: FlowInput = serde_json::from_value(json!({
            "name": "cyclic",
            "nodes": [node_json("a"), node_json("b")],
            "edges": [
                {"id": "e1", "from": "a", "to": "b", "label": "x"},
                {"id": "e2", "from": "b", "to": "a", "label": "y"},
            ],
        }))
        .unwrap();
        let err = normalize_flow(&storage, cycle).await.unwrap_err();
        assert_eq!(err.code, tabflow_core::ErrorCode::DagCycle);
    }

    #[tokio::test]
    async fn trigger_validation_enforces_kind_rules() {
        let storage = MemoryStorage::new();
        let input: FlowInput = serde_json::from_value(json!({
            "name": "f",
            "nodes": [node_json("a")],
        }))
        .unwrap();
        let flow = normalize_flow(&storage, input).await.unwrap();
        storage.save_flow(flow.clone()).await.unwrap();

        let bad: TriggerInput = serde_json::from_value(json!({
            "flowId": flow.id,
            "config": {"kind": "interval", "period_minutes": 0},
        }))
        .unwrap();
        assert!(normalize_trigger(&storage, bad).await.is_err());

        let good: TriggerInput = serde_json::from_value(json!({
            "flowId": flow.id,
            "config": {"kind": "url", "rules": [{"kind": "domain", "value": "example.com"}]},
        }))
        .unwrap();
        let spec = normalize_trigger(&storage, good).await.unwrap();
        assert!(spec.enabled);
        assert_eq!(spec.flow_id, flow.id);
    }

    #[test]
    fn event_page_limit_is_clamped() {
        let params = GetEventsParams {
            run_id: Uuid::nil(),
            from_seq: 0,
            limit: Some(10_000),
        };
        assert_eq!(params.page_limit(), EVENT_PAGE_MAX);

        let params = GetEventsParams {
            run_id: Uuid::nil(),
            from_seq: 0,
            limit: None,
        };
        assert_eq!(params.page_limit(), EVENT_PAGE_DEFAULT);
    }
}
