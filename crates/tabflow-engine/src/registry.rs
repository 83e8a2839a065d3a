//! Plugin registry
//!
//! Node logic dispatches by tag: a map from node kind to a definition
//! carrying the config schema, an optional default policy and the execute
//! function. No inheritance hierarchy — executors are trait objects keyed
//! by string. The registry is populated eagerly at startup; an unknown
//! kind at execution time is an `UNSUPPORTED_NODE` error handled by the
//! flow's unsupported-node policy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use tabflow_core::{ErrorCode, JsonMap, LogLevel, Node, Policy, RunError};
use tabflow_storage::Storage;

use crate::host::HostCapabilities;

/// Branch directive returned by an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeNext {
    /// Follow the edge with this label
    EdgeLabel(String),

    /// Finish the run successfully after this node
    End,
}

/// A log line an executor wants on the run's event log
#[derive(Debug, Clone)]
pub struct NodeLog {
    pub level: LogLevel,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Successful node outcome
#[derive(Debug, Clone, Default)]
pub struct NodeSuccess {
    /// Variable mutations to apply to the run's vars table
    pub vars_patch: JsonMap,

    /// Outputs merged into the run's outputs
    pub outputs: JsonMap,

    /// Branch choice; absent means follow the default edge
    pub next: Option<NodeNext>,

    /// Log lines appended to the run's event log
    pub logs: Vec<NodeLog>,
}

pub type NodeResult = Result<NodeSuccess, RunError>;

/// Persistent-variable port handed to executors
#[derive(Clone)]
pub struct PersistentVars {
    storage: Arc<dyn Storage>,
}

impl PersistentVars {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, name: &str) -> Result<Option<serde_json::Value>, RunError> {
        Ok(self.storage.get_var(name).await?.map(|v| v.value))
    }

    pub async fn set(&self, name: &str, value: serde_json::Value) -> Result<(), RunError> {
        self.storage.set_var(name, value).await?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, RunError> {
        Ok(self.storage.delete_var(name).await?)
    }
}

/// Everything an executor may touch during one attempt
///
/// Executors must not reach outside this context; vars mutate only through
/// the returned patch and persistence only through the [`PersistentVars`]
/// port.
pub struct NodeContext {
    pub run_id: Uuid,
    pub flow_id: Uuid,
    pub tab_id: Option<i64>,
    pub attempt: u32,

    /// Snapshot of the run's variables at attempt start
    pub vars: JsonMap,

    pub host: Arc<HostCapabilities>,
    pub persistent: PersistentVars,
}

/// A node-kind definition: schema validation plus execution
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    fn kind(&self) -> &str;

    /// Policy merged under flow and node policies
    fn default_policy(&self) -> Option<Policy> {
        None
    }

    /// Validate the node's config against this kind's schema
    fn validate_config(&self, config: &serde_json::Value) -> Result<(), RunError>;

    async fn execute(&self, ctx: &NodeContext, node: &Node) -> NodeResult;
}

/// Parse a typed config, mapping failures to `VALIDATION_ERROR`
///
/// This is the schema mechanism: each kind declares a serde type and
/// deserialization is the validation.
pub fn parse_config<T: DeserializeOwned>(kind: &str, config: &serde_json::Value) -> Result<T, RunError> {
    serde_json::from_value(config.clone()).map_err(|e| {
        RunError::new(
            ErrorCode::ValidationError,
            format!("invalid config for node kind {kind}: {e}"),
        )
    })
}

/// Node-kind registry; lookup is O(1)
#[derive(Default)]
pub struct NodeRegistry {
    kinds: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.kinds.insert(executor.kind().to_string(), executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.kinds.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("kinds", &self.kinds.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct EchoConfig {
        value: String,
    }

    struct EchoNode;

    #[async_trait]
    impl NodeExecutor for EchoNode {
        fn kind(&self) -> &str {
            "echo"
        }

        fn validate_config(&self, config: &serde_json::Value) -> Result<(), RunError> {
            parse_config::<EchoConfig>(self.kind(), config).map(|_| ())
        }

        async fn execute(&self, _ctx: &NodeContext, node: &Node) -> NodeResult {
            let config: EchoConfig = parse_config(self.kind(), &node.config)?;
            let mut outputs = JsonMap::new();
            outputs.insert("echo".to_string(), json!(config.value));
            Ok(NodeSuccess {
                outputs,
                ..Default::default()
            })
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(EchoNode));

        assert!(registry.contains("echo"));
        assert!(!registry.contains("unknown"));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
    }

    #[test]
    fn schema_rejects_bad_config() {
        let node = EchoNode;
        assert!(node.validate_config(&json!({"value": "ok"})).is_ok());

        let err = node.validate_config(&json!({"wrong": 1})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
        assert!(err.message.contains("echo"));
    }

    #[test]
    fn registry_debug_lists_kinds() {
        let mut registry = NodeRegistry::new();
        registry.register(Arc::new(EchoNode));
        assert!(format!("{registry:?}").contains("echo"));
    }
}
