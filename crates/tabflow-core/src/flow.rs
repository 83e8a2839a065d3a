//! Flow model
//!
//! A flow is a versioned workflow graph: typed, configured nodes joined by
//! optionally labeled edges, plus variable definitions, a flow-level policy
//! and binding rules restricting which pages the flow may run on.
//! Structural invariants are enforced by [`crate::graph::validate_flow`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::policy::Policy;
use crate::rules::UrlRule;
use crate::JsonMap;

/// Current persisted schema version; mismatches are rejected on load
pub const FLOW_SCHEMA_VERSION: u32 = 3;

/// Edge label followed when a node succeeds without picking a branch
pub const DEFAULT_EDGE_LABEL: &str = "default";

/// Edge label followed when a node fails and no policy overrides it
pub const ON_ERROR_EDGE_LABEL: &str = "on_error";

/// A typed, configured unit of work in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,

    /// Node kind, registered in the plugin registry
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    /// Opaque configuration validated by the plugin's schema
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A directed transition between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// A variable a flow declares
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    pub name: String,

    #[serde(default)]
    pub required: bool,

    /// Sensitive variables are filtered from final run outputs
    #[serde(default)]
    pub sensitive: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// How the runner treats nodes whose kind is not registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnsupportedNodePolicy {
    /// Fail the node with `UNSUPPORTED_NODE`
    #[default]
    Stop,

    /// Skip the node and follow the default edge
    Skip,
}

/// Flow-level execution defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct FlowPolicy {
    /// Default policy merged under every node's own policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_defaults: Option<Policy>,

    /// Overall run timeout in milliseconds
    #[serde(
        default,
        with = "crate::flow::option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_timeout: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_unsupported_node: Option<UnsupportedNodePolicy>,
}

/// A versioned workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: Uuid,

    pub schema_version: u32,

    pub name: String,

    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_node_id: Option<String>,

    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,

    #[serde(default)]
    pub variables: Vec<VariableDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<FlowPolicy>,

    /// Pages this flow is valid on; empty means any page
    #[serde(default)]
    pub bindings: Vec<UrlRule>,
}

impl Flow {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All edges leaving the given node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Initial variable values: defaults overlaid with run args
    pub fn seed_vars(&self, args: &JsonMap) -> JsonMap {
        let mut vars = JsonMap::new();
        for def in &self.variables {
            if let Some(default) = &def.default {
                vars.insert(def.name.clone(), default.clone());
            }
        }
        for (k, v) in args {
            vars.insert(k.clone(), v.clone());
        }
        vars
    }

    /// Names of variables flagged sensitive
    pub fn sensitive_var_names(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.sensitive)
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Required variables that have no value in `vars`
    pub fn missing_required_vars(&self, vars: &JsonMap) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| v.required && !vars.contains_key(&v.name))
            .map(|v| v.name.as_str())
            .collect()
    }
}

pub(crate) mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => (d.as_millis() as u64).serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn flow_with(nodes: Vec<Node>, edges: Vec<Edge>) -> Flow {
        Flow {
            id: Uuid::now_v7(),
            schema_version: FLOW_SCHEMA_VERSION,
            name: "test flow".to_string(),
            description: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            entry_node_id: nodes.first().map(|n| n.id.clone()),
            nodes,
            edges,
            variables: vec![],
            policy: None,
            bindings: vec![],
        }
    }

    pub(crate) fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            kind: "log".to_string(),
            name: id.to_string(),
            disabled: false,
            policy: None,
            config: json!({"msg": id}),
        }
    }

    pub(crate) fn edge(id: &str, from: &str, to: &str) -> Edge {
        Edge {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            label: None,
        }
    }

    #[test]
    fn seed_vars_args_override_defaults() {
        let mut flow = flow_with(vec![node("a")], vec![]);
        flow.variables = vec![
            VariableDef {
                name: "city".to_string(),
                required: false,
                sensitive: false,
                default: Some(json!("berlin")),
            },
            VariableDef {
                name: "token".to_string(),
                required: true,
                sensitive: true,
                default: None,
            },
        ];

        let mut args = JsonMap::new();
        args.insert("city".to_string(), json!("lisbon"));

        let vars = flow.seed_vars(&args);
        assert_eq!(vars.get("city"), Some(&json!("lisbon")));
        assert!(!vars.contains_key("token"));

        assert_eq!(flow.missing_required_vars(&vars), vec!["token"]);
        assert_eq!(flow.sensitive_var_names(), vec!["token"]);
    }

    #[test]
    fn flow_serialization_round_trips() {
        let flow = flow_with(
            vec![node("a"), node("b")],
            vec![edge("e1", "a", "b")],
        );
        let json = serde_json::to_string(&flow).unwrap();
        let parsed: Flow = serde_json::from_str(&json).unwrap();
        assert_eq!(flow, parsed);
    }
}
