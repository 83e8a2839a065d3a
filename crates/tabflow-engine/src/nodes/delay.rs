//! `delay` node: sleeps for a configured number of milliseconds

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use tabflow_core::{Node, RunError};

use crate::registry::{parse_config, NodeContext, NodeExecutor, NodeResult, NodeSuccess};

#[derive(Debug, Deserialize)]
struct DelayConfig {
    ms: u64,
}

pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    fn kind(&self) -> &str {
        "delay"
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), RunError> {
        parse_config::<DelayConfig>(self.kind(), config).map(|_| ())
    }

    async fn execute(&self, _ctx: &NodeContext, node: &Node) -> NodeResult {
        let config: DelayConfig = parse_config(self.kind(), &node.config)?;
        tokio::time::sleep(Duration::from_millis(config.ms)).await;
        Ok(NodeSuccess::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_requires_ms() {
        let node = DelayNode;
        assert!(node.validate_config(&json!({"ms": 10})).is_ok());
        assert!(node.validate_config(&json!({"ms": "soon"})).is_err());
    }
}
