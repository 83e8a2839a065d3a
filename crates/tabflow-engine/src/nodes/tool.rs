//! `tool` node: invokes a named browser tool through the host port

use async_trait::async_trait;
use serde::Deserialize;

use tabflow_core::{JsonMap, Node, RunError};

use crate::registry::{parse_config, NodeContext, NodeExecutor, NodeResult, NodeSuccess};

#[derive(Debug, Deserialize)]
struct ToolConfig {
    tool: String,

    #[serde(default)]
    args: serde_json::Value,
}

pub struct ToolNode;

#[async_trait]
impl NodeExecutor for ToolNode {
    fn kind(&self) -> &str {
        "tool"
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), RunError> {
        let parsed: ToolConfig = parse_config(self.kind(), config)?;
        if parsed.tool.is_empty() {
            return Err(RunError::validation("tool name must not be empty"));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &NodeContext, node: &Node) -> NodeResult {
        let config: ToolConfig = parse_config(self.kind(), &node.config)?;
        let result = ctx
            .host
            .tools
            .invoke(ctx.tab_id, &config.tool, config.args)
            .await?;

        let mut outputs = JsonMap::new();
        outputs.insert("result".to_string(), result);
        Ok(NodeSuccess {
            outputs,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_requires_tool_name() {
        let node = ToolNode;
        assert!(node
            .validate_config(&json!({"tool": "page.click", "args": {"selector": "#go"}}))
            .is_ok());
        assert!(node.validate_config(&json!({"tool": ""})).is_err());
        assert!(node.validate_config(&json!({})).is_err());
    }
}
