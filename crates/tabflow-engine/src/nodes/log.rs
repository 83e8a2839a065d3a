//! `log` node: appends a message to the run's event log

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use tabflow_core::{LogLevel, Node, RunError};

use crate::registry::{parse_config, NodeContext, NodeExecutor, NodeLog, NodeResult, NodeSuccess};

#[derive(Debug, Deserialize)]
struct LogConfig {
    msg: String,

    #[serde(default = "default_level")]
    level: LogLevel,
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

pub struct LogNode;

#[async_trait]
impl NodeExecutor for LogNode {
    fn kind(&self) -> &str {
        "log"
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), RunError> {
        parse_config::<LogConfig>(self.kind(), config).map(|_| ())
    }

    async fn execute(&self, ctx: &NodeContext, node: &Node) -> NodeResult {
        let config: LogConfig = parse_config(self.kind(), &node.config)?;
        info!(run_id = %ctx.run_id, node_id = %node.id, "{}", config.msg);

        // The message belongs on the run's own event log, where
        // subscribers and getEvents can see it
        Ok(NodeSuccess {
            logs: vec![NodeLog {
                level: config.level,
                message: config.msg,
                data: None,
            }],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tabflow_core::ErrorCode;

    #[test]
    fn config_requires_msg() {
        let node = LogNode;
        assert!(node.validate_config(&json!({"msg": "hi"})).is_ok());
        assert!(node
            .validate_config(&json!({"msg": "hi", "level": "warn"}))
            .is_ok());
        let err = node.validate_config(&json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationError);
    }

    #[test]
    fn level_defaults_to_info() {
        let config: LogConfig = serde_json::from_value(json!({"msg": "x"})).unwrap();
        assert!(matches!(config.level, LogLevel::Info));

        let config: LogConfig =
            serde_json::from_value(json!({"msg": "x", "level": "error"})).unwrap();
        assert!(matches!(config.level, LogLevel::Error));
    }
}
