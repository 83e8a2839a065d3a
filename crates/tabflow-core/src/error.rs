//! Tagged run errors
//!
//! Every failure the engine surfaces to callers is a [`RunError`]: a stable
//! code, a human-readable message, optional structured data, a retryability
//! hint and an optional cause chain. Errors serialize as plain JSON so they
//! can cross the RPC channel and be stored on run records verbatim.

use serde::{Deserialize, Serialize};

/// Stable error codes
///
/// Codes are grouped into validation, runtime, tooling, control and
/// internal buckets. The wire form is SCREAMING_SNAKE_CASE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationError,
    UnsupportedNode,
    DagInvalid,
    DagCycle,
    DagExecutionFailed,

    // Runtime
    Timeout,
    TabNotFound,
    FrameNotFound,
    TargetNotFound,
    ElementNotVisible,
    NavigationFailed,
    NetworkRequestFailed,

    // Tooling
    ScriptFailed,
    PermissionDenied,
    ToolError,

    // Control
    RunCanceled,
    RunPaused,

    // Internal
    Internal,
    InvariantViolation,
}

impl ErrorCode {
    /// Whether errors with this code are retryable unless stated otherwise
    pub fn default_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ElementNotVisible
                | Self::NavigationFailed
                | Self::NetworkRequestFailed
                | Self::ToolError
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Reuse the serde rename so logs and wire agree
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| format!("{self:?}"));
        write!(f, "{s}")
    }
}

/// A tagged error value
///
/// `cause` chains wrap lower-level failures; `data` carries structured
/// diagnostics such as the offending cycle path for `DAG_CYCLE`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RunError {
    pub code: ErrorCode,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(default)]
    pub retryable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[source]
    pub cause: Option<Box<RunError>>,
}

impl RunError {
    /// Create an error with the code's default retryability
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            retryable: code.default_retryable(),
            cause: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvariantViolation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    pub fn canceled(reason: Option<&str>) -> Self {
        Self::new(
            ErrorCode::RunCanceled,
            reason.map(str::to_owned).unwrap_or_else(|| "run canceled".to_string()),
        )
    }

    /// Attach structured diagnostic data
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Override the retryability hint
    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Chain an underlying cause
    pub fn with_cause(mut self, cause: RunError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Wrap an arbitrary failure as `INTERNAL`, preserving it as the cause
    pub fn wrap_internal(message: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::internal(message).with_cause(RunError::internal(cause.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn code_wire_format_is_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::DagCycle).unwrap();
        assert_eq!(json, "\"DAG_CYCLE\"");

        let parsed: ErrorCode = serde_json::from_str("\"TOOL_ERROR\"").unwrap();
        assert_eq!(parsed, ErrorCode::ToolError);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = RunError::new(ErrorCode::Timeout, "attempt exceeded 5000ms");
        assert_eq!(err.to_string(), "TIMEOUT: attempt exceeded 5000ms");
    }

    #[test]
    fn default_retryability_follows_code() {
        assert!(RunError::new(ErrorCode::ToolError, "x").retryable);
        assert!(!RunError::validation("x").retryable);
    }

    #[test]
    fn cause_chain_round_trips() {
        let err = RunError::internal("append failed")
            .with_cause(RunError::new(ErrorCode::NetworkRequestFailed, "socket closed"))
            .with_data(json!({"op": "append"}));

        let json = serde_json::to_string(&err).unwrap();
        let parsed: RunError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, parsed);
        assert_eq!(parsed.cause.unwrap().code, ErrorCode::NetworkRequestFailed);
    }

    #[test]
    fn error_source_walks_cause() {
        use std::error::Error;
        let err = RunError::internal("outer").with_cause(RunError::timeout("inner"));
        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "TIMEOUT: inner");
    }
}
