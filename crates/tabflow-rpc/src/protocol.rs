//! Wire protocol
//!
//! Framed JSON messages over a port. Clients send requests; the server
//! answers with responses, pushes `event` frames for subscribed runs and
//! acknowledges subscription changes with `subscribeAck`. Errors always
//! cross the channel as `{ok: false, error}` — never as a broken stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use tabflow_core::RunEvent;

/// Frames a client sends to the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientFrame {
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: String,
        method: String,
        #[serde(default)]
        params: Value,
    },
}

/// Frames the server sends to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerFrame {
    #[serde(rename_all = "camelCase")]
    Response {
        request_id: String,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    Event {
        event: RunEvent,
    },

    #[serde(rename_all = "camelCase")]
    SubscribeAck {
        run_id: Option<Uuid>,
    },
}

impl ServerFrame {
    pub fn ok(request_id: impl Into<String>, result: Value) -> Self {
        Self::Response {
            request_id: request_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::Response {
            request_id: request_id.into(),
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_frame_uses_camel_case() {
        let frame: ClientFrame = serde_json::from_value(json!({
            "type": "request",
            "requestId": "r1",
            "method": "listRuns",
            "params": {"limit": 10},
        }))
        .unwrap();
        let ClientFrame::Request { request_id, method, params } = frame;
        assert_eq!(request_id, "r1");
        assert_eq!(method, "listRuns");
        assert_eq!(params["limit"], 10);
    }

    #[test]
    fn response_omits_absent_fields() {
        let ok = serde_json::to_value(ServerFrame::ok("r1", json!({"x": 1}))).unwrap();
        assert_eq!(ok["type"], "response");
        assert_eq!(ok["ok"], true);
        assert!(ok.get("error").is_none());

        let err = serde_json::to_value(ServerFrame::err("r2", "nope")).unwrap();
        assert_eq!(err["ok"], false);
        assert_eq!(err["error"], "nope");
        assert!(err.get("result").is_none());
    }

    #[test]
    fn subscribe_ack_round_trips() {
        let frame = ServerFrame::SubscribeAck { run_id: None };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "subscribeAck");
        let parsed: ServerFrame = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, frame);
    }
}
