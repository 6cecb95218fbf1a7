//! JSON-RPC message shapes
//!
//! Classifies decoded values into responses, server-initiated requests and
//! notifications, and defines the outbound wire shapes. The agent speaks a
//! JSON-RPC dialect without the `jsonrpc` version member, and ids are
//! integers only.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request identifier issued by the correlator
pub type RequestId = i64;

/// Message used when an error payload carries no usable message
pub const FALLBACK_ERROR_MESSAGE: &str = "rpc_error";

// ============================================================================
// Inbound
// ============================================================================

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    /// Error message
    pub message: String,

    /// Optional additional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    pub fn new(code: Option<i64>, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    /// Lenient extraction from whatever the agent put in `error`
    fn from_payload(payload: &Value) -> Self {
        let message = payload
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .unwrap_or(FALLBACK_ERROR_MESSAGE);

        Self {
            code: payload.get("code").and_then(Value::as_i64),
            message: message.to_string(),
            data: payload.get("data").cloned(),
        }
    }
}

/// A classified inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Reply to one of our requests
    Response {
        id: RequestId,
        outcome: Result<Value, RpcErrorObject>,
    },

    /// Server-initiated request that expects a `respond` call
    Request {
        id: RequestId,
        method: String,
        params: Option<Value>,
    },

    /// Fire-and-forget message from the server
    Notification {
        method: String,
        params: Option<Value>,
    },
}

impl IncomingMessage {
    /// Classify a decoded value
    ///
    /// Returns `None` for values that match none of the three shapes. An `id`
    /// that is not an integer is treated as absent.
    pub fn classify(value: Value) -> Option<Self> {
        let Value::Object(mut object) = value else {
            return None;
        };

        let id = object.get("id").and_then(Value::as_i64);
        let method = match object.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };

        if let Some(id) = id
            && (object.contains_key("result") || object.contains_key("error"))
        {
            return Some(IncomingMessage::Response {
                id,
                outcome: response_outcome(&mut object),
            });
        }

        let method = method?;
        let params = object.remove("params");

        Some(match id {
            Some(id) => IncomingMessage::Request { id, method, params },
            None => IncomingMessage::Notification { method, params },
        })
    }
}

/// A present, non-null `error` wins; otherwise the `result` (null when absent)
fn response_outcome(object: &mut Map<String, Value>) -> Result<Value, RpcErrorObject> {
    match object.get("error") {
        Some(Value::Null) | Some(Value::Bool(false)) | None => {
            Ok(object.remove("result").unwrap_or(Value::Null))
        }
        Some(payload) => Err(RpcErrorObject::from_payload(payload)),
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Outbound request: `{"id", "method", "params"?}`
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingRequest<'a> {
    pub id: RequestId,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

/// Outbound notification: `{"method", "params"?}`
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingNotification<'a> {
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

/// Body of a response to a server-initiated request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcErrorObject),
}

/// Outbound response: `{"id", "result"}` or `{"id", "error"}`
#[derive(Debug, Clone, Serialize)]
pub struct OutgoingResponse<'a> {
    pub id: RequestId,
    #[serde(flatten)]
    pub payload: &'a ResponsePayload,
}

/// Serialize an outbound message as one wire line, newline included
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_success_response() {
        let message = IncomingMessage::classify(json!({"id": 3, "result": {"ok": true}}));
        assert_eq!(
            message,
            Some(IncomingMessage::Response {
                id: 3,
                outcome: Ok(json!({"ok": true}))
            })
        );
    }

    #[test]
    fn test_classify_error_response() {
        let message = IncomingMessage::classify(json!({
            "id": 4,
            "error": {"code": -32000, "message": "boom", "data": {"hint": 1}}
        }));
        assert_eq!(
            message,
            Some(IncomingMessage::Response {
                id: 4,
                outcome: Err(RpcErrorObject::new(
                    Some(-32000),
                    "boom",
                    Some(json!({"hint": 1}))
                ))
            })
        );
    }

    #[test]
    fn test_error_without_message_uses_fallback() {
        let Some(IncomingMessage::Response { outcome, .. }) =
            IncomingMessage::classify(json!({"id": 1, "error": {"code": 5}}))
        else {
            panic!("expected response");
        };
        assert_eq!(outcome.unwrap_err().message, FALLBACK_ERROR_MESSAGE);

        let Some(IncomingMessage::Response { outcome, .. }) =
            IncomingMessage::classify(json!({"id": 1, "error": "flat string"}))
        else {
            panic!("expected response");
        };
        assert_eq!(outcome.unwrap_err().message, FALLBACK_ERROR_MESSAGE);
    }

    #[test]
    fn test_null_error_resolves_with_result() {
        let message = IncomingMessage::classify(json!({"id": 2, "error": null, "result": 5}));
        assert_eq!(
            message,
            Some(IncomingMessage::Response {
                id: 2,
                outcome: Ok(json!(5))
            })
        );

        let message = IncomingMessage::classify(json!({"id": 2, "error": null}));
        assert_eq!(
            message,
            Some(IncomingMessage::Response {
                id: 2,
                outcome: Ok(Value::Null)
            })
        );
    }

    #[test]
    fn test_classify_server_request() {
        let message = IncomingMessage::classify(json!({
            "id": 9,
            "method": "item/commandExecution/requestApproval",
            "params": {"command": "ls"}
        }));
        assert_eq!(
            message,
            Some(IncomingMessage::Request {
                id: 9,
                method: "item/commandExecution/requestApproval".to_string(),
                params: Some(json!({"command": "ls"}))
            })
        );
    }

    #[test]
    fn test_classify_notification() {
        let message = IncomingMessage::classify(json!({"method": "turn/completed"}));
        assert_eq!(
            message,
            Some(IncomingMessage::Notification {
                method: "turn/completed".to_string(),
                params: None
            })
        );
    }

    #[test]
    fn test_non_integer_id_is_treated_as_absent() {
        let message = IncomingMessage::classify(json!({"id": "abc", "method": "m", "params": []}));
        assert_eq!(
            message,
            Some(IncomingMessage::Notification {
                method: "m".to_string(),
                params: Some(json!([]))
            })
        );

        // a string id with a result is not a response we could correlate
        assert_eq!(
            IncomingMessage::classify(json!({"id": "abc", "result": 1})),
            None
        );
    }

    #[test]
    fn test_unclassifiable_values_are_dropped() {
        assert_eq!(IncomingMessage::classify(json!(42)), None);
        assert_eq!(IncomingMessage::classify(json!([1, 2])), None);
        assert_eq!(IncomingMessage::classify(json!({"id": 1})), None);
        assert_eq!(IncomingMessage::classify(json!({"method": 5})), None);
    }

    #[test]
    fn test_response_wins_over_method() {
        let message = IncomingMessage::classify(json!({"id": 1, "method": "m", "result": {}}));
        assert!(matches!(message, Some(IncomingMessage::Response { id: 1, .. })));
    }

    #[test]
    fn test_outgoing_request_shape() {
        let params = json!({"clientInfo": {"name": "bridge"}});
        let line = encode_line(&OutgoingRequest {
            id: 1,
            method: "initialize",
            params: Some(&params),
        })
        .unwrap();
        assert_eq!(
            line,
            "{\"id\":1,\"method\":\"initialize\",\"params\":{\"clientInfo\":{\"name\":\"bridge\"}}}\n"
        );

        let line = encode_line(&OutgoingRequest {
            id: 2,
            method: "thread/list",
            params: None,
        })
        .unwrap();
        assert_eq!(line, "{\"id\":2,\"method\":\"thread/list\"}\n");
    }

    #[test]
    fn test_outgoing_notification_shape() {
        let line = encode_line(&OutgoingNotification {
            method: "initialized",
            params: None,
        })
        .unwrap();
        assert_eq!(line, "{\"method\":\"initialized\"}\n");
    }

    #[test]
    fn test_outgoing_response_shapes() {
        let payload = ResponsePayload::Result(json!({"decision": "accept"}));
        let line = encode_line(&OutgoingResponse {
            id: 5,
            payload: &payload,
        })
        .unwrap();
        assert_eq!(line, "{\"id\":5,\"result\":{\"decision\":\"accept\"}}\n");

        let payload = ResponsePayload::Error(RpcErrorObject::new(None, "denied", None));
        let line = encode_line(&OutgoingResponse {
            id: 6,
            payload: &payload,
        })
        .unwrap();
        assert_eq!(line, "{\"id\":6,\"error\":{\"message\":\"denied\"}}\n");
    }
}
