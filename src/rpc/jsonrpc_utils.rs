//! JSON-RPC reply helpers
//!
//! Error codes and builders for answering server-initiated requests.

use crate::rpc::message::{ResponsePayload, RpcErrorObject};
use serde_json::{Map, Value};

/// JSON-RPC 2.0 Error Codes
/// https://www.jsonrpc.org/specification#error_object
pub mod error_codes {
    /// Parse error - Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;

    /// Invalid Request - The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;

    /// Method not found - The method does not exist / is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;

    /// Invalid params - Invalid method parameter(s).
    pub const INVALID_PARAMS: i64 = -32602;

    /// Internal error - Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Successful reply; a missing result is sent as an empty object
pub fn success_reply(result: Option<Value>) -> ResponsePayload {
    ResponsePayload::Result(result.unwrap_or_else(|| Value::Object(Map::new())))
}

/// Error reply
pub fn error_reply(code: i64, message: impl Into<String>, data: Option<Value>) -> ResponsePayload {
    ResponsePayload::Error(RpcErrorObject::new(Some(code), message, data))
}

/// "Method not found" reply for server requests nobody handles
pub fn method_not_found_reply(method: &str) -> ResponsePayload {
    error_reply(
        error_codes::METHOD_NOT_FOUND,
        format!("Method not found: {method}"),
        None,
    )
}
