//! Events published by a bridge

use crate::rpc::message::RequestId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Connection lifecycle
///
/// `Stuck` is absorbing: only `dispose` leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Starting,
    Ready,
    Exited,
    Error,
    Stuck,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Starting => "starting",
            ConnectionState::Ready => "ready",
            ConnectionState::Exited => "exited",
            ConnectionState::Error => "error",
            ConnectionState::Stuck => "stuck",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry on the bridge's ordered event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BridgeEvent {
    /// Notification from the agent
    Notification {
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// Agent-initiated request; answer it with `Bridge::respond`
    Request {
        id: RequestId,
        method: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },

    /// Raw stderr text or a bridge diagnostic line
    Stderr { text: String },

    Status {
        status: ConnectionState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BridgeEvent {
    pub fn status(status: ConnectionState) -> Self {
        BridgeEvent::Status {
            status,
            error: None,
        }
    }

    pub fn status_with_error(status: ConnectionState, error: impl Into<String>) -> Self {
        BridgeEvent::Status {
            status,
            error: Some(error.into()),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        BridgeEvent::Stderr { text: text.into() }
    }
}
