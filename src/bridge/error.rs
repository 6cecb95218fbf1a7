//! Error types for the agent bridge
//!
//! `BridgeError` is `Clone` because one initialization outcome is shared by
//! every caller waiting on it, and one exit reason fails many requests.

use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::io::process::ProcessError;
use crate::rpc::message::RpcErrorObject;

// ============================================================================
// Bridge Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The child could not be launched
    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    /// A request was issued while no child is alive
    #[error("Agent is not running")]
    NotRunning,

    /// Termination escalation failed; nothing will be spawned until dispose
    #[error("Agent process is stuck (pid={pid:?}), SIGTERM/SIGKILL ignored")]
    Stuck { pid: Option<u32> },

    #[error("Request timeout: {method} took longer than {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// Error payload sent by the agent
    #[error("RPC error: {message}")]
    Rpc {
        code: Option<i64>,
        message: String,
        data: Option<Value>,
    },

    /// The child exited while the request was pending
    #[error("Agent exited: {reason}")]
    Exited { reason: String },

    #[error("Bridge disposed")]
    Disposed,

    /// Writing to the child's stdin failed
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The shared initialization task ended without reporting an outcome
    #[error("Initialization abandoned")]
    InitializationAbandoned,
}

impl BridgeError {
    pub fn spawn(error: impl std::fmt::Display) -> Self {
        Self::Spawn(error.to_string())
    }

    pub fn timeout(method: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            method: method.into(),
            timeout,
        }
    }

    pub fn exited(reason: impl Into<String>) -> Self {
        Self::Exited {
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self, Self::Stuck { .. })
    }
}

impl From<RpcErrorObject> for BridgeError {
    fn from(error: RpcErrorObject) -> Self {
        Self::Rpc {
            code: error.code,
            message: error.message,
            data: error.data,
        }
    }
}

impl From<ProcessError> for BridgeError {
    fn from(error: ProcessError) -> Self {
        Self::spawn(error)
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Configuration validation and building errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Missing required configuration field
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// Invalid path format or value
    #[error("Invalid path: {} - {reason}", .path.display())]
    InvalidPath { path: PathBuf, reason: String },

    /// Invalid timeout value
    #[error("Invalid timeout: {timeout:?} - {reason}")]
    InvalidTimeout { timeout: Duration, reason: String },

    /// Invalid client identity or sizing
    #[error("Invalid configuration: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid_path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_timeout(timeout: Duration, reason: impl Into<String>) -> Self {
        Self::InvalidTimeout {
            timeout,
            reason: reason.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}
