//! Supervised JSON-RPC bridge to a long-lived agent process
//!
//! The agent (by default `codex app-server`) speaks line-delimited JSON-RPC
//! over stdio. `Bridge` spawns it lazily, performs the `initialize`
//! handshake, correlates responses with requests and publishes everything
//! else on one ordered event stream.

pub mod bridge;
pub mod io;
pub mod logging;
pub mod rpc;

#[cfg(test)]
mod test_utils;

pub use bridge::{
    Bridge, BridgeConfig, BridgeConfigBuilder, BridgeError, BridgeEvent, ClientInfo, ConfigError,
    ConnectionState,
};
pub use rpc::{RequestId, ResponsePayload};
