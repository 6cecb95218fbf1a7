//! Bridge layer - supervised agent connection
//!
//! - **config**: validated bridge configuration and builder
//! - **error**: bridge and configuration errors
//! - **events**: connection states and the event stream payloads
//! - **supervisor**: the `Bridge` facade that owns the child process

pub mod config;
pub mod error;
pub mod events;
pub mod supervisor;

pub use config::{BridgeConfig, BridgeConfigBuilder, ClientInfo, HandshakeConfig};
pub use error::{BridgeError, ConfigError};
pub use events::{BridgeEvent, ConnectionState};
pub use supervisor::Bridge;
