//! Configuration for agent bridges
//!
//! Provides BridgeConfig with builder pattern and validation. Everything here
//! is consumed at spawn time, so a bridge picks up the same settings on every
//! restart.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::error::ConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default timeout for the `initialize` handshake (30 seconds)
///
/// Cold starts with a heavy agent configuration or a slow disk can take a
/// while before the first response.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed handshake timeout (5 minutes)
pub const MAX_HANDSHAKE_TIMEOUT_SECS: u64 = 300;

/// Default timeout for ordinary requests (60 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Wait after SIGTERM, and again after SIGKILL, before giving up
pub const DEFAULT_STOP_GRACE_MILLIS: u64 = 1500;

/// Size of the retained stderr tail
pub const DEFAULT_STDERR_TAIL_BYTES: usize = 16_000;

pub const DEFAULT_PROGRAM_NAME: &str = "codex";
pub const DEFAULT_HOME_ENV_VAR: &str = "CODEX_HOME";
pub const DEFAULT_HANDSHAKE_METHOD: &str = "initialize";
pub const DEFAULT_INITIALIZED_NOTIFICATION: &str = "initialized";

// ============================================================================
// Core Configuration Types
// ============================================================================

/// Client identity sent in the handshake as `clientInfo`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub title: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            title: "Agent Bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Handshake performed after every spawn
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Request method, `initialize`
    pub method: String,

    /// Notification sent once the handshake succeeded, `initialized`
    pub initialized_notification: Option<String>,

    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            method: DEFAULT_HANDSHAKE_METHOD.to_string(),
            initialized_notification: Some(DEFAULT_INITIALIZED_NOTIFICATION.to_string()),
            timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Explicit executable path; resolved at spawn time when absent
    pub executable: Option<PathBuf>,

    /// Program name used for bundled lookup, PATH lookup and diagnostics
    pub program_name: String,

    /// Arguments passed to the executable
    pub args: Vec<String>,

    /// Application resources directory holding bundled binaries
    pub resources_dir: Option<PathBuf>,

    /// Working directory for the child; inherits ours when absent
    pub working_directory: Option<PathBuf>,

    /// Agent home directory exported through `home_env_var`
    pub agent_home: Option<PathBuf>,

    pub home_env_var: String,

    pub client_info: ClientInfo,

    pub handshake: HandshakeConfig,

    /// Timeout for `request`; zero disables it
    pub request_timeout: Duration,

    /// How long to wait after SIGTERM
    pub stop_grace: Duration,

    /// How long to wait after SIGKILL
    pub kill_grace: Duration,

    /// Bytes of stderr retained for diagnostics
    pub stderr_tail_bytes: usize,

    /// Spawn through the user's login shell where supported
    pub login_shell: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            program_name: DEFAULT_PROGRAM_NAME.to_string(),
            args: vec!["app-server".to_string()],
            resources_dir: None,
            working_directory: None,
            agent_home: None,
            home_env_var: DEFAULT_HOME_ENV_VAR.to_string(),
            client_info: ClientInfo::default(),
            handshake: HandshakeConfig::default(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MILLIS),
            kill_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MILLIS),
            stderr_tail_bytes: DEFAULT_STDERR_TAIL_BYTES,
            login_shell: true,
        }
    }
}

impl BridgeConfig {
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }

    /// Prefix for diagnostic lines on the stderr event stream, e.g. `[codex]`
    pub fn diagnostic_prefix(&self) -> String {
        format!("[{}]", self.program_name)
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for BridgeConfig with validation and defaults
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to the agent executable
    pub fn executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executable = Some(path.into());
        self
    }

    /// Set the program name (bundled and PATH lookup)
    pub fn program_name(mut self, name: impl Into<String>) -> Self {
        self.config.program_name = name.into();
        self
    }

    /// Replace the executable arguments
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn resources_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.resources_dir = Some(path.into());
        self
    }

    pub fn working_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_directory = Some(path.into());
        self
    }

    /// Set the agent home directory
    pub fn agent_home(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.agent_home = Some(path.into());
        self
    }

    /// Set the variable the agent home is exported through
    pub fn home_env_var(mut self, name: impl Into<String>) -> Self {
        self.config.home_env_var = name.into();
        self
    }

    pub fn client_info(mut self, client_info: ClientInfo) -> Self {
        self.config.client_info = client_info;
        self
    }

    pub fn handshake_method(mut self, method: impl Into<String>) -> Self {
        self.config.handshake.method = method.into();
        self
    }

    /// Set or disable the post-handshake notification
    pub fn initialized_notification(mut self, method: Option<String>) -> Self {
        self.config.handshake.initialized_notification = method;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake.timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set both termination grace periods
    pub fn stop_grace(mut self, term: Duration, kill: Duration) -> Self {
        self.config.stop_grace = term;
        self.config.kill_grace = kill;
        self
    }

    pub fn stderr_tail_bytes(mut self, bytes: usize) -> Self {
        self.config.stderr_tail_bytes = bytes;
        self
    }

    pub fn login_shell(mut self, enabled: bool) -> Self {
        self.config.login_shell = enabled;
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<BridgeConfig, ConfigError> {
        let config = self.config;

        if let Some(working_directory) = &config.working_directory {
            Self::validate_working_directory(working_directory)?;
        }
        Self::validate_program(&config)?;
        Self::validate_timeouts(&config)?;

        if config.client_info.name.is_empty() {
            return Err(ConfigError::missing_field("client_info.name"));
        }
        if config.handshake.method.is_empty() {
            return Err(ConfigError::missing_field("handshake.method"));
        }
        if config.stderr_tail_bytes == 0 {
            return Err(ConfigError::invalid("stderr tail size must be greater than zero"));
        }
        if config.home_env_var.is_empty() || config.home_env_var.contains(['=', '\0']) {
            return Err(ConfigError::invalid(format!(
                "invalid home variable name: {:?}",
                config.home_env_var
            )));
        }

        Ok(config)
    }

    /// Validate working directory exists and is a directory
    fn validate_working_directory(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            return Err(ConfigError::invalid_path(
                path,
                "Working directory does not exist",
            ));
        }

        if !path.is_dir() {
            return Err(ConfigError::invalid_path(
                path,
                "Working directory path is not a directory",
            ));
        }

        Ok(())
    }

    /// Validate program name, executable path and arguments
    fn validate_program(config: &BridgeConfig) -> Result<(), ConfigError> {
        if config.program_name.is_empty() {
            return Err(ConfigError::missing_field("program_name"));
        }

        if let Some(executable) = &config.executable {
            if executable.as_os_str().is_empty() {
                return Err(ConfigError::invalid_path(
                    executable,
                    "Executable path cannot be empty",
                ));
            }
            // Existence is checked at spawn time; it may be installed later
        }

        if config
            .args
            .iter()
            .chain(std::iter::once(&config.program_name))
            .any(|arg| arg.contains('\0'))
        {
            return Err(ConfigError::invalid(
                "Arguments cannot contain null characters",
            ));
        }

        Ok(())
    }

    /// Validate timeout values
    fn validate_timeouts(config: &BridgeConfig) -> Result<(), ConfigError> {
        let handshake = config.handshake.timeout;
        if handshake.is_zero() {
            return Err(ConfigError::invalid_timeout(
                handshake,
                "Handshake timeout must be greater than zero",
            ));
        }

        if handshake > Duration::from_secs(MAX_HANDSHAKE_TIMEOUT_SECS) {
            return Err(ConfigError::invalid_timeout(
                handshake,
                "Handshake timeout too long (max 5 minutes)",
            ));
        }

        for grace in [config.stop_grace, config.kill_grace] {
            if grace.is_zero() {
                return Err(ConfigError::invalid_timeout(
                    grace,
                    "Stop grace period must be greater than zero",
                ));
            }
        }

        Ok(())
    }
}
