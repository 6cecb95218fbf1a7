use agent_bridge::logging::{LogConfig, init_logging};
use agent_bridge::rpc::method_not_found_reply;
use agent_bridge::{Bridge, BridgeConfig, BridgeError, BridgeEvent, ConfigError};

use clap::Parser;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// CLI arguments for the agent bridge
///
/// Every bridge event is printed to stdout as one JSON line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent executable (overrides AGENT_BRIDGE_EXECUTABLE env var and PATH lookup)
    #[arg(long, value_name = "PATH")]
    executable: Option<PathBuf>,

    /// Working directory for the agent (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Agent home directory, exported to the agent as CODEX_HOME
    #[arg(long, value_name = "DIR")]
    home: Option<PathBuf>,

    /// Handshake timeout in milliseconds
    #[arg(long, value_name = "MS")]
    handshake_timeout_ms: Option<u64>,

    /// Per-request timeout in milliseconds; 0 waits forever
    #[arg(long, value_name = "MS")]
    request_timeout_ms: Option<u64>,

    /// Spawn the agent directly instead of through the login shell
    #[arg(long)]
    no_login_shell: bool,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides AGENT_BRIDGE_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// JSON params for METHOD
    #[arg(long, value_name = "JSON", requires = "method")]
    params: Option<String>,

    /// Request to send once the agent is ready; without it the bridge runs
    /// until Ctrl-C
    #[arg(value_name = "METHOD")]
    method: Option<String>,
}

fn build_config(args: &Args) -> Result<BridgeConfig, ConfigError> {
    let mut builder = BridgeConfig::builder().login_shell(!args.no_login_shell);

    if let Some(executable) = &args.executable {
        builder = builder.executable(executable);
    }
    if let Some(cwd) = &args.cwd {
        builder = builder.working_directory(cwd);
    }
    if let Some(home) = &args.home {
        builder = builder.agent_home(home);
    }
    if let Some(ms) = args.handshake_timeout_ms {
        builder = builder.handshake_timeout(Duration::from_millis(ms));
    }
    if let Some(ms) = args.request_timeout_ms {
        builder = builder.request_timeout(Duration::from_millis(ms));
    }

    builder.build()
}

fn print_event(event: &BridgeEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!("Failed to serialize event: {}", e),
    }
}

/// Print an event; agent requests get a "method not found" answer
async fn handle_event(bridge: &Bridge, event: BridgeEvent) {
    print_event(&event);

    if let BridgeEvent::Request { id, method, .. } = event {
        info!("Declining agent request {} ({})", id, method);
        bridge.respond(id, method_not_found_reply(&method)).await;
    }
}

async fn run(
    bridge: &Bridge,
    method: Option<String>,
    params: Option<Value>,
) -> Result<Option<Value>, BridgeError> {
    bridge.ensure_started().await?;

    match method {
        Some(method) => bridge.request(&method, params).await.map(Some),
        None => {
            info!("Agent ready, press Ctrl-C to stop");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to wait for Ctrl-C: {}", e);
            }
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config = LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());

    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let params = match args.params.as_deref().map(serde_json::from_str::<Value>).transpose() {
        Ok(params) => params,
        Err(e) => {
            eprintln!("Invalid --params JSON: {e}");
            std::process::exit(2);
        }
    };

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    info!(
        "Starting agent bridge for {} {:?}",
        config.program_name, config.args
    );
    let (bridge, mut events) = Bridge::new(config);

    let work = run(&bridge, args.method.clone(), params);
    tokio::pin!(work);

    let outcome = loop {
        tokio::select! {
            outcome = &mut work => break outcome,
            Some(event) = events.recv() => handle_event(&bridge, event).await,
        }
    };

    bridge.dispose().await;
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }

    match outcome {
        Ok(Some(result)) => {
            println!("{}", serde_json::to_string(&json!({"kind": "result", "result": result}))?);
        }
        Ok(None) => {}
        Err(e) => {
            eprintln!("Request failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
