//! I/O layer - process launching and stdio plumbing
//!
//! Nothing here knows about JSON-RPC:
//!
//! - **Environment**: child environment built from a parent snapshot
//! - **Launch**: executable resolution and direct vs login-shell spawning
//! - **Process**: spawning, exit reporting and stop signals
//! - **Transport**: stdin writer and UTF-8 safe stdout/stderr readers

pub mod environment;
pub mod launch;
pub mod process;
pub mod transport;

// Re-export main types for convenience
pub use environment::{AgentHome, build_child_environment, current_environment};
pub use launch::{
    EXECUTABLE_OVERRIDE_VAR, ExecutableSource, LaunchPlan, LaunchStrategy, ResolvedExecutable,
    resolve_executable,
};
pub use process::{
    AgentProcess, ChildProcessLauncher, ExitWatch, ProcessError, ProcessExit, ProcessLauncher,
    ProcessSignaller, StopSignal, wait_for_exit,
};
pub use transport::{StdioTransport, TransportError, spawn_text_reader};
