//! Process supervisor and bridge facade
//!
//! `Bridge` keeps one agent child alive behind a stable request/notify API.
//! All mutable state sits in one `SupervisorState` behind one async mutex;
//! caller methods, the stdout dispatcher, the stderr pump, the exit monitor
//! and request timers all go through it.
//!
//! Every spawn bumps a generation counter. Per-child tasks carry the
//! generation they were started for and leave state owned by a newer child
//! alone.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, trace, warn};

use crate::bridge::config::BridgeConfig;
use crate::bridge::error::BridgeError;
use crate::bridge::events::{BridgeEvent, ConnectionState};
use crate::io::environment::{AgentHome, build_child_environment, current_environment};
use crate::io::launch::{
    ExecutableSource, LaunchPlan, LaunchStrategy, ensure_executable_is_runnable,
    resolve_executable,
};
use crate::io::process::{
    ChildProcessLauncher, ExitWatch, ProcessExit, ProcessLauncher, ProcessSignaller, StopSignal,
    wait_for_exit,
};
use crate::io::transport::{StdioTransport, spawn_text_reader};
use crate::rpc::correlator::RequestCorrelator;
use crate::rpc::framing::{DecodeOutput, LineDecoder};
use crate::rpc::message::{
    IncomingMessage, OutgoingNotification, OutgoingRequest, OutgoingResponse, RequestId,
    ResponsePayload, encode_line,
};
use crate::{log_rpc_message, log_timing};

/// How long the exit monitor lets stdout drain before failing pending requests
const STDOUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(100);

/// Outcome of one initialization attempt; `None` while it runs
type InitOutcome = Option<Result<(), BridgeError>>;

/// Live child and the handles needed to talk to and stop it
struct ChildHandle {
    generation: u64,
    pid: Option<u32>,
    transport: StdioTransport,
    signaller: Arc<dyn ProcessSignaller>,
    exit: ExitWatch,
    /// Stops the reader tasks of this child
    cancel: CancellationToken,
}

impl ChildHandle {
    fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }
}

/// The single in-flight initialization
struct InitAttempt {
    id: u64,
    outcome: watch::Receiver<InitOutcome>,
}

struct SupervisorState {
    connection: ConnectionState,
    generation: u64,
    child: Option<ChildHandle>,
    initialized: bool,
    initializing: Option<InitAttempt>,
    next_attempt: u64,
    correlator: RequestCorrelator,
    stderr_tail: String,
    stuck_pid: Option<u32>,
}

impl SupervisorState {
    fn new() -> Self {
        Self {
            connection: ConnectionState::Idle,
            generation: 0,
            child: None,
            initialized: false,
            initializing: None,
            next_attempt: 0,
            correlator: RequestCorrelator::new(),
            stderr_tail: String::new(),
            stuck_pid: None,
        }
    }

    /// The current child if it has not exited
    fn live_child(&self) -> Option<&ChildHandle> {
        self.child.as_ref().filter(|child| child.is_alive())
    }
}

struct BridgeInner {
    config: BridgeConfig,
    launcher: Arc<dyn ProcessLauncher>,
    events: mpsc::UnboundedSender<BridgeEvent>,
    state: Mutex<SupervisorState>,
}

/// Supervised JSON-RPC connection to an agent process
///
/// Cheap to clone; all clones share one child. Dropping the last clone
/// kills a child that is still running.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("program", &self.inner.config.program_name)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Create a bridge that launches real processes
    ///
    /// Nothing is spawned until the first `ensure_started` or `request`.
    pub fn new(config: BridgeConfig) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        Self::with_launcher(config, Arc::new(ChildProcessLauncher::new()))
    }

    pub fn with_launcher(
        config: BridgeConfig,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let bridge = Self {
            inner: Arc::new(BridgeInner {
                config,
                launcher,
                events,
                state: Mutex::new(SupervisorState::new()),
            }),
        };
        (bridge, receiver)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Make sure a child is running and has completed the handshake
    ///
    /// Concurrent callers share one initialization and observe the same
    /// outcome. Once the bridge is stuck this fails without spawning.
    pub async fn ensure_started(&self) -> Result<(), BridgeError> {
        let mut outcome = {
            let mut state = self.inner.state.lock().await;

            if state.connection == ConnectionState::Stuck {
                return Err(BridgeError::Stuck {
                    pid: state.stuck_pid,
                });
            }

            if state.initialized && state.live_child().is_some() {
                // Lets a consumer that lost its view of the status recover it
                self.inner.emit(BridgeEvent::status(ConnectionState::Ready));
                return Ok(());
            }

            let in_flight = state
                .initializing
                .as_ref()
                .map(|attempt| (attempt.id, attempt.outcome.clone()));

            match in_flight {
                Some((attempt_id, outcome)) => {
                    debug!("Joining initialization attempt {}", attempt_id);
                    outcome
                }
                None => {
                    state.next_attempt += 1;
                    let attempt_id = state.next_attempt;
                    let (sender, receiver) = watch::channel(None);
                    state.initializing = Some(InitAttempt {
                        id: attempt_id,
                        outcome: receiver.clone(),
                    });

                    // Runs detached so a cancelled caller cannot abandon the others
                    let inner = Arc::clone(&self.inner);
                    tokio::spawn(async move {
                        let result = inner.run_initialization(attempt_id).await;
                        {
                            let mut state = inner.state.lock().await;
                            if state
                                .initializing
                                .as_ref()
                                .is_some_and(|attempt| attempt.id == attempt_id)
                            {
                                state.initializing = None;
                            }
                        }
                        sender.send_replace(Some(result));
                    });

                    receiver
                }
            }
        };

        if outcome.wait_for(Option::is_some).await.is_err() {
            return Err(BridgeError::InitializationAbandoned);
        }
        let result = outcome.borrow().clone();
        result.unwrap_or(Err(BridgeError::InitializationAbandoned))
    }

    /// Start if needed, then send a request with the configured timeout
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, BridgeError> {
        self.request_with_timeout(method, params, self.inner.config.request_timeout)
            .await
    }

    /// Start if needed, then send a request; a zero timeout waits forever
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.ensure_started().await?;
        self.inner.send_request(method, params, timeout).await
    }

    /// Send a notification; silently dropped when no child is running
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        let state = self.inner.state.lock().await;
        self.inner.write_notification(&state, method, params.as_ref());
    }

    /// Answer an agent-initiated request; silently dropped when no child is
    /// running
    pub async fn respond(&self, id: RequestId, payload: ResponsePayload) {
        let state = self.inner.state.lock().await;
        let Some(child) = state.live_child() else {
            debug!("Dropping response to request {}: agent not running", id);
            return;
        };

        match encode_line(&OutgoingResponse {
            id,
            payload: &payload,
        }) {
            Ok(line) => {
                log_rpc_message!(Level::DEBUG, "outgoing", "response", id);
                if let Err(e) = child.transport.send(line) {
                    debug!("Failed to send response to request {}: {}", id, e);
                }
            }
            Err(e) => warn!("Failed to encode response to request {}: {}", id, e),
        }
    }

    /// Tear down the current child and reset to `idle`
    ///
    /// Rejects every pending request, clears `stuck`, and signals the child
    /// to terminate. An initialization still in flight is abandoned and will
    /// not spawn. The bridge can be started again afterwards.
    pub async fn dispose(&self) {
        let mut state = self.inner.state.lock().await;

        state.generation += 1;
        state.initialized = false;
        state.initializing = None;
        state.stuck_pid = None;

        let flushed = state.correlator.flush_all(&BridgeError::Disposed);
        if flushed > 0 {
            debug!("Dispose rejected {} pending requests", flushed);
        }

        if let Some(mut child) = state.child.take() {
            child.cancel.cancel();
            child.transport.close();
            if child.is_alive() {
                info!("Disposing agent process {:?}", child.pid);
                if let Err(e) = child.signaller.signal(StopSignal::Terminate) {
                    warn!("Failed to terminate agent process {:?}: {}", child.pid, e);
                }
            }
        }

        self.inner
            .set_status(&mut state, ConnectionState::Idle, None);
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.state.lock().await.connection
    }

    /// Pid of the running child
    pub async fn pid(&self) -> Option<u32> {
        self.inner
            .state
            .lock()
            .await
            .live_child()
            .and_then(|child| child.pid)
    }

    /// Most recent stderr output of the current child
    pub async fn stderr_tail(&self) -> String {
        self.inner.state.lock().await.stderr_tail.clone()
    }

    pub async fn pending_requests(&self) -> usize {
        self.inner.state.lock().await.correlator.len()
    }
}

impl BridgeInner {
    fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).is_err() {
            trace!("Bridge: event receiver dropped");
        }
    }

    /// Emit a bracketed diagnostic line on the stderr event stream
    fn diagnostic(&self, message: impl std::fmt::Display) {
        self.emit(BridgeEvent::stderr(format!(
            "{} {}\n",
            self.config.diagnostic_prefix(),
            message
        )));
    }

    fn set_status(
        &self,
        state: &mut SupervisorState,
        status: ConnectionState,
        error: Option<String>,
    ) {
        state.connection = status;
        match &error {
            Some(error) => info!("Bridge status: {} ({})", status, error),
            None => info!("Bridge status: {}", status),
        }
        self.emit(BridgeEvent::Status { status, error });
    }

    // ------------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------------

    async fn run_initialization(self: &Arc<Self>, attempt_id: u64) -> Result<(), BridgeError> {
        let started = Instant::now();
        {
            let mut state = self.state.lock().await;
            self.set_status(&mut state, ConnectionState::Starting, None);
        }

        // A previous child that never became ready must go before a new one
        self.stop_running_process("restart").await?;

        let generation = self.spawn_child(attempt_id).await?;

        let handshake = &self.config.handshake;
        let params = json!({ "clientInfo": self.config.client_info });
        let result = self
            .send_request(&handshake.method, Some(params), handshake.timeout)
            .await;

        let mut state = self.state.lock().await;
        match result {
            Ok(_) => {
                let current = state
                    .live_child()
                    .is_some_and(|child| child.generation == generation);
                if !current {
                    return Err(BridgeError::NotRunning);
                }

                if let Some(method) = &handshake.initialized_notification {
                    self.write_notification(&state, method, None);
                }
                state.initialized = true;
                self.set_status(&mut state, ConnectionState::Ready, None);
                log_timing!(Level::INFO, "initialize", started.elapsed());
                Ok(())
            }
            Err(e) => {
                error!("Agent initialization failed: {}", e);
                if state.generation == generation && state.connection == ConnectionState::Starting
                {
                    self.set_status(&mut state, ConnectionState::Error, Some(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// Launch a new child and wire up its tasks; returns its generation
    ///
    /// The launch itself runs without the state lock. A dispose that lands
    /// meanwhile bumps the generation, and the fresh process is killed.
    async fn spawn_child(self: &Arc<Self>, attempt_id: u64) -> Result<u64, BridgeError> {
        let config = &self.config;
        let parent_env = current_environment();

        let executable = resolve_executable(
            config.executable.as_deref(),
            &parent_env,
            config.resources_dir.as_deref(),
            &config.program_name,
        );
        if executable.source != ExecutableSource::Path
            && let Err(e) = ensure_executable_is_runnable(&executable.program)
        {
            debug!(
                "Could not check permissions of {}: {}",
                executable.program.display(),
                e
            );
        }
        debug!(
            "Using agent executable {} ({:?})",
            executable.program.display(),
            executable.source
        );

        let agent_home = config.agent_home.as_ref().map(|directory| AgentHome {
            variable: config.home_env_var.clone(),
            directory: directory.clone(),
        });
        let env = build_child_environment(&parent_env, agent_home.as_ref());
        let plan = LaunchPlan::new(
            executable.program,
            config.args.clone(),
            config.working_directory.clone(),
            env,
            config.login_shell,
        );

        let generation = {
            let mut state = self.state.lock().await;

            let current = state
                .initializing
                .as_ref()
                .is_some_and(|attempt| attempt.id == attempt_id);
            if !current {
                debug!("Initialization attempt {} was disposed, not spawning", attempt_id);
                return Err(BridgeError::Disposed);
            }

            if let Some(running) = state.live_child() {
                let error = BridgeError::spawn(format!(
                    "previous agent process {:?} is still running",
                    running.pid
                ));
                error!("Refusing to launch agent: {}", error);
                self.set_status(&mut state, ConnectionState::Error, Some(error.to_string()));
                return Err(error);
            }

            // Exited child whose monitor has not run yet
            if let Some(previous) = state.child.take() {
                previous.cancel.cancel();
                state.correlator.flush_generation(
                    previous.generation,
                    &BridgeError::exited("replaced by a new process"),
                );
            }

            state.generation += 1;
            state.initialized = false;
            state.stderr_tail.clear();

            self.diagnostic(format!(
                "{}={}",
                config.home_env_var,
                config
                    .agent_home
                    .as_ref()
                    .map_or_else(|| "(default)".to_string(), |home| home.display().to_string())
            ));
            if let LaunchStrategy::LoginShell { .. } = plan.strategy {
                self.diagnostic(format!("spawning via login shell: {}", plan.describe()));
            }

            state.generation
        };

        let launched = self.launcher.launch(&plan).await;

        let mut state = self.state.lock().await;
        let process = match launched {
            Ok(process) => process,
            Err(e) => {
                let error = BridgeError::from(e);
                error!("Failed to launch agent: {}", error);
                if state.generation == generation {
                    self.set_status(&mut state, ConnectionState::Error, Some(error.to_string()));
                }
                return Err(error);
            }
        };

        if state.generation != generation {
            info!(
                "Bridge disposed during launch, killing agent process {:?}",
                process.pid
            );
            if let Err(e) = process.signaller.signal(StopSignal::Kill) {
                warn!("Failed to kill agent process {:?}: {}", process.pid, e);
            }
            return Err(BridgeError::Disposed);
        }

        info!(
            "Agent process started (generation {}, pid {:?})",
            generation, process.pid
        );

        let cancel = CancellationToken::new();
        let (stdout_done, stdout_drained) = oneshot::channel();
        let weak = Arc::downgrade(self);

        tokio::spawn(Self::stdout_task(
            weak.clone(),
            generation,
            spawn_text_reader(process.stdout, "stdout"),
            cancel.clone(),
            stdout_done,
        ));
        tokio::spawn(Self::stderr_task(
            weak.clone(),
            generation,
            spawn_text_reader(process.stderr, "stderr"),
            cancel.clone(),
        ));
        tokio::spawn(Self::exit_task(
            weak,
            generation,
            process.exit.clone(),
            cancel.clone(),
            stdout_drained,
        ));

        state.child = Some(ChildHandle {
            generation,
            pid: process.pid,
            transport: StdioTransport::new(process.stdin),
            signaller: process.signaller,
            exit: process.exit,
            cancel,
        });

        Ok(generation)
    }

    // ------------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------------

    /// SIGTERM, wait, SIGKILL, wait; enter `stuck` if the child survives both
    ///
    /// A child that was disposed or replaced while this ran does not make the
    /// bridge `stuck`; the caller gets `Disposed` instead.
    async fn stop_running_process(&self, reason: &str) -> Result<(), BridgeError> {
        let (generation, pid, signaller, mut exit) = {
            let state = self.state.lock().await;
            match state.live_child() {
                Some(child) => (
                    child.generation,
                    child.pid,
                    Arc::clone(&child.signaller),
                    child.exit.clone(),
                ),
                None => return Ok(()),
            }
        };

        let pid_text = pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string());
        self.diagnostic(format!(
            "stopping {} ({}) pid={}",
            self.config.program_name, reason, pid_text
        ));

        for (signal, grace) in [
            (StopSignal::Terminate, self.config.stop_grace),
            (StopSignal::Kill, self.config.kill_grace),
        ] {
            if let Err(e) = signaller.signal(signal) {
                warn!("Failed to send {:?} to agent process {}: {}", signal, pid_text, e);
            }
            if wait_for_exit(&mut exit, grace).await.is_some() {
                return Ok(());
            }
        }

        // Spawning a replacement now would leak one wedged process per retry
        let message = format!("{}_stuck:pid={}", self.config.program_name, pid_text);
        error!("Agent process {} ignored SIGTERM and SIGKILL", pid_text);

        let mut state = self.state.lock().await;
        self.diagnostic(format!("{message} (SIGTERM/SIGKILL ignored)"));
        if state.generation != generation {
            warn!(
                "Agent process {} is no longer current, leaving bridge status {}",
                pid_text, state.connection
            );
            return Err(BridgeError::Disposed);
        }
        state.stuck_pid = pid;
        self.set_status(&mut state, ConnectionState::Stuck, Some(message));
        Err(BridgeError::Stuck { pid })
    }

    // ------------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------------

    async fn send_request(
        self: &Arc<Self>,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        let receiver = {
            let mut state = self.state.lock().await;
            let generation = state
                .live_child()
                .map(|child| child.generation)
                .ok_or(BridgeError::NotRunning)?;

            let id = state.correlator.next_id();
            let line = encode_line(&OutgoingRequest {
                id,
                method,
                params: params.as_ref(),
            })?;

            log_rpc_message!(Level::DEBUG, "outgoing", method, id);
            if let Some(child) = &state.child {
                child
                    .transport
                    .send(line)
                    .map_err(|e| BridgeError::Write(e.to_string()))?;
            }

            let timer = (!timeout.is_zero()).then(|| {
                tokio::spawn(Self::request_timer(
                    Arc::downgrade(self),
                    id,
                    method.to_string(),
                    timeout,
                ))
            });

            state.correlator.register(id, method, generation, timer)
        };

        receiver.await.unwrap_or(Err(BridgeError::Disposed))
    }

    fn write_notification(&self, state: &SupervisorState, method: &str, params: Option<&Value>) {
        let Some(child) = state.live_child() else {
            debug!("Dropping notification {}: agent not running", method);
            return;
        };

        match encode_line(&OutgoingNotification { method, params }) {
            Ok(line) => {
                log_rpc_message!(Level::DEBUG, "outgoing", method, params);
                if let Err(e) = child.transport.send(line) {
                    debug!("Failed to send notification {}: {}", method, e);
                }
            }
            Err(e) => warn!("Failed to encode notification {}: {}", method, e),
        }
    }

    async fn request_timer(weak: Weak<Self>, id: RequestId, method: String, timeout: Duration) {
        tokio::time::sleep(timeout).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };

        let expired = {
            let mut state = inner.state.lock().await;
            state
                .correlator
                .expire(id, BridgeError::timeout(&method, timeout))
        };

        if expired.is_none() {
            return;
        }
        warn!("Request {} ({}) timed out after {:?}", id, method, timeout);

        // An agent that cannot answer the handshake is unhealthy; clear the
        // way for the next attempt
        if method == inner.config.handshake.method {
            tokio::spawn(async move {
                if let Err(e) = inner.stop_running_process("initialize_timeout").await {
                    warn!("Stopping agent after handshake timeout failed: {}", e);
                }
            });
        }
    }

    // ------------------------------------------------------------------------
    // Per-child tasks
    // ------------------------------------------------------------------------

    async fn stdout_task(
        weak: Weak<Self>,
        generation: u64,
        mut chunks: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
        _done: oneshot::Sender<()>,
    ) {
        let mut decoder = LineDecoder::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            let output = decoder.feed(&chunk);
            if output.is_empty() {
                continue;
            }

            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.dispatch(generation, output).await;
        }

        if decoder.pending_len() > 0 {
            debug!(
                "Discarding {} bytes of unterminated stdout (generation {})",
                decoder.pending_len(),
                generation
            );
        }
        trace!("Bridge: stdout task finished (generation {})", generation);
    }

    async fn dispatch(&self, generation: u64, output: DecodeOutput) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            trace!("Ignoring output of stale generation {}", generation);
            return;
        }

        for error in output.errors {
            warn!("Failed to parse agent output: {}", error);
            self.diagnostic(format!("failed to parse JSONL: {error}"));
        }

        for value in output.messages {
            match IncomingMessage::classify(value) {
                Some(IncomingMessage::Response { id, outcome }) => {
                    log_rpc_message!(Level::DEBUG, "incoming", "response", id);
                    if !state.correlator.settle(id, outcome.map_err(BridgeError::from)) {
                        debug!("Dropping response for unknown request {}", id);
                    }
                }
                Some(IncomingMessage::Request { id, method, params }) => {
                    log_rpc_message!(Level::DEBUG, "incoming", method.as_str(), id);
                    self.emit(BridgeEvent::Request { id, method, params });
                }
                Some(IncomingMessage::Notification { method, params }) => {
                    log_rpc_message!(Level::TRACE, "incoming", method.as_str(), params);
                    self.emit(BridgeEvent::Notification { method, params });
                }
                None => debug!("Dropping unclassifiable message from agent"),
            }
        }
    }

    async fn stderr_task(
        weak: Weak<Self>,
        generation: u64,
        mut chunks: mpsc::UnboundedReceiver<String>,
        cancel: CancellationToken,
    ) {
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => break,
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let mut state = inner.state.lock().await;
            if state.generation == generation {
                let limit = inner.config.stderr_tail_bytes;
                push_tail(&mut state.stderr_tail, &chunk, limit);
            }
            trace!("Agent stderr: {}", chunk.trim_end());
            inner.emit(BridgeEvent::Stderr { text: chunk });
        }

        trace!("Bridge: stderr task finished (generation {})", generation);
    }

    async fn exit_task(
        weak: Weak<Self>,
        generation: u64,
        mut exit_watch: ExitWatch,
        cancel: CancellationToken,
        stdout_drained: oneshot::Receiver<()>,
    ) {
        let observed = tokio::select! {
            _ = cancel.cancelled() => return,
            result = exit_watch.wait_for(Option::is_some) => match result {
                Ok(current) => (*current).clone(),
                Err(_) => None,
            },
        };
        let exit = observed
            .unwrap_or_else(|| ProcessExit::WaitFailed("exit status unavailable".to_string()));

        // Responses written just before exit still count
        let _ = tokio::time::timeout(STDOUT_DRAIN_TIMEOUT, stdout_drained).await;

        let Some(inner) = weak.upgrade() else {
            return;
        };
        let reason = exit.to_string();
        info!("Agent process exited (generation {}): {}", generation, reason);

        let mut state = inner.state.lock().await;
        state
            .correlator
            .flush_generation(generation, &BridgeError::exited(&reason));

        let current = state
            .child
            .as_ref()
            .is_some_and(|child| child.generation == generation);
        if !current {
            return;
        }

        if let Some(child) = state.child.take() {
            child.cancel.cancel();
        }
        state.initialized = false;

        if state.connection != ConnectionState::Stuck {
            let status = if exit.is_failure() {
                ConnectionState::Error
            } else {
                ConnectionState::Exited
            };
            inner.set_status(&mut state, status, Some(reason));
        }
    }
}

impl Drop for BridgeInner {
    fn drop(&mut self) {
        if let Some(child) = self.state.get_mut().child.take() {
            child.cancel.cancel();
            if child.is_alive() {
                info!("Bridge dropped, killing agent process {:?}", child.pid);
                if let Err(e) = child.signaller.signal(StopSignal::Kill) {
                    warn!("Failed to kill agent process {:?}: {}", child.pid, e);
                }
            }
        }
    }
}

/// Append to a bounded tail, cutting on a character boundary
fn push_tail(tail: &mut String, chunk: &str, limit: usize) {
    tail.push_str(chunk);
    if tail.len() > limit {
        let mut cut = tail.len() - limit;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}
