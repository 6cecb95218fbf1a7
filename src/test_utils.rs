//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and an in-memory agent
//! that stands in for a real child process.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG`, defaulting to debug for this crate and info for
    /// tokio.
    ///
    /// ```bash
    /// RUST_LOG=agent_bridge=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,tokio=info"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok();
        });
    }
}

/// Set up logging for every test in the invoking module
#[cfg(all(test, feature = "test-logging"))]
#[macro_export]
macro_rules! setup_test_logging {
    () => {
        #[ctor::ctor]
        fn init_test_logging() {
            $crate::test_utils::logging::init();
        }
    };
}

/// In-memory agent processes driven by the test
pub mod mock_agent {
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tokio::io::{
        AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, duplex,
    };
    use tokio::sync::{Notify, mpsc, watch};

    use crate::io::launch::LaunchPlan;
    use crate::io::process::{
        AgentProcess, ProcessError, ProcessExit, ProcessLauncher, ProcessSignaller, StopSignal,
    };

    const PIPE_CAPACITY: usize = 64 * 1024;
    const READ_TIMEOUT: Duration = Duration::from_secs(5);

    /// How a mock agent reacts to stop signals
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum SignalBehaviour {
        /// Exits on SIGTERM
        ExitOnSignal,
        /// Survives SIGTERM, dies on SIGKILL
        IgnoreTerminate,
        /// Survives both
        IgnoreAll,
    }

    #[derive(Default)]
    struct LauncherRecord {
        launches: usize,
        plans: Vec<LaunchPlan>,
        signals: Vec<StopSignal>,
        fail_next: Option<String>,
        hold_next: Option<Arc<Notify>>,
    }

    /// `ProcessLauncher` that hands every launched agent to the test
    pub struct MockProcessLauncher {
        behaviour: SignalBehaviour,
        record: Arc<Mutex<LauncherRecord>>,
        agents: mpsc::UnboundedSender<MockAgent>,
    }

    impl MockProcessLauncher {
        pub fn new(behaviour: SignalBehaviour) -> (Arc<Self>, mpsc::UnboundedReceiver<MockAgent>) {
            let (agents, receiver) = mpsc::unbounded_channel();
            let launcher = Arc::new(Self {
                behaviour,
                record: Arc::new(Mutex::new(LauncherRecord::default())),
                agents,
            });
            (launcher, receiver)
        }

        pub fn launch_count(&self) -> usize {
            self.record.lock().unwrap().launches
        }

        pub fn plans(&self) -> Vec<LaunchPlan> {
            self.record.lock().unwrap().plans.clone()
        }

        /// Signals delivered to any agent of this launcher, in order
        pub fn signals(&self) -> Vec<StopSignal> {
            self.record.lock().unwrap().signals.clone()
        }

        pub fn fail_next_launch(&self, message: &str) {
            self.record.lock().unwrap().fail_next = Some(message.to_string());
        }

        /// Park the next launch after it is counted until the gate is notified
        pub fn hold_next_launch(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            self.record.lock().unwrap().hold_next = Some(Arc::clone(&gate));
            gate
        }
    }

    #[async_trait]
    impl ProcessLauncher for MockProcessLauncher {
        async fn launch(&self, plan: &LaunchPlan) -> Result<AgentProcess, ProcessError> {
            let (pid, hold) = {
                let mut record = self.record.lock().unwrap();
                record.launches += 1;
                record.plans.push(plan.clone());
                if let Some(message) = record.fail_next.take() {
                    return Err(ProcessError::Spawn {
                        program: plan.program.clone(),
                        source: io::Error::new(io::ErrorKind::NotFound, message),
                    });
                }
                (10_000 + record.launches as u32, record.hold_next.take())
            };
            if let Some(gate) = hold {
                gate.notified().await;
            }

            let (bridge_stdin, agent_stdin) = duplex(PIPE_CAPACITY);
            let (agent_stdout, bridge_stdout) = duplex(PIPE_CAPACITY);
            let (agent_stderr, bridge_stderr) = duplex(PIPE_CAPACITY);
            let (exit_sender, exit) = watch::channel(None);
            let exit_sender = Arc::new(exit_sender);

            let agent = MockAgent {
                pid,
                stdin: BufReader::new(agent_stdin).lines(),
                stdout: Some(agent_stdout),
                stderr: Some(agent_stderr),
                exit: Arc::clone(&exit_sender),
            };
            let _ = self.agents.send(agent);

            Ok(AgentProcess {
                pid: Some(pid),
                stdin: Box::new(bridge_stdin),
                stdout: Box::new(bridge_stdout),
                stderr: Box::new(bridge_stderr),
                exit,
                signaller: Arc::new(MockSignaller {
                    behaviour: self.behaviour,
                    exit: exit_sender,
                    record: Arc::clone(&self.record),
                }),
            })
        }
    }

    struct MockSignaller {
        behaviour: SignalBehaviour,
        exit: Arc<watch::Sender<Option<ProcessExit>>>,
        record: Arc<Mutex<LauncherRecord>>,
    }

    impl ProcessSignaller for MockSignaller {
        fn signal(&self, signal: StopSignal) -> Result<(), ProcessError> {
            self.record.lock().unwrap().signals.push(signal);

            let dies = match (self.behaviour, signal) {
                (SignalBehaviour::ExitOnSignal, _) => true,
                (SignalBehaviour::IgnoreTerminate, StopSignal::Kill) => true,
                _ => false,
            };
            if dies && self.exit.borrow().is_none() {
                let number = match signal {
                    StopSignal::Terminate => 15,
                    StopSignal::Kill => 9,
                };
                self.exit.send_replace(Some(ProcessExit::Exited {
                    code: None,
                    signal: Some(number),
                }));
            }
            Ok(())
        }
    }

    /// The agent end of a mock child's pipes
    pub struct MockAgent {
        pub pid: u32,
        stdin: Lines<BufReader<DuplexStream>>,
        stdout: Option<DuplexStream>,
        stderr: Option<DuplexStream>,
        exit: Arc<watch::Sender<Option<ProcessExit>>>,
    }

    impl MockAgent {
        /// Next line the bridge wrote, parsed as JSON
        pub async fn read_message(&mut self) -> Value {
            let line = tokio::time::timeout(READ_TIMEOUT, self.stdin.next_line())
                .await
                .expect("timed out waiting for a message from the bridge")
                .expect("failed to read agent stdin")
                .expect("bridge closed agent stdin");
            serde_json::from_str(&line).expect("bridge wrote invalid JSON")
        }

        pub async fn send(&mut self, message: Value) {
            self.send_raw(&format!("{message}\n")).await;
        }

        pub async fn send_raw(&mut self, text: &str) {
            let stdout = self.stdout.as_mut().expect("agent stdout already closed");
            stdout.write_all(text.as_bytes()).await.unwrap();
            stdout.flush().await.unwrap();
        }

        pub async fn write_stderr(&mut self, text: &str) {
            let stderr = self.stderr.as_mut().expect("agent stderr already closed");
            stderr.write_all(text.as_bytes()).await.unwrap();
            stderr.flush().await.unwrap();
        }

        /// Answer `initialize` and consume the `initialized` notification
        ///
        /// Returns the params of the initialize request.
        pub async fn complete_handshake(&mut self) -> Value {
            let request = self.read_message().await;
            assert_eq!(request["method"], "initialize");
            let id = request["id"].clone();
            self.send(json!({"id": id, "result": {"userAgent": "mock-agent/1.0"}}))
                .await;

            let notification = self.read_message().await;
            assert_eq!(notification["method"], "initialized");
            assert!(notification.get("id").is_none());

            request["params"].clone()
        }

        /// Close the output pipes and report an exit code
        pub fn exit(&mut self, code: i32) {
            self.stdout.take();
            self.stderr.take();
            self.exit.send_replace(Some(ProcessExit::Exited {
                code: Some(code),
                signal: None,
            }));
        }

        pub fn has_exited(&self) -> bool {
            self.exit.borrow().is_some()
        }
    }
}
