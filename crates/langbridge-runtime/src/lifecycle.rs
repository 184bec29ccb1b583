//! Bridge session lifecycle.
//!
//! One [`BridgeSession`] owns everything a live bridge needs: the compiled
//! worker, the event receiver, the command channel, and the state machine
//! tying them together:
//!
//! ```text
//! Idle → Compiling → ReceiverStarting → WorkerLaunching → Connecting → Operational
//!                                                                          │
//!   (any non-terminal state) ──failure──→ Failed(reason)      stop() ──→ Stopped
//! ```
//!
//! `Failed` and `Stopped` are terminal; a session is single-use and a new
//! bridge means a new session. All state mutation happens behind one lock,
//! only from the orchestrator, so concurrent callbacks can never interleave
//! a half-finished transition.

use std::path::PathBuf;
use std::sync::Arc;

use langbridge_core::{BridgeError, BridgeSettings};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::command::CommandChannel;
use crate::compiler::{CommandCompiler, ToolchainCompiler};
use crate::connector;
use crate::port;
use crate::receiver::{EventReceiver, EventRouter};
use crate::worker::{WorkerHandle, WorkerPorts, WorkerSpec};

/// What a bridge flavor supplies: which sources make up its worker-side
/// bridge, and which event paths it handles. This is the only thing that
/// differs between the debugger bridge and the language-server bridge
/// (besides the worker launch args, carried by [`WorkerSpec`]).
#[derive(Clone, Default)]
pub struct BridgeCapabilities {
    /// Bridge source files handed to the compiler, relative to the source
    /// directory.
    pub source_files: Vec<String>,
    /// Event dispatch table for inbound worker notifications.
    pub events: EventRouter,
}

/// Lifecycle state of a bridge session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeState {
    /// Constructed, not yet started.
    Idle,
    /// Compiling the worker's bridge sources.
    Compiling,
    /// Binding the inbound event receiver.
    ReceiverStarting,
    /// Spawning the worker process.
    WorkerLaunching,
    /// Retry-connecting to the worker's port.
    Connecting,
    /// Both channels live; commands and events flow.
    Operational,
    /// Shut down by `stop()`. Terminal.
    Stopped,
    /// A lifecycle phase failed. Terminal.
    Failed(String),
}

impl BridgeState {
    /// Whether the session can never leave this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

/// A single live bridge to one worker runtime.
pub struct BridgeSession {
    settings: BridgeSettings,
    source_dir: PathBuf,
    worker_spec: WorkerSpec,
    capabilities: BridgeCapabilities,
    compiler: Arc<dyn ToolchainCompiler>,

    state: Mutex<BridgeState>,
    cancel: CancellationToken,
    receiver: Mutex<Option<EventReceiver>>,
    worker: Mutex<Option<WorkerHandle>>,
    command: Mutex<Option<CommandChannel>>,
    local_port: Mutex<Option<u16>>,
    remote_port: Mutex<Option<u16>>,
}

impl BridgeSession {
    /// Create an idle session. Nothing runs until [`start`](Self::start).
    ///
    /// The compiler executable comes from `settings.compiler.command`; use
    /// [`with_compiler`](Self::with_compiler) to substitute a custom
    /// [`ToolchainCompiler`].
    #[must_use]
    pub fn new(
        settings: BridgeSettings,
        source_dir: impl Into<PathBuf>,
        worker_spec: WorkerSpec,
        capabilities: BridgeCapabilities,
    ) -> Self {
        let compiler = Arc::new(CommandCompiler::new(settings.compiler.command.clone()));
        Self::with_compiler(settings, source_dir, worker_spec, capabilities, compiler)
    }

    /// Create an idle session with an explicit compiler implementation.
    #[must_use]
    pub fn with_compiler(
        settings: BridgeSettings,
        source_dir: impl Into<PathBuf>,
        worker_spec: WorkerSpec,
        capabilities: BridgeCapabilities,
        compiler: Arc<dyn ToolchainCompiler>,
    ) -> Self {
        Self {
            settings,
            source_dir: source_dir.into(),
            worker_spec,
            capabilities,
            compiler,
            state: Mutex::new(BridgeState::Idle),
            cancel: CancellationToken::new(),
            receiver: Mutex::new(None),
            worker: Mutex::new(None),
            command: Mutex::new(None),
            local_port: Mutex::new(None),
            remote_port: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> BridgeState {
        self.state.lock().clone()
    }

    /// The event receiver's bound port, once `ReceiverStarting` completed.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        *self.local_port.lock()
    }

    /// The worker's port, once `WorkerLaunching` chose it.
    #[must_use]
    pub fn remote_port(&self) -> Option<u16> {
        *self.remote_port.lock()
    }

    /// Whether the worker is reachable (session is operational).
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.state.lock() == BridgeState::Operational
    }

    /// Register a handler for an inbound event path.
    ///
    /// Takes effect immediately, even while the session is running.
    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        self.capabilities.events.on(path, handler);
    }

    /// Drive the session to `Operational`.
    ///
    /// Resolves with the event receiver's local port (the worker's callback
    /// target). Fatal phase failures land the session in `Failed` and are
    /// returned as the phase-specific error; if [`stop`](Self::stop) wins a
    /// race against any phase, the result is [`BridgeError::Stopped`] and
    /// the state is `Stopped`, never a success after stop has resolved.
    pub async fn start(&self) -> Result<u16, BridgeError> {
        // Refused transitions (already started, already stopped) must not
        // disturb whatever state the session is in.
        self.transition(BridgeState::Compiling)?;
        match self.start_inner().await {
            Ok(local_port) => Ok(local_port),
            Err(err) => {
                self.note_failure(&err).await;
                Err(err)
            }
        }
    }

    async fn start_inner(&self) -> Result<u16, BridgeError> {
        let args = CommandCompiler::build_args(
            &self.settings.compiler.output_dir,
            &self.capabilities.source_files,
        );
        let output = self
            .guarded(self.compiler.compile(&self.source_dir, &args))
            .await?;
        if self.settings.verbose && !output.stderr.is_empty() {
            tracing::info!(stderr = %output.stderr, "compiler diagnostics");
        }

        self.transition(BridgeState::ReceiverStarting)?;
        let receiver = self
            .guarded(EventReceiver::start(self.capabilities.events.clone()))
            .await?;
        let local_port = receiver.port();
        *self.local_port.lock() = Some(local_port);
        *self.receiver.lock() = Some(receiver);

        self.transition(BridgeState::WorkerLaunching)?;
        let worker_port = match self.worker_spec.fixed_port {
            Some(p) => p,
            None => self.guarded(port::acquire_ephemeral_port()).await?,
        };
        let ports = WorkerPorts {
            callback_port: local_port,
            worker_port,
        };
        let handle = WorkerHandle::spawn(&self.worker_spec, ports)?;
        *self.worker.lock() = Some(handle);
        *self.remote_port.lock() = Some(worker_port);

        self.transition(BridgeState::Connecting)?;
        let probe = connector::connect(
            "127.0.0.1",
            worker_port,
            &self.settings.connect,
            &self.cancel,
        )
        .await
        .map_err(|err| self.refine_connect_error(err))?;
        // The probe socket only proves readiness; commands open their own
        // connections against the port.
        drop(probe);

        *self.command.lock() = Some(CommandChannel::new(worker_port));
        self.transition(BridgeState::Operational)?;
        metrics::gauge!("bridge_sessions_active").increment(1.0);
        tracing::info!(local_port, worker_port, "bridge operational");
        Ok(local_port)
    }

    /// Issue a `POST` command against the worker.
    ///
    /// Command failures are local to the call; the session stays
    /// operational.
    pub async fn post_command(&self, verb: &str, body: Option<&str>) -> Result<Value, BridgeError> {
        self.channel()?.post(verb, body).await
    }

    /// Issue a `GET` command against the worker.
    pub async fn get_command(&self, verb: &str) -> Result<Value, BridgeError> {
        self.channel()?.get(verb).await
    }

    /// Shut the session down from any state. Idempotent: a second call, or
    /// a call on a `Failed` session, does nothing.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return;
            }
            if *state == BridgeState::Operational {
                metrics::gauge!("bridge_sessions_active").decrement(1.0);
            }
            *state = BridgeState::Stopped;
        }
        self.cancel.cancel();
        self.teardown().await;
        tracing::info!("bridge session stopped");
    }

    fn channel(&self) -> Result<CommandChannel, BridgeError> {
        self.command
            .lock()
            .clone()
            .ok_or_else(|| BridgeError::Transport("bridge is not operational".into()))
    }

    /// Race a lifecycle step against `stop()`.
    async fn guarded<T>(
        &self,
        step: impl Future<Output = Result<T, BridgeError>>,
    ) -> Result<T, BridgeError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(BridgeError::Stopped),
            result = step => result,
        }
    }

    /// Advance the state machine, refusing once the session is terminal.
    fn transition(&self, next: BridgeState) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if self.cancel.is_cancelled() || state.is_terminal() {
            return Err(BridgeError::Stopped);
        }
        if next == BridgeState::Compiling && *state != BridgeState::Idle {
            return Err(BridgeError::Transport(
                "bridge session is not restartable".into(),
            ));
        }
        tracing::debug!(from = ?*state, to = ?next, "bridge state transition");
        *state = next;
        Ok(())
    }

    /// A connect timeout against a worker that already died is a launch
    /// problem, not a timing problem; tell the user which one they have.
    fn refine_connect_error(&self, err: BridgeError) -> BridgeError {
        if let BridgeError::ConnectTimeout { .. } = &err {
            if let Some(worker) = self.worker.lock().as_mut() {
                if let Some(status) = worker.try_status() {
                    return BridgeError::Launch {
                        context: format!("worker exited with {status} before becoming reachable"),
                    };
                }
            }
        }
        err
    }

    /// Record a start failure and release resources.
    ///
    /// A `Stopped` error means `stop()` already owns the state, but the
    /// teardown still runs here: `stop()` may have raced a phase and run
    /// its own teardown before a resource was stored, and a worker
    /// stored after that must not outlive the session. `teardown` takes
    /// each resource out, so running it twice is harmless.
    async fn note_failure(&self, err: &BridgeError) {
        if !matches!(err, BridgeError::Stopped) {
            let newly_failed = {
                let mut state = self.state.lock();
                if state.is_terminal() {
                    false
                } else {
                    *state = BridgeState::Failed(err.to_string());
                    true
                }
            };
            if newly_failed {
                self.cancel.cancel();
                tracing::error!(error = %err, "bridge session failed");
            }
        }
        self.teardown().await;
    }

    async fn teardown(&self) {
        let worker = self.worker.lock().take();
        if let Some(mut worker) = worker {
            worker.kill().await;
        }
        let receiver = self.receiver.lock().take();
        if let Some(mut receiver) = receiver {
            receiver.stop().await;
        }
        let _ = self.command.lock().take();
    }
}
