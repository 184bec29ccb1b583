//! Worker process launcher.
//!
//! The worker is an already-compiled toolchain backend started as a plain
//! OS process. It learns where to reach the host from its command line:
//! argument templates may contain `{callback_port}` (the event receiver's
//! port, for pushing events back) and `{worker_port}` (the port the worker
//! is expected to listen on). Which placeholder a flavor uses is the whole
//! difference between the debugger bridge and the language-server bridge.
//!
//! There is no stdin/stdout protocol; readiness is detected solely by the
//! worker's port accepting connections (see `connector`).

use std::path::PathBuf;
use std::process::Stdio;

use langbridge_core::BridgeError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

/// How to launch a worker.
#[derive(Clone, Debug)]
pub struct WorkerSpec {
    /// Worker executable.
    pub program: PathBuf,
    /// Working directory for the worker process.
    pub working_dir: PathBuf,
    /// Argument template; `{callback_port}` and `{worker_port}` are
    /// substituted at launch.
    pub args: Vec<String>,
    /// Listen on this known port instead of a broker-assigned one.
    /// Workers with a port in their own config use this; everyone else
    /// gets an ephemeral port.
    pub fixed_port: Option<u16>,
}

impl WorkerSpec {
    /// Spec with no args and an ephemeral worker port.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
            args: Vec::new(),
            fixed_port: None,
        }
    }

    /// Render the argument template against concrete ports.
    #[must_use]
    pub fn render_args(&self, ports: WorkerPorts) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{callback_port}", &ports.callback_port.to_string())
                    .replace("{worker_port}", &ports.worker_port.to_string())
            })
            .collect()
    }
}

/// The two ports a launch involves.
#[derive(Clone, Copy, Debug)]
pub struct WorkerPorts {
    /// Event receiver port on the host side.
    pub callback_port: u16,
    /// Port the worker will listen on.
    pub worker_port: u16,
}

/// A running worker process.
pub struct WorkerHandle {
    child: Child,
}

impl WorkerHandle {
    /// Spawn the worker described by `spec` with the given ports.
    pub fn spawn(spec: &WorkerSpec, ports: WorkerPorts) -> Result<Self, BridgeError> {
        let args = spec.render_args(ports);
        tracing::info!(
            program = %spec.program.display(),
            ?args,
            callback_port = ports.callback_port,
            worker_port = ports.worker_port,
            "launching worker"
        );

        let mut child = Command::new(&spec.program)
            .args(&args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BridgeError::Launch {
                context: format!("spawn worker {}: {e}", spec.program.display()),
            })?;

        // Keep the pipe drained; a worker that logs more than the pipe
        // buffer would otherwise block on write and wedge mid-session.
        // The task ends on EOF when the worker exits.
        if let Some(stderr) = child.stderr.take() {
            let _ = tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(%line, "worker stderr");
                }
            });
        }

        Ok(Self { child })
    }

    /// Whether the process has already exited, and with what status.
    pub fn try_status(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Kill the worker process. Safe to call after it already exited.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "worker kill failed (likely already dead)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ports() -> WorkerPorts {
        WorkerPorts {
            callback_port: 40001,
            worker_port: 40002,
        }
    }

    #[test]
    fn render_substitutes_both_placeholders() {
        let mut spec = WorkerSpec::new("worker", "/tmp");
        spec.args = vec![
            "-bridge".into(),
            "{callback_port}".into(),
            "-listen".into(),
            "{worker_port}".into(),
            "-cwd".into(),
            "/proj".into(),
        ];
        assert_eq!(
            spec.render_args(ports()),
            vec!["-bridge", "40001", "-listen", "40002", "-cwd", "/proj"]
        );
    }

    #[test]
    fn render_leaves_plain_args_alone() {
        let mut spec = WorkerSpec::new("worker", "/tmp");
        spec.args = vec!["--verbose".into()];
        assert_eq!(spec.render_args(ports()), vec!["--verbose"]);
    }

    #[tokio::test]
    async fn spawn_and_kill_round_trip() {
        let mut spec = WorkerSpec::new("sleep", std::env::temp_dir());
        spec.args = vec!["30".into()];

        let mut handle = WorkerHandle::spawn(&spec, ports()).unwrap();
        assert!(handle.try_status().is_none(), "worker should be running");
        handle.kill().await;
        let status = handle.child.wait().await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn spawn_missing_program_is_a_launch_error() {
        let spec = WorkerSpec::new("/nonexistent/worker-runtime", "/tmp");
        let result = WorkerHandle::spawn(&spec, ports());
        assert!(matches!(result, Err(BridgeError::Launch { .. })));
    }

    #[tokio::test]
    async fn noisy_stderr_does_not_wedge_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        // Well past the OS pipe buffer: 16384 lines of 65 bytes.
        let mut spec = WorkerSpec::new("sh", dir.path());
        spec.args = vec![
            "-c".into(),
            "i=0; while [ $i -lt 16384 ]; do printf '%064d\\n' $i >&2; i=$((i+1)); done; : > done.marker".into(),
        ];

        let mut handle = WorkerHandle::spawn(&spec, ports()).unwrap();
        let marker = dir.path().join("done.marker");
        for _ in 0..300 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(marker.exists(), "worker blocked writing to stderr");
        handle.kill().await;
    }

    #[tokio::test]
    async fn kill_after_exit_is_harmless() {
        let spec = WorkerSpec::new("true", std::env::temp_dir());
        let mut handle = WorkerHandle::spawn(&spec, ports()).unwrap();
        let _ = handle.child.wait().await.unwrap();
        handle.kill().await;
    }
}
