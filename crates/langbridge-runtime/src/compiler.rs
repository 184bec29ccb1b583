//! Toolchain compiler adapter.
//!
//! The bridge sources ship with the editor extension and are compiled on
//! the user's machine by the external toolchain compiler before each
//! launch. The adapter normalizes that external step into the lifecycle's
//! vocabulary: success with captured output, or
//! [`BridgeError::CompileFailed`] with the exit code.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use langbridge_core::BridgeError;
use tokio::process::Command;

/// Captured output of a successful compile.
#[derive(Clone, Debug, Default)]
pub struct CompileOutput {
    /// Compiler stdout.
    pub stdout: String,
    /// Compiler stderr (many compilers write warnings here).
    pub stderr: String,
}

/// Seam for the external compile step, so the lifecycle can be exercised
/// without a real toolchain on the test machine.
#[async_trait]
pub trait ToolchainCompiler: Send + Sync {
    /// Compile the bridge sources in `source_dir` with the given args.
    async fn compile(&self, source_dir: &Path, args: &[String])
    -> Result<CompileOutput, BridgeError>;
}

/// Compiler adapter that runs the configured compiler executable.
pub struct CommandCompiler {
    program: PathBuf,
}

impl CommandCompiler {
    /// Use `program` as the compiler executable (resolved via `PATH` if
    /// not absolute).
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Conventional argument list: `["-o", out_dir, ...sources]`.
    #[must_use]
    pub fn build_args(output_dir: &str, sources: &[String]) -> Vec<String> {
        let mut args = vec!["-o".to_string(), output_dir.to_string()];
        args.extend(sources.iter().cloned());
        args
    }
}

#[async_trait]
impl ToolchainCompiler for CommandCompiler {
    async fn compile(
        &self,
        source_dir: &Path,
        args: &[String],
    ) -> Result<CompileOutput, BridgeError> {
        // An "-o" directory that doesn't exist yet would fail the compile;
        // create it the way the original bridge created its ebin dir.
        if let Some(pos) = args.iter().position(|a| a == "-o") {
            if let Some(out) = args.get(pos + 1) {
                let out_dir = source_dir.join(out);
                tokio::fs::create_dir_all(&out_dir)
                    .await
                    .map_err(|e| BridgeError::Launch {
                        context: format!("create output dir: {e}"),
                    })?;
            }
        }

        let start = Instant::now();
        tracing::debug!(program = %self.program.display(), ?args, "compiling bridge sources");

        let output = Command::new(&self.program)
            .args(args)
            .current_dir(source_dir)
            .output()
            .await
            .map_err(|e| BridgeError::Launch {
                context: format!("spawn compiler: {e}"),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        if output.status.success() {
            tracing::debug!(duration_ms, "bridge compilation succeeded");
            Ok(CompileOutput { stdout, stderr })
        } else {
            let exit_code = output.status.code().unwrap_or(-1);
            tracing::error!(exit_code, %stderr, "bridge compilation failed");
            Err(BridgeError::CompileFailed { exit_code })
        }
    }
}
