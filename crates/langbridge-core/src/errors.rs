//! Bridge-wide error types.

use thiserror::Error;

/// Errors from bridge lifecycle and transport operations.
///
/// The lifecycle phases each map to one fatal variant (`CompileFailed`,
/// `PortAcquisition`, `ConnectTimeout`), so callers can tell "worker failed
/// to build" apart from "worker built but never became reachable". Transport
/// and parse failures on individual commands are local to that command and
/// never terminate the session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The worker's bridge sources failed to compile.
    #[error("bridge compilation failed with exit code {exit_code}")]
    CompileFailed {
        /// Exit code reported by the compiler process.
        exit_code: i32,
    },

    /// The OS refused to hand out an ephemeral port.
    #[error("could not acquire an ephemeral port: {0}")]
    PortAcquisition(#[from] std::io::Error),

    /// The worker never became reachable within the retry budget.
    #[error("worker not reachable after {attempts} attempts: {last_error}")]
    ConnectTimeout {
        /// Number of connect attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last_error: String,
    },

    /// A required process (compiler or worker) could not be started at all.
    #[error("launch failed: {context}")]
    Launch {
        /// What went wrong during launch.
        context: String,
    },

    /// A socket or request failed mid-session (e.g. the worker died).
    #[error("transport error: {0}")]
    Transport(String),

    /// A command response arrived but was not valid JSON.
    #[error("unable to parse command response as JSON: {body}")]
    ResponseParse {
        /// The raw response body, kept for diagnostics.
        body: String,
    },

    /// The owning session was stopped while this operation was pending.
    #[error("bridge session stopped")]
    Stopped,
}
