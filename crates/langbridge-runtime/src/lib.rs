//! # langbridge-runtime
//!
//! Tokio runtime for the editor ↔ language-toolchain bridge.
//!
//! The host process cannot talk to the worker runtime directly; it compiles
//! the worker's bridge sources, launches the worker, and then speaks a small
//! loopback HTTP protocol:
//!
//! - the worker pushes fire-and-forget events to an [`EventReceiver`] bound
//!   to an ephemeral port handed to the worker at launch;
//! - the host issues request/response commands through a [`CommandChannel`]
//!   against the port the worker listens on.
//!
//! [`BridgeSession`] orchestrates the whole lifecycle:
//! compile → bind receiver → launch worker → retry-connect → operational,
//! with `stop()` able to cancel any phase.

#![deny(unsafe_code)]

pub mod command;
pub mod compiler;
pub mod connector;
pub mod lifecycle;
pub mod port;
pub mod receiver;
pub mod worker;

pub use command::{CommandChannel, CommandMethod};
pub use compiler::{CommandCompiler, CompileOutput, ToolchainCompiler};
pub use lifecycle::{BridgeCapabilities, BridgeSession, BridgeState};
pub use receiver::{EventReceiver, EventRouter};
pub use worker::{WorkerHandle, WorkerPorts, WorkerSpec};

pub use langbridge_core::{BridgeError, BridgeSettings, RetrySchedule};
