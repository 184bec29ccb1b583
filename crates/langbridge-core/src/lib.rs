//! # langbridge-core
//!
//! Portable building blocks for the language bridge: the error taxonomy
//! shared by every bridge component, the connect retry schedule, and the
//! settings types.
//!
//! The async runtime pieces (port broker, connector, channels, lifecycle)
//! live in `langbridge-runtime`, which has access to tokio. This crate is
//! sync-only so the math and types stay trivially testable.

#![deny(unsafe_code)]

pub mod errors;
pub mod retry;
pub mod settings;

pub use errors::BridgeError;
pub use retry::RetrySchedule;
pub use settings::{BridgeSettings, CompilerSettings, SettingsError};
