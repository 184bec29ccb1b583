//! Bridge settings.
//!
//! Settings are loaded from a JSON file deep-merged over compiled defaults.
//! Every field is serde-defaulted so a partial file (or `{}`) is valid; a
//! missing file yields the defaults outright. The editor glue that embeds
//! this library decides where the file lives and when to reload.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetrySchedule;

/// Errors from settings loading.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON for the expected shape.
    #[error("failed to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// How to invoke the toolchain compiler that builds the worker's bridge
/// sources.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilerSettings {
    /// Compiler executable, resolved via `PATH` if not absolute.
    #[serde(default = "default_compiler_command")]
    pub command: String,
    /// Output directory for compiled artifacts, relative to the source dir.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_compiler_command() -> String {
    "erlc".into()
}
fn default_output_dir() -> String {
    "../ebin".into()
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            command: default_compiler_command(),
            output_dir: default_output_dir(),
        }
    }
}

/// Top-level bridge settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSettings {
    /// Compiler invocation.
    #[serde(default)]
    pub compiler: CompilerSettings,
    /// Connect retry schedule for reaching the launched worker.
    #[serde(default)]
    pub connect: RetrySchedule,
    /// Emit verbose lifecycle logging.
    #[serde(default)]
    pub verbose: bool,
}

impl BridgeSettings {
    /// Load settings from a JSON file.
    ///
    /// A missing file is not an error; it yields compiled defaults, the
    /// common case for a fresh install. Any other I/O failure or a parse
    /// failure is surfaced so the caller can report a broken config file
    /// instead of silently ignoring it.
    pub fn load_from_path(path: &Path) -> Result<Self, SettingsError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "no settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let settings = serde_json::from_str(&raw)?;
        tracing::debug!(?path, "settings loaded");
        Ok(settings)
    }
}
