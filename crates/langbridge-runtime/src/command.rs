//! Outbound command channel.
//!
//! Host-initiated request/response calls against the worker's published
//! port: `GET`/`POST http://127.0.0.1:<remote_port>/<verb>` with a plain
//! text body, answered with a JSON body that the channel parses for the
//! caller. One call is one request; concurrent calls are independent and
//! never block each other. There is no retry and no deadline here; a
//! caller that needs either imposes it around `send`.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use langbridge_core::BridgeError;
use parking_lot::Mutex;
use serde_json::Value;

/// HTTP method for a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandMethod {
    /// Side-effect-free query.
    Get,
    /// Command carrying a body.
    Post,
}

/// Request/response client for the worker's command port.
///
/// Cheap to clone; clones share the underlying connection pool and the
/// in-flight command set.
#[derive(Clone)]
pub struct CommandChannel {
    client: reqwest::Client,
    remote_port: u16,
    next_id: Arc<AtomicU64>,
    pending: Arc<Mutex<HashSet<u64>>>,
}

impl CommandChannel {
    /// Create a channel against the worker's published port.
    #[must_use]
    pub fn new(remote_port: u16) -> Self {
        Self {
            client: reqwest::Client::new(),
            remote_port,
            next_id: Arc::new(AtomicU64::new(1)),
            pending: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// The worker port this channel talks to.
    #[must_use]
    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Number of commands currently awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Issue a `POST <verb>` command.
    pub async fn post(&self, verb: &str, body: Option<&str>) -> Result<Value, BridgeError> {
        self.send(CommandMethod::Post, verb, body).await
    }

    /// Issue a `GET <verb>` command.
    pub async fn get(&self, verb: &str) -> Result<Value, BridgeError> {
        self.send(CommandMethod::Get, verb, None).await
    }

    /// Issue one command and await its parsed response.
    ///
    /// Transport-level failures (worker died, connection refused, body cut
    /// short) surface as [`BridgeError::Transport`]; a response that
    /// completes but is not JSON surfaces as [`BridgeError::ResponseParse`]
    /// with the raw body, so the two are never conflated.
    pub async fn send(
        &self,
        method: CommandMethod,
        verb: &str,
        body: Option<&str>,
    ) -> Result<Value, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.pending.lock().insert(id);
        metrics::gauge!("bridge_commands_inflight").increment(1.0);

        let result = self.send_inner(method, verb, body).await;

        let _ = self.pending.lock().remove(&id);
        metrics::gauge!("bridge_commands_inflight").decrement(1.0);
        result
    }

    async fn send_inner(
        &self,
        method: CommandMethod,
        verb: &str,
        body: Option<&str>,
    ) -> Result<Value, BridgeError> {
        let url = format!(
            "http://127.0.0.1:{}/{}",
            self.remote_port,
            verb.trim_start_matches('/')
        );
        let request = match method {
            CommandMethod::Get => self.client.get(&url),
            CommandMethod::Post => self.client.post(&url),
        };

        let response = request
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(body.unwrap_or_default().to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(verb, error = %e, "command request failed");
                BridgeError::Transport(e.to_string())
            })?;

        let raw = response.text().await.map_err(|e| {
            tracing::warn!(verb, error = %e, "failed to read command response");
            BridgeError::Transport(e.to_string())
        })?;

        match serde_json::from_str(&raw) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                tracing::warn!(verb, error = %e, "command response is not JSON");
                Err(BridgeError::ResponseParse { body: raw })
            }
        }
    }
}
