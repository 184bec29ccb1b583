//! Inbound event receiver.
//!
//! The worker pushes fire-and-forget notifications as HTTP POSTs to
//! `http://127.0.0.1:<local_port>/<path>` with a JSON body. The receiver
//! parses the body and dispatches `(path, payload)` to the handler
//! registered for that path, then answers `200 text/plain "ok"` no matter
//! what: the protocol has no error channel back to the worker, so a
//! malformed body or a missing handler is logged and swallowed.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Uri, header};
use axum::response::IntoResponse;
use langbridge_core::BridgeError;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handler for one event path. Called synchronously on the receiver task
/// with the event path and its decoded payload.
pub type EventHandler = Arc<dyn Fn(&str, Value) + Send + Sync>;

/// Per-path event handler registry.
///
/// Each inbound event is dispatched to exactly one handler, selected by its
/// request path. Registration after the receiver has started takes effect
/// for subsequent events.
#[derive(Clone, Default)]
pub struct EventRouter {
    handlers: Arc<RwLock<HashMap<String, EventHandler>>>,
}

impl EventRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `path`, replacing any previous one.
    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&str, Value) + Send + Sync + 'static,
    {
        let _ = self
            .handlers
            .write()
            .insert(normalize(path), Arc::new(handler));
    }

    /// Number of registered paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    fn dispatch(&self, path: &str, payload: Value) {
        let handler = self.handlers.read().get(&normalize(path)).cloned();
        match handler {
            Some(handler) => handler(path, payload),
            None => tracing::debug!(path, "no handler for event path, dropping"),
        }
    }
}

fn normalize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

struct ReceiverState {
    router: EventRouter,
}

/// A running event receiver bound to an ephemeral loopback port.
///
/// Dropping the receiver (or calling [`stop`](Self::stop)) shuts the server
/// down; any connection in flight completes first.
pub struct EventReceiver {
    port: u16,
    shutdown: CancellationToken,
    server: Option<JoinHandle<()>>,
}

impl EventReceiver {
    /// Bind to `127.0.0.1:0` and start serving events into `router`.
    pub async fn start(router: EventRouter) -> Result<Self, BridgeError> {
        let state = Arc::new(ReceiverState { router });

        // Every path is an event path; the worker chooses them freely.
        let app = Router::new()
            .fallback(handle_event)
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
                .ok();
        });

        tracing::debug!(port, "event receiver listening");
        Ok(Self {
            port,
            shutdown,
            server: Some(server),
        })
    }

    /// The bound local port, to hand to the worker at launch.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shut the server down. Idempotent.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(server) = self.server.take() {
            server.await.ok();
            tracing::debug!(port = self.port, "event receiver stopped");
        }
    }
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Accept one pushed event: parse the body, dispatch, acknowledge.
///
/// The acknowledgment is fixed: the handler's outcome and even a parse
/// failure never change the HTTP response, because the worker has nothing
/// useful to do with a NACK.
async fn handle_event(
    State(state): State<Arc<ReceiverState>>,
    uri: Uri,
    body: Bytes,
) -> impl IntoResponse {
    let path = uri.path().to_string();
    match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => {
            metrics::counter!("bridge_events_received_total").increment(1);
            state.router.dispatch(&path, payload);
        }
        Err(e) => {
            tracing::warn!(
                path,
                error = %e,
                body = %String::from_utf8_lossy(&body),
                "failed to parse inbound event body"
            );
        }
    }
    ([(header::CONTENT_TYPE, "text/plain")], "ok")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn post(port: u16, path: &str, body: &str) -> (u16, String) {
        let client = reqwest_client();
        let resp = client
            .post(format!("http://127.0.0.1:{port}{path}"))
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.text().await.unwrap())
    }

    fn reqwest_client() -> reqwest::Client {
        reqwest::Client::new()
    }

    #[tokio::test]
    async fn start_binds_an_ephemeral_port() {
        let receiver = EventReceiver::start(EventRouter::new()).await.unwrap();
        assert!(receiver.port() > 0);
    }

    #[tokio::test]
    async fn well_formed_event_dispatches_once_and_acks_ok() {
        let router = EventRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(parking_lot::Mutex::new(None));
        {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen);
            router.on("/break", move |path, payload| {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some((path.to_string(), payload));
            });
        }

        let receiver = EventReceiver::start(router).await.unwrap();
        let (status, body) = post(receiver.port(), "/break", r#"{"module":"m","line":12}"#).await;

        assert_eq!(status, 200);
        assert_eq!(body, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let (path, payload) = seen.lock().take().unwrap();
        assert_eq!(path, "/break");
        assert_eq!(payload["module"], "m");
        assert_eq!(payload["line"], 12);
    }

    #[tokio::test]
    async fn malformed_event_still_acks_ok_without_dispatch() {
        let router = EventRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            router.on("/break", move |_, _| {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        let receiver = EventReceiver::start(router).await.unwrap();
        let (status, body) = post(receiver.port(), "/break", "{this is not json").await;

        assert_eq!(status, 200);
        assert_eq!(body, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_path_is_acked_and_dropped() {
        let receiver = EventReceiver::start(EventRouter::new()).await.unwrap();
        let (status, body) = post(receiver.port(), "/nobody_home", "{}").await;
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn handler_outcome_does_not_change_the_ack() {
        let router = EventRouter::new();
        router.on("/panicky", |_, _| {
            // Handlers are plain closures; even one that misbehaves by
            // doing nothing useful still gets a 200 back to the worker.
        });
        let receiver = EventReceiver::start(router).await.unwrap();
        let (status, body) = post(receiver.port(), "/panicky", "null").await;
        assert_eq!(status, 200);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn events_on_many_paths_select_the_right_handler() {
        let router = EventRouter::new();
        let on_break = Arc::new(AtomicUsize::new(0));
        let on_exit = Arc::new(AtomicUsize::new(0));
        {
            let on_break = Arc::clone(&on_break);
            router.on("break", move |_, _| {
                let _ = on_break.fetch_add(1, Ordering::SeqCst);
            });
            let on_exit = Arc::clone(&on_exit);
            router.on("/exit", move |_, _| {
                let _ = on_exit.fetch_add(1, Ordering::SeqCst);
            });
        }

        let receiver = EventReceiver::start(router).await.unwrap();
        let _ = post(receiver.port(), "/break", "{}").await;
        let _ = post(receiver.port(), "/exit", "{}").await;
        let _ = post(receiver.port(), "/break", "{}").await;

        assert_eq!(on_break.load(Ordering::SeqCst), 2);
        assert_eq!(on_exit.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_closes_the_port() {
        let mut receiver = EventReceiver::start(EventRouter::new()).await.unwrap();
        let port = receiver.port();
        receiver.stop().await;
        receiver.stop().await;

        let err = reqwest_client()
            .post(format!("http://127.0.0.1:{port}/x"))
            .body("{}")
            .send()
            .await;
        assert!(err.is_err(), "receiver should no longer accept connections");
    }
}
