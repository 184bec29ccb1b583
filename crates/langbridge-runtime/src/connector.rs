//! Retrying TCP connector for freshly launched workers.
//!
//! A worker becomes reachable after an unspecified and variable startup
//! delay; the only readiness signal is its port accepting connections. The
//! connector dials on the schedule from `langbridge-core`, one outstanding
//! attempt at a time, linear backoff, until the socket opens or the
//! attempt budget is spent.

use std::time::Duration;

use langbridge_core::{BridgeError, RetrySchedule};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Attempt a TCP connection to `host:port` on the given schedule.
///
/// Returns the open stream on the first successful attempt. After
/// `max_attempts` failures returns [`BridgeError::ConnectTimeout`] carrying
/// the final attempt's error. If `cancel` fires because the owning session was
/// stopped, the in-flight attempt or backoff sleep is abandoned and
/// [`BridgeError::Stopped`] is returned without leaking a socket.
pub async fn connect(
    host: &str,
    port: u16,
    schedule: &RetrySchedule,
    cancel: &CancellationToken,
) -> Result<TcpStream, BridgeError> {
    let mut attempt: u32 = 0;
    let mut last_error = String::new();

    while !schedule.is_exhausted(attempt) {
        tokio::select! {
            () = cancel.cancelled() => return Err(BridgeError::Stopped),
            result = TcpStream::connect((host, port)) => match result {
                Ok(stream) => {
                    tracing::debug!(host, port, attempt, "worker reachable");
                    return Ok(stream);
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::debug!(host, port, attempt, error = %e, "connect attempt failed");
                }
            },
        }

        let delay = Duration::from_millis(schedule.delay_ms(attempt));
        attempt += 1;
        if schedule.is_exhausted(attempt) {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => return Err(BridgeError::Stopped),
            () = tokio::time::sleep(delay) => {}
        }
    }

    tracing::warn!(host, port, attempts = attempt, "worker never became reachable");
    Err(BridgeError::ConnectTimeout {
        attempts: attempt,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Instant;
    use tokio::net::TcpListener;

    fn fast_schedule(max_attempts: u32) -> RetrySchedule {
        RetrySchedule {
            max_attempts,
            base_delay_ms: 10,
        }
    }

    #[tokio::test]
    async fn connects_to_listening_port_on_first_attempt() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let cancel = CancellationToken::new();
        let stream = connect("127.0.0.1", port, &fast_schedule(3), &cancel)
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
    }

    #[tokio::test]
    async fn dead_port_exhausts_all_attempts() {
        // Acquire-and-release so nothing listens on the port.
        let port = crate::port::acquire_ephemeral_port().await.unwrap();

        let cancel = CancellationToken::new();
        let result = connect("127.0.0.1", port, &fast_schedule(3), &cancel).await;
        assert_matches!(
            result,
            Err(BridgeError::ConnectTimeout { attempts: 3, .. })
        );
    }

    #[tokio::test]
    async fn succeeds_once_listener_appears_mid_schedule() {
        let port = crate::port::acquire_ephemeral_port().await.unwrap();

        let binder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            TcpListener::bind(("127.0.0.1", port)).await.unwrap()
        });

        let cancel = CancellationToken::new();
        let schedule = RetrySchedule {
            max_attempts: 20,
            base_delay_ms: 10,
        };
        let stream = connect("127.0.0.1", port, &schedule, &cancel).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap().port(), port);
        binder.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_aborts_promptly() {
        let port = crate::port::acquire_ephemeral_port().await.unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let schedule = RetrySchedule {
            max_attempts: 10,
            base_delay_ms: 250,
        };
        let handle =
            tokio::spawn(async move { connect("127.0.0.1", port, &schedule, &token).await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        let start = Instant::now();
        cancel.cancel();

        let result = handle.await.unwrap();
        assert_matches!(result, Err(BridgeError::Stopped));
        assert!(
            start.elapsed().as_millis() < 200,
            "cancel should not wait out the backoff"
        );
    }

    #[tokio::test]
    async fn no_extra_delay_after_final_attempt() {
        let port = crate::port::acquire_ephemeral_port().await.unwrap();

        let cancel = CancellationToken::new();
        let schedule = RetrySchedule {
            max_attempts: 2,
            base_delay_ms: 100,
        };
        let start = Instant::now();
        let result = connect("127.0.0.1", port, &schedule, &cancel).await;
        assert_matches!(result, Err(BridgeError::ConnectTimeout { attempts: 2, .. }));
        // One inter-attempt sleep (100ms), none after the last failure.
        assert!(start.elapsed().as_millis() < 300);
    }
}
