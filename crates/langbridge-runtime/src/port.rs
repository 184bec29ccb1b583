//! Ephemeral port brokerage.

use langbridge_core::BridgeError;
use tokio::net::TcpListener;

/// Ask the OS for a free ephemeral TCP port without holding it.
///
/// Binds a throwaway listener to `127.0.0.1:0`, reads back the assigned
/// port, and drops the listener. The port was free at the instant of the
/// call only; whoever receives it must bind promptly, since nothing stops
/// the OS from reassigning it.
pub async fn acquire_ephemeral_port() -> Result<u16, BridgeError> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    tracing::debug!(port, "acquired ephemeral port");
    Ok(port)
}
