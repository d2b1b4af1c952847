//! Broker gateway integration.
//!
//! ## Capabilities
//! - `GatewayClient`: outbound requests (connect, subscribe, chains, orders)
//! - `GatewayEventSink`: inbound asynchronous events (ticks, order status, chains)
//!
//! ## Adapters
//! - `PaperGateway`: simulated broker for paper trading and tests

pub mod paper;
mod traits;
mod types;

pub use paper::PaperGateway;
pub use traits::*;
pub use types::*;

use anyhow::{anyhow, Result};
use tracing::{info, warn};

/// Connect using the first candidate port that accepts the session.
///
/// Returns the port used and the broker's next valid order id.
pub async fn connect_with_fallback(
    client: &dyn GatewayClient,
    host: &str,
    ports: &[u16],
    client_id: u32,
) -> Result<(u16, u64)> {
    for &port in ports {
        info!(%host, port, client_id, "Connecting to gateway");
        match client.connect(host, port, client_id).await {
            Ok(next_order_id) => {
                info!(port, next_order_id, "✅ [GATEWAY] Connected");
                return Ok((port, next_order_id));
            }
            Err(e) => {
                warn!(port, error = %e, "Gateway port failed");
            }
        }
    }

    Err(anyhow!(
        "unable to connect to {} on any of ports {:?}",
        host,
        ports
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_falls_back_to_next_port() {
        let mut client = MockGatewayClient::new();
        client
            .expect_connect()
            .withf(|host, port, id| host == "127.0.0.1" && *port == 7496 && *id == 25)
            .times(1)
            .returning(|_, _, _| Err(anyhow!("connection refused")));
        client
            .expect_connect()
            .withf(|host, port, id| host == "127.0.0.1" && *port == 7497 && *id == 25)
            .times(1)
            .returning(|_, _, _| Ok(1001));

        let (port, next_id) = connect_with_fallback(&client, "127.0.0.1", &[7496, 7497, 4001], 25)
            .await
            .unwrap();

        assert_eq!(port, 7497);
        assert_eq!(next_id, 1001);
    }

    #[tokio::test]
    async fn test_connect_fails_when_all_ports_refuse() {
        let mut client = MockGatewayClient::new();
        client
            .expect_connect()
            .times(2)
            .returning(|_, _, _| Err(anyhow!("connection refused")));

        let result = connect_with_fallback(&client, "127.0.0.1", &[4001, 4002], 7).await;
        tokio_test::assert_err!(result);
    }
}
