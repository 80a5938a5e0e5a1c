//! Preauthentication check
//!
//! A one-shot connect used to check that the broker is reachable and
//! accepts the credentials before a session is started.

use live_core::DEFAULT_CONNECT_TIMEOUT_MS;
use live_transport::{BrokerUrl, ConnectOptions, PubSubSender, PubSubTransport};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, Result};
use crate::session::await_connack;

/// Check `url` with a single short-lived connection.
///
/// Failures are classified as [`ConnectionError`]. Whatever the outcome, no
/// connection remains open when this returns.
pub async fn preauth<T: PubSubTransport>(transport: &T, url: &str, client_id: &str) -> Result<()> {
    let broker = BrokerUrl::parse(url)?;
    let options = ConnectOptions::new(client_id, broker)
        .connect_timeout(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS));
    check(transport, options).await
}

/// Run the check with `options`, stripped of reconnect, last will and
/// certificate validation
pub(crate) async fn check<T>(transport: &T, mut options: ConnectOptions) -> Result<()>
where
    T: PubSubTransport,
{
    options.reconnect_period = None;
    options.last_will = None;
    options.verify_certificates = false;

    debug!("Preauth check against {}", options.broker);

    let (connection, mut receiver) = transport.connect(&options).await?;

    let timeout = options.connect_timeout;
    let outcome = match tokio::time::timeout(timeout, await_connack(&mut receiver)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ConnectionError::timed_out(timeout).into()),
    };

    if let Err(e) = connection.close().await {
        debug!("Preauth close failed: {}", e);
    }

    match &outcome {
        Ok(()) => info!("Preauth to {} succeeded", options.broker),
        Err(e) => warn!("Preauth to {} failed: {}", options.broker, e),
    }

    outcome
}
