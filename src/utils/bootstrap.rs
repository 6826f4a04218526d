//! Bootstrap utilities for retry-topic consumers.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use super::retry::connection_backoff;
use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the RETRYTOPIC_LOG environment variable.
///
/// Defaults to "info" level if RETRYTOPIC_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to a broker with exponential backoff retry.
///
/// Returns the connected client, or the last error once retries run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let client = connect
        .retry(connection_backoff())
        .notify(|e: &E, delay: Duration| {
            warn!(
                service = %service_name,
                address = %address,
                error = %e,
                retry_in = ?delay,
                "Connection failed, retrying"
            );
        })
        .await?;
    info!(service = %service_name, address = %address, "Connected");
    Ok(client)
}
