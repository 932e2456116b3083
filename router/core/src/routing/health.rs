//! Handler Health Probing
//!
//! Live health for status snapshots. Each probe calls the handler's own
//! `health_check` under a deadline; a probe that does not answer in time
//! counts as unhealthy.

use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;

use crate::handler::DomainHandler;

/// Health status of a handler
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Handler reported healthy
    Healthy,

    /// Handler reported unhealthy
    Unhealthy,

    /// Handler did not answer before the probe deadline
    TimedOut,
}

impl HealthStatus {
    /// Check if the handler can serve requests
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Probe one handler
pub async fn probe<H>(handler_id: &str, handler: &H, timeout: Duration) -> HealthStatus
where
    H: DomainHandler + ?Sized,
{
    match tokio::time::timeout(timeout, handler.health_check()).await {
        Ok(true) => HealthStatus::Healthy,
        Ok(false) => {
            tracing::warn!(handler = handler_id, "Handler reported unhealthy");
            HealthStatus::Unhealthy
        }
        Err(_) => {
            tracing::warn!(
                handler = handler_id,
                timeout_ms = timeout.as_millis() as u64,
                "Health check timed out"
            );
            HealthStatus::TimedOut
        }
    }
}

/// Probe several handlers concurrently, preserving input order
pub async fn probe_all<'a, I, H>(handlers: I, timeout: Duration) -> Vec<HealthStatus>
where
    I: IntoIterator<Item = (&'a str, &'a H)>,
    H: DomainHandler + ?Sized + 'a,
{
    join_all(
        handlers
            .into_iter()
            .map(|(id, handler)| probe(id, handler, timeout)),
    )
    .await
}
