//! TCP readiness probe.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Result of a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The port accepted a connection.
    Ready,
    /// Connection refused, name not resolvable yet, or reset.
    Refused,
    /// The attempt did not complete within its own bound.
    TimedOut,
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The slot never accepted a connection within the bound.
    #[error("{address} not ready after {timeout:?} ({attempts} attempts)")]
    Timeout {
        address: String,
        timeout: Duration,
        attempts: u32,
    },
}

/// Perform one TCP connect against `address` (`host:port`).
pub async fn tcp_probe(address: &str, timeout: Duration) -> ProbeResult {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_stream)) => ProbeResult::Ready,
        Ok(Err(e)) => {
            debug!(error = %e, %address, "readiness probe connect failed");
            ProbeResult::Refused
        }
        Err(_) => {
            debug!(%address, "readiness probe attempt timed out");
            ProbeResult::TimedOut
        }
    }
}

/// Polls a slot's port until it accepts connections.
#[derive(Debug, Clone)]
pub struct ReadinessProber {
    /// Pause between attempts.
    interval: Duration,
    /// Upper bound for a single connect attempt.
    attempt_timeout: Duration,
}

impl Default for ReadinessProber {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(2),
        }
    }
}

impl ReadinessProber {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Block until `address` accepts connections or `timeout` elapses.
    ///
    /// Returns how long it took to become ready.
    pub async fn wait_for_ready(
        &self,
        address: &str,
        timeout: Duration,
    ) -> Result<Duration, ReadinessError> {
        info!(%address, timeout_secs = timeout.as_secs(), "waiting for startup");
        let started = Instant::now();
        let deadline = started + timeout;
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            attempts += 1;
            if tcp_probe(address, self.attempt_timeout.min(remaining)).await == ProbeResult::Ready {
                let elapsed = started.elapsed();
                info!(
                    %address,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slot is accepting connections"
                );
                return Ok(elapsed);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }

        warn!(%address, attempts, "readiness probe timed out");
        Err(ReadinessError::Timeout {
            address: address.to_string(),
            timeout,
            attempts,
        })
    }
}
