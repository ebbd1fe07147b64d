//! Docker utilities for container management.

pub mod client;
pub mod error;

pub use client::{ContainerState, DockerClient};
pub use error::DockerError;

use std::time::Duration;

/// Check Docker daemon health with retry and exponential backoff.
///
/// A single check produces false negatives while the daemon is starting up,
/// so callers about to build a stack use this instead of one-shot probing.
///
/// Backoff: 100ms, 200ms, 400ms, ... capped at 2 seconds, bounded overall by
/// `total_timeout`.
pub async fn check_daemon_with_retry(
    client: &DockerClient,
    max_attempts: u32,
    total_timeout: Duration,
) -> bool {
    use tokio::time::{sleep, timeout};

    let start = std::time::Instant::now();
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=max_attempts {
        if start.elapsed() >= total_timeout {
            tracing::debug!(
                "Docker daemon health check timeout after {:?}",
                start.elapsed()
            );
            return false;
        }

        let remaining = total_timeout.saturating_sub(start.elapsed());
        let check = timeout(remaining, client.daemon_healthy(Duration::from_secs(2))).await;

        match check {
            Ok(true) => {
                if attempt > 1 {
                    tracing::info!(
                        "Docker daemon became healthy after {} attempts ({:?})",
                        attempt,
                        start.elapsed()
                    );
                }
                return true;
            }
            Ok(false) | Err(_) => {
                if attempt < max_attempts {
                    tracing::debug!(
                        "Docker daemon health check attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                } else {
                    tracing::warn!(
                        "Docker daemon unhealthy after {} attempts ({:?})",
                        max_attempts,
                        start.elapsed()
                    );
                }
            }
        }
    }

    false
}
