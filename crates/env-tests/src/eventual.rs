//! Eventual consistency helpers for timing-dependent tests.
//!
//! Policy agents program the dataplane some time after a resource is
//! created, and deletions are finalized asynchronously. Tests that observe
//! either retry with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Categories of eventual consistency with documented bounds.
#[derive(Debug, Clone, Copy)]
pub enum ConsistencyCategory {
    /// Network policy or firewall rule reaching the dataplane (2x 5s = 10s)
    PolicyPropagation,

    /// Deleted resource disappearing from the API server (2x 15s = 30s)
    ResourceCleanup,

    /// Peering status and remapped CIDRs after a cluster joins (2x 30s = 60s)
    PeeringUpdate,
}

impl ConsistencyCategory {
    /// Get the maximum timeout for this consistency category.
    pub fn timeout(&self) -> Duration {
        match self {
            ConsistencyCategory::PolicyPropagation => Duration::from_secs(10),
            ConsistencyCategory::ResourceCleanup => Duration::from_secs(30),
            ConsistencyCategory::PeeringUpdate => Duration::from_secs(60),
        }
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(500)
    }
}

/// Assert that a condition becomes true within the timeout for the given consistency category.
///
/// Retries start after 500ms and double each time, capped at the remaining time.
///
/// # Example
///
/// ```no_run
/// use env_tests::eventual::{assert_eventually, ConsistencyCategory};
///
/// # async fn example(provisioner: impl Fn() -> bool) {
/// assert_eventually(ConsistencyCategory::ResourceCleanup, || async { provisioner() })
///     .await
///     .expect("Resource should be gone within timeout");
/// # }
/// ```
pub async fn assert_eventually<F, Fut>(
    category: ConsistencyCategory,
    mut condition: F,
) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let timeout = category.timeout();
    let mut delay = category.initial_delay();
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!(
                "Condition not met within {:?} (category: {:?})",
                timeout, category
            ));
        }

        sleep(delay).await;

        delay *= 2;
        let remaining = timeout.saturating_sub(start.elapsed());
        if delay > remaining {
            delay = remaining;
        }
    }
}
