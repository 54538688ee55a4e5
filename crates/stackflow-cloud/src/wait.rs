//! Bounded status polling
//!
//! Long-running resources (database, instance, deletions) are polled at a
//! fixed interval until they reach a target status or the attempt budget runs
//! out. A terminal failure status ends the wait early.

use crate::error::{CloudError, Result};
use crate::provider::ResourceStatus;
use stackflow_config::WaitConfig;
use std::future::Future;
use tokio::time::sleep;

/// Poll `probe` until it reports a status satisfying `target`
///
/// # Arguments
/// * `resource` - Human readable name used in logs and errors
/// * `target` - Status to wait for (`Deleted` also accepts `Absent`)
/// * `config` - Attempt budget and interval
/// * `probe` - Returns the current status; errors abort the wait
///
/// # Returns
/// * `Ok(status)` - The observed status that satisfied the target
/// * `Err(CloudError::Timeout)` - Budget exhausted
/// * `Err(CloudError::ResourceFailed)` - Provider reported a failed state
pub async fn wait_for_status<F, Fut>(
    resource: &str,
    target: ResourceStatus,
    config: &WaitConfig,
    mut probe: F,
) -> Result<ResourceStatus>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ResourceStatus>>,
{
    let mut last = None;

    for attempt in 0..config.max_attempts {
        let status = probe().await?;

        if status.satisfies(target) {
            tracing::debug!(
                "{} reached {} after {} attempt(s)",
                resource,
                status,
                attempt + 1
            );
            return Ok(status);
        }

        if status == ResourceStatus::Failed && target != ResourceStatus::Failed {
            return Err(CloudError::ResourceFailed {
                resource: resource.to_string(),
                detail: format!("status {} while waiting for {}", status, target),
            });
        }

        if last != Some(status) {
            tracing::info!("Waiting for {} to become {} (now {})", resource, target, status);
            last = Some(status);
        }

        if attempt + 1 < config.max_attempts {
            sleep(config.interval()).await;
        }
    }

    Err(CloudError::Timeout {
        resource: resource.to_string(),
        target,
        attempts: config.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: WaitConfig = WaitConfig::new(5, 1);

    #[tokio::test]
    async fn test_returns_when_target_reached() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let status = wait_for_status("db", ResourceStatus::Available, &FAST, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(if n < 2 {
                ResourceStatus::Creating
            } else {
                ResourceStatus::Available
            })
        })
        .await
        .unwrap();

        assert_eq!(status, ResourceStatus::Available);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout_after_budget() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = wait_for_status("db", ResourceStatus::Available, &FAST, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceStatus::Creating)
        })
        .await;

        assert!(matches!(
            result,
            Err(CloudError::Timeout { attempts: 5, .. })
        ));
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_failed_status_stops_early() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = wait_for_status("db", ResourceStatus::Available, &FAST, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResourceStatus::Failed)
        })
        .await;

        assert!(matches!(result, Err(CloudError::ResourceFailed { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deleted_target_accepts_absent() {
        let status = wait_for_status("instance", ResourceStatus::Deleted, &FAST, || async {
            Ok(ResourceStatus::Absent)
        })
        .await
        .unwrap();
        assert_eq!(status, ResourceStatus::Absent);
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let result = wait_for_status("db", ResourceStatus::Available, &FAST, || async {
            Err(CloudError::api("DescribeDBInstances", "throttled"))
        })
        .await;
        assert!(matches!(result, Err(CloudError::ApiError { .. })));
    }
}
