//! Bounded retry for destroy operations on kernel resources.
//!
//! VNIC and zvol teardown runs right after the hypervisor is destroyed, and the
//! kernel releases those resources asynchronously, so `delete-vnic` and
//! `zfs destroy` report busy for a few seconds.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::BuildError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            pause: Duration::from_secs(5),
        }
    }
}

/// Run `op` until it succeeds or `policy.attempts` are used up, sleeping
/// `policy.pause` between attempts (never after the last one).
///
/// Returns the number of attempts taken, or [`BuildError::ResourceBusy`] once
/// every attempt failed. The last failure is logged. Whatever `op` returns on
/// success is discarded.
pub async fn destroy_with_retry<F, Fut, T>(
    resource: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<u32, BuildError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BuildError>>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match op().await {
            Ok(_) => return Ok(attempt),
            Err(e) if attempt == attempts => {
                warn!(resource, attempts, error = %e, "giving up on destroy");
            }
            Err(e) => {
                debug!(resource, attempt, error = %e, "destroy failed, retrying");
                tokio::time::sleep(policy.pause).await;
            }
        }
    }

    Err(BuildError::ResourceBusy {
        resource: resource.to_string(),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn busy() -> BuildError {
        BuildError::ExternalCommand {
            program: "dladm".to_string(),
            stderr: "link busy".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_busy_is_attempted_four_times_then_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = tokio::time::Instant::now();

        let result = destroy_with_retry("vnic packer0", RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(busy())
            }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(
            result,
            Err(BuildError::ResourceBusy { attempts: 4, .. })
        ));
        assert_eq!(
            started.elapsed(),
            Duration::from_secs(15),
            "three pauses between four attempts"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = destroy_with_retry("zvol", RetryPolicy::default(), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy())
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn command_output_is_discarded_on_success() {
        let result = destroy_with_retry("zvol zones/packer-omnios", RetryPolicy::default(), || async {
            Ok::<_, BuildError>("destroyed\n".to_string())
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}
