use std::future::Future;

use log::warn;
use tokio::sync::{Semaphore, SemaphorePermit};

use super::{
    cancel::CancelSignal,
    error::{Result, TreeError},
};
use crate::configuration::QueryPolicy;

/// Runs one provider call under `policy`: each attempt is bounded by the
/// timeout, transient failures are retried with exponential backoff, and every
/// wait gives up as soon as the build is cancelled.
pub async fn guarded<T, F, Fut>(
    policy: &QueryPolicy,
    cancel: &CancelSignal,
    query: &'static str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut backoff = policy.initial_backoff;

    loop {
        if cancel.is_cancelled() {
            return Err(TreeError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(TreeError::Cancelled),
            outcome = tokio::time::timeout(policy.timeout, op()) => match outcome {
                Ok(result) => result,
                Err(_) => Err(TreeError::QueryTimeout { query, timeout: policy.timeout }),
            },
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                warn!(
                    "{} (attempt {} of {}), retrying in {:?}",
                    e,
                    attempt,
                    policy.max_retries + 1,
                    backoff
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(TreeError::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }

                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Waits for a limiter permit unless the build is cancelled first.
pub async fn acquire<'a>(limiter: &'a Semaphore, cancel: &CancelSignal) -> Result<SemaphorePermit<'a>> {
    if cancel.is_cancelled() {
        return Err(TreeError::Cancelled);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(TreeError::Cancelled),
        permit = limiter.acquire() => permit.map_err(|_| TreeError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicU32, Ordering},
        time::Duration,
    };

    use super::*;

    fn fast_policy(max_retries: u32) -> QueryPolicy {
        QueryPolicy {
            timeout: Duration::from_millis(50),
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let cancel = CancelSignal::new();

        let result = guarded(&fast_policy(3), &cancel, "node_stats", move || async move {
            if counter.fetch_add(1, Ordering::AcqRel) < 2 {
                Err(TreeError::QueryFailed { query: "node_stats", message: "reset".into() })
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let cancel = CancelSignal::new();

        let result: Result<()> = guarded(&fast_policy(2), &cancel, "node_stats", move || async move {
            counter.fetch_add(1, Ordering::AcqRel);
            Err(TreeError::QueryFailed { query: "node_stats", message: "down".into() })
        })
        .await;

        assert!(matches!(result, Err(TreeError::QueryFailed { .. })));
        assert_eq!(attempts.load(Ordering::Acquire), 3);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let counter = &attempts;
        let cancel = CancelSignal::new();

        let result: Result<()> = guarded(&fast_policy(5), &cancel, "distinct_values", move || async move {
            counter.fetch_add(1, Ordering::AcqRel);
            Err(TreeError::UnknownColumn("t.x".into()))
        })
        .await;

        assert!(matches!(result, Err(TreeError::UnknownColumn(_))));
        assert_eq!(attempts.load(Ordering::Acquire), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let cancel = CancelSignal::new();

        let result: Result<()> = guarded(&fast_policy(1), &cancel, "node_stats", || async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TreeError::QueryTimeout { query: "node_stats", .. })));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_query() {
        let cancel = CancelSignal::new();
        let policy = QueryPolicy {
            timeout: Duration::from_secs(60),
            ..fast_policy(0)
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: Result<()> = guarded(&policy, &cancel, "node_stats", || async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(TreeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_acquire_respects_cancel() {
        let limiter = Semaphore::new(1);
        let cancel = CancelSignal::new();

        let held = acquire(&limiter, &cancel).await.unwrap();
        cancel.cancel();

        assert!(matches!(acquire(&limiter, &cancel).await, Err(TreeError::Cancelled)));
        drop(held);
    }
}
