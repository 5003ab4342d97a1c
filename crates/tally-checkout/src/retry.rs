//! Busy-database retry loop shared by every write the services make.

use std::future::Future;

use backoff::backoff::Backoff;
use tracing::{debug, warn};

use crate::error::{CheckoutError, CheckoutResult};
use crate::settings::CheckoutSettings;

/// Runs `attempt` until it stops failing with a busy database.
///
/// Each attempt must be a whole transaction. After `max_attempts` busy
/// failures the caller gets `ConcurrencyConflict`.
pub(crate) async fn retry_busy<T, F, Fut>(
    settings: &CheckoutSettings,
    operation: &'static str,
    mut attempt: F,
) -> CheckoutResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CheckoutResult<T>>,
{
    let mut backoff = settings.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match attempt().await {
            Err(e) if e.is_transient() => {
                if attempts >= settings.max_attempts {
                    warn!(operation, attempts, error = %e, "Giving up on busy database");
                    return Err(CheckoutError::ConcurrencyConflict { attempts });
                }
                let delay = backoff.next_backoff().unwrap_or(settings.max_backoff);
                debug!(operation, attempt = attempts, ?delay, "Database busy, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tally_db::DbError;

    fn fast() -> CheckoutSettings {
        CheckoutSettings {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_busy_then_success() {
        let mut calls = 0;
        let result = retry_busy(&fast(), "test", || {
            calls += 1;
            let n = calls;
            async move {
                if n < 3 {
                    Err(CheckoutError::from(DbError::Busy("database is locked".into())))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut calls = 0;
        let result: CheckoutResult<()> = retry_busy(&fast(), "test", || {
            calls += 1;
            async { Err(CheckoutError::from(DbError::Busy("database is locked".into()))) }
        })
        .await;

        assert!(matches!(result, Err(CheckoutError::ConcurrencyConflict { attempts: 3 })));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_refusals_are_not_retried() {
        let mut calls = 0;
        let result: CheckoutResult<()> = retry_busy(&fast(), "test", || {
            calls += 1;
            async { Err(CheckoutError::not_found("Sale", "s1")) }
        })
        .await;

        assert!(matches!(result, Err(CheckoutError::NotFound { .. })));
        assert_eq!(calls, 1);
    }
}
