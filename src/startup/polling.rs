//! Fixed-interval polling

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::Error;

/// Poll until `poll_fn` succeeds, with no timeout and no attempt limit.
///
/// Errors are logged and the poll is retried after `interval`. Returns the
/// first successful value.
pub async fn poll_until_ready<T, F, Fut>(description: &str, interval: Duration, mut poll_fn: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    loop {
        match poll_fn().await {
            Ok(value) => return value,
            Err(e) => {
                error!(error = %e, "Failed to get {}, retrying", description);
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn returns_first_success() {
        let value = poll_until_ready("answer", Duration::from_millis(1), || async {
            Ok::<_, Error>(42)
        })
        .await;
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn retries_through_errors() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let value = poll_until_ready("flaky", Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(Error::registry("not yet"))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(value, 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }
}
