use alb_controller_core::{Error, Result};
use std::{future::Future, time::Duration};
use tokio::time::{self, Instant};

/// Bounds for a polling loop: how often to probe and how long to keep
/// trying. Waiters never spawn background tasks; they run inline in the
/// reconcile and die with it when the task is cancelled.
#[derive(Copy, Clone, Debug)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Runs `action` until it succeeds, retrying only while the error satisfies
/// `retryable` and the deadline allows another attempt. The terminal error
/// is returned unchanged.
pub async fn retry_while<T, F, Fut>(
    settings: PollSettings,
    retryable: impl Fn(&Error) -> bool,
    mut action: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + settings.timeout;
    loop {
        match action().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && Instant::now() + settings.interval <= deadline => {
                tracing::debug!(%err, "Retrying");
                time::sleep(settings.interval).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Polls `probe` until it yields a value or the deadline passes, in which
/// case `on_timeout` supplies the error (typically a `RequeueAfter`).
pub async fn wait_for<T, F, Fut>(
    settings: PollSettings,
    mut probe: F,
    on_timeout: impl FnOnce() -> Error,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + settings.timeout;
    loop {
        if let Some(value) = probe().await? {
            return Ok(value);
        }
        if Instant::now() + settings.interval > deadline {
            return Err(on_timeout());
        }
        time::sleep(settings.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_while, wait_for, PollSettings};
    use alb_controller_core::Error;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use std::time::Duration;

    fn settings() -> PollSettings {
        PollSettings::new(Duration::from_secs(5), Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_while_in_use_then_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let out = retry_while(settings(), Error::is_in_use, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                    Err(Error::cloud("ResourceInUse", "still attached"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(out.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn surfaces_the_error_after_the_deadline() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let out: Result<(), _> = retry_while(settings(), Error::is_in_use, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::cloud("ResourceInUse", "still attached"))
            }
        })
        .await;
        assert!(out.unwrap_err().is_in_use());
        // 30s ceiling at a 5s interval: the first attempt plus six retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_errors_propagate_immediately() {
        let out: Result<(), _> = retry_while(settings(), Error::is_in_use, || async {
            Err(Error::cloud("ValidationError", "bad input"))
        })
        .await;
        assert!(!out.unwrap_err().is_in_use());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_times_out_with_the_fallback() {
        let out: Result<(), _> = wait_for(
            settings(),
            || async { Ok(None) },
            || Error::RequeueAfter(Duration::from_secs(30)),
        )
        .await;
        assert_eq!(
            out.unwrap_err(),
            Error::RequeueAfter(Duration::from_secs(30))
        );
    }
}
