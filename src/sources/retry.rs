//! Rate-limit and backoff handling shared by the sync phases.

use super::FetchError;
use super::cancel::CancelSignal;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How a fetch that may be retried ended.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    Ready(T),
    /// Transient failures exceeded the attempt cap.
    Exhausted { attempts: u32, last_error: String },
    /// The cancel signal fired before a result was available.
    Cancelled,
    /// The source reported an error that retrying cannot fix.
    Fatal(String),
}

/// Retry rules for one fetch call.
///
/// - `RateLimited`: sleep exactly the requested duration, then repeat the
///   request. The attempt counter is untouched.
/// - `Transient`: run the caller's flush hook first, then sleep
///   `base * 2^attempt` (capped at `max_delay`). After `max_attempts` retries
///   the next transient failure gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max_delay)
    }

    /// Drive `fetch` until it yields, hits a fatal error, runs out of
    /// attempts, or `cancel` fires. `on_transient` is invoked once per
    /// transient failure before backing off; its error aborts the loop.
    pub async fn run<T, E, F, Fut, G>(
        &self,
        cancel: &CancelSignal,
        mut fetch: F,
        mut on_transient: G,
    ) -> Result<RetryOutcome<T>, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        G: FnMut() -> Result<(), E>,
    {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(RetryOutcome::Cancelled);
            }
            let delay = match fetch().await {
                Ok(value) => return Ok(RetryOutcome::Ready(value)),
                Err(FetchError::Fatal(msg)) => return Ok(RetryOutcome::Fatal(msg)),
                Err(FetchError::RateLimited { retry_after }) => {
                    warn!(
                        wait_secs = retry_after.as_secs_f64(),
                        "rate limited by source, waiting"
                    );
                    retry_after
                }
                Err(FetchError::Transient(msg)) => {
                    on_transient()?;
                    if attempt >= self.max_attempts {
                        warn!(attempts = attempt, error = %msg, "giving up after repeated source errors");
                        return Ok(RetryOutcome::Exhausted {
                            attempts: attempt,
                            last_error: msg,
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %msg,
                        "source error, backing off"
                    );
                    delay
                }
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => return Ok(RetryOutcome::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::convert::Infallible;
    use std::sync::Mutex;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            max_attempts: 3,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(p.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(p.backoff_delay(2), Duration::from_millis(250));
        assert_eq!(p.backoff_delay(40), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_exactly_and_does_not_count() {
        let script = Mutex::new(VecDeque::from(vec![
            Err(FetchError::RateLimited {
                retry_after: Duration::from_secs(30),
            }),
            Err(FetchError::RateLimited {
                retry_after: Duration::from_secs(30),
            }),
            Err(FetchError::RateLimited {
                retry_after: Duration::from_secs(30),
            }),
            Err(FetchError::RateLimited {
                retry_after: Duration::from_secs(30),
            }),
            Ok(7),
        ]));
        let flushes = Cell::new(0);
        let started = tokio::time::Instant::now();

        let outcome = policy()
            .run(
                &CancelSignal::new(),
                || {
                    let next = script.lock().unwrap().pop_front().unwrap();
                    async move { next }
                },
                || {
                    flushes.set(flushes.get() + 1);
                    Ok::<(), Infallible>(())
                },
            )
            .await
            .unwrap();

        // Four rate limits exceed max_attempts (3) yet still succeed.
        assert_eq!(outcome, RetryOutcome::Ready(7));
        assert_eq!(started.elapsed(), Duration::from_secs(120));
        assert_eq!(flushes.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_flush_and_exhaust() {
        let calls = Cell::new(0);
        let flushes = Cell::new(0);

        let outcome: RetryOutcome<()> = policy()
            .run(
                &CancelSignal::new(),
                || {
                    calls.set(calls.get() + 1);
                    async { Err(FetchError::Transient("boom".into())) }
                },
                || {
                    flushes.set(flushes.get() + 1);
                    Ok::<(), Infallible>(())
                },
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                attempts: 3,
                last_error: "boom".into()
            }
        );
        assert_eq!(calls.get(), 4);
        assert_eq!(flushes.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_is_not_retried() {
        let calls = Cell::new(0);
        let outcome: RetryOutcome<()> = policy()
            .run(
                &CancelSignal::new(),
                || {
                    calls.set(calls.get() + 1);
                    async { Err(FetchError::Fatal("private".into())) }
                },
                || Ok::<(), Infallible>(()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Fatal("private".into()));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_backoff() {
        let cancel = CancelSignal::new();
        let trigger = cancel.clone();
        let outcome: RetryOutcome<()> = policy()
            .run(
                &cancel,
                || {
                    trigger.cancel();
                    async {
                        Err(FetchError::RateLimited {
                            retry_after: Duration::from_secs(3600),
                        })
                    }
                },
                || Ok::<(), Infallible>(()),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RetryOutcome::Cancelled);
    }

    #[tokio::test]
    async fn flush_error_aborts() {
        let outcome = policy()
            .run(
                &CancelSignal::new(),
                || async { Err::<(), _>(FetchError::Transient("x".into())) },
                || Err("disk full"),
            )
            .await;
        assert_eq!(outcome, Err("disk full"));
    }
}
