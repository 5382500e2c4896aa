use std::future::Future;
use std::time::Duration;

use rk_config::RetryConfig;

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `on_retry(retry, &err, delay)` is called before each backoff sleep, with
/// `retry` counting from 1. The last error is returned once attempts are
/// exhausted.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryConfig,
    mut op: F,
    mut on_retry: impl FnMut(u32, &E, Duration),
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                let delay = policy.backoff_for(attempt);
                on_retry(attempt, &e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            initial_backoff: "100ms".parse().unwrap(),
            max_backoff: "1s".parse().unwrap(),
            max_attempts,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0u32);
        let mut delays = Vec::new();
        let started = tokio::time::Instant::now();
        let result: Result<u32, &str> = retry_with_backoff(
            &policy(5),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { if n < 3 { Err("busy") } else { Ok(n) } }
            },
            |_, _, delay| delays.push(delay),
        )
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(
            delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Cell::new(0u32);
        let mut retries = 0;
        let result: Result<(), String> = retry_with_backoff(
            &policy(3),
            || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move { Err(format!("failure {n}")) }
            },
            |_, _, _| retries += 1,
        )
        .await;
        assert_eq!(result, Err("failure 3".to_string()));
        assert_eq!(calls.get(), 3);
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn single_attempt_never_sleeps() {
        let result: Result<(), &str> =
            retry_with_backoff(&policy(1), || async { Err("down") }, |_, _, _| {
                panic!("no retry expected")
            })
            .await;
        assert_eq!(result, Err("down"));
    }
}
