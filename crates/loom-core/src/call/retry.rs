//! Single-attempt and retrying executors
//!
//! `timed_call` runs one attempt: optional delay, optional timeout, error-map
//! handling and default substitution. `retry_call` layers the retry loop on
//! the same attempt primitive; the initial delay applies to the first attempt
//! only and each failed attempt sleeps `retry_delay`, which is then multiplied
//! by `backoff_factor`.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::call::{secs, CallOutput, CallParams, RetryConfig};
use crate::errors::AgentError;

async fn attempt<T, Fut>(config: &RetryConfig, delay: Duration, future: Fut) -> Result<T, AgentError>
where
    Fut: Future<Output = Result<T, AgentError>>,
{
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    match config.timeout {
        Some(limit) => match tokio::time::timeout(secs(limit), future).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Timeout {
                seconds: limit,
                message: config.message_prefix(),
            }),
        },
        None => future.await,
    }
}

fn finish<T>(config: &RetryConfig, start: Instant, value: Option<T>, attempts: u32) -> CallOutput<T> {
    CallOutput {
        value,
        elapsed: config.timing.then(|| start.elapsed()),
        attempts,
    }
}

/// Runs `operation` once under the delay, timeout, error map and default of
/// `params`.
pub async fn timed_call<T, F, Fut>(params: &CallParams<T>, operation: F) -> Result<CallOutput<T>, AgentError>
where
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let config = &params.config;
    let start = Instant::now();

    let err = match attempt(config, secs(config.delay), operation()).await {
        Ok(value) => return Ok(finish(config, start, Some(value), 1)),
        Err(err) => err,
    };

    if params.error_map.handle(&err) {
        log::debug!("Error handled by error map: {}", err);
        return Ok(finish(config, start, None, 1));
    }

    if let Some(default) = &params.default {
        log::debug!("Call failed, returning default: {}", err);
        return Ok(finish(config, start, Some(default.clone()), 1));
    }

    Err(match err {
        timeout @ AgentError::Timeout { .. } => timeout,
        other => match &config.error_msg {
            Some(prefix) => AgentError::ExecutionError(format!("{} Error: {}", prefix, other)),
            None => AgentError::ExecutionError(format!(
                "An error occurred in async execution: {}",
                other
            )),
        },
    })
}

/// Runs `operation` up to `num_retries + 1` times.
///
/// Errors whose kind appears in the error map are reported to their handler
/// and end the call with a `None` value; they are never retried. When every
/// attempt fails the configured default is returned, otherwise
/// `RetriesExhausted` carrying the last error.
pub async fn retry_call<T, F, Fut>(params: &CallParams<T>, mut operation: F) -> Result<CallOutput<T>, AgentError>
where
    T: Clone,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AgentError>>,
{
    let config = &params.config;
    let start = Instant::now();
    let total_attempts = config.num_retries.saturating_add(1);
    let mut retry_delay = secs(config.retry_delay);
    let mut attempts = 0;

    loop {
        attempts += 1;
        let delay = if attempts == 1 {
            secs(config.delay)
        } else {
            Duration::ZERO
        };

        let err = match attempt(config, delay, operation()).await {
            Ok(value) => return Ok(finish(config, start, Some(value), attempts)),
            Err(err) => err,
        };

        if params.error_map.handle(&err) {
            log::debug!("Attempt {} handled by error map: {}", attempts, err);
            return Ok(finish(config, start, None, attempts));
        }

        if attempts < total_attempts {
            if config.verbose {
                log::warn!(
                    "Attempt {}/{} failed: {}, retrying...",
                    attempts,
                    total_attempts,
                    err
                );
            }
            if !retry_delay.is_zero() {
                tokio::time::sleep(retry_delay).await;
            }
            retry_delay = secs(retry_delay.as_secs_f64() * config.backoff_factor);
            continue;
        }

        if let Some(default) = &params.default {
            log::debug!(
                "All {} attempts failed, returning default: {}",
                attempts,
                err
            );
            return Ok(finish(config, start, Some(default.clone()), attempts));
        }

        return Err(AgentError::RetriesExhausted {
            attempts,
            message: format!(
                "{}Operation failed after {} attempts: {}",
                config.message_prefix(),
                attempts,
                err
            ),
        });
    }
}

/// Retries a synchronous operation, running every attempt on the blocking
/// worker pool. A timed-out attempt stops being awaited but the worker thread
/// runs to completion in the background.
pub async fn retry_call_blocking<T, F>(params: &CallParams<T>, operation: F) -> Result<CallOutput<T>, AgentError>
where
    T: Clone + Send + 'static,
    F: Fn() -> Result<T, AgentError> + Send + Sync + 'static,
{
    let operation = Arc::new(operation);
    retry_call(params, || {
        let operation = operation.clone();
        async move {
            tokio::task::spawn_blocking(move || operation())
                .await
                .map_err(|e| AgentError::ExecutionError(format!("Blocking worker failed: {}", e)))?
        }
    })
    .await
}
