//! Bounded-concurrency fan-out over a collection of inputs
//!
//! Every item goes through [`retry_call`] with the same call parameters, so
//! per-item retry, timeout, default and error-map semantics are identical to
//! a single wrapped call. Results are always returned in input order no
//! matter which item finishes first.
//!
//! When no default is configured, every item still runs to completion and
//! the error of the lowest-index failed item is returned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::call::{retry_call, secs, CallOutput, CallParams};
use crate::errors::AgentError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MapCallConfig {
    /// Maximum number of items in flight at once. Unbounded when unset.
    #[serde(default)]
    pub max_concurrent: Option<usize>,
    /// Pause between dispatching consecutive items, in seconds.
    #[serde(default)]
    pub throttle_period: Option<f64>,
    /// Chunk size for [`batch_call`].
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub flatten: bool,
    #[serde(default)]
    pub dropna: bool,
    #[serde(default)]
    pub unique: bool,
}

impl MapCallConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    pub fn with_throttle_period(mut self, seconds: f64) -> Self {
        self.throttle_period = Some(seconds);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn flattened(mut self) -> Self {
        self.flatten = true;
        self
    }

    pub fn dropping_nulls(mut self) -> Self {
        self.dropna = true;
        self
    }

    pub fn deduplicated(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct MapCallParams<T> {
    pub call: CallParams<T>,
    pub config: MapCallConfig,
}

impl<T> Default for MapCallParams<T> {
    fn default() -> Self {
        Self {
            call: CallParams::default(),
            config: MapCallConfig::default(),
        }
    }
}

impl<T> MapCallParams<T> {
    pub fn new(call: CallParams<T>, config: MapCallConfig) -> Self {
        Self { call, config }
    }
}

/// How a value takes part in flattening and null removal.
///
/// Scalars keep the default behaviour: they are never null and flatten to
/// themselves.
pub trait Shape: Sized {
    fn flatten_into(self, out: &mut Vec<Self>) {
        out.push(self);
    }

    fn is_null(&self) -> bool {
        false
    }
}

impl Shape for Value {
    fn flatten_into(self, out: &mut Vec<Self>) {
        match self {
            Value::Array(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
            other => out.push(other),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl<T: Shape> Shape for Option<T> {
    fn is_null(&self) -> bool {
        match self {
            Some(value) => value.is_null(),
            None => true,
        }
    }
}

macro_rules! scalar_shape {
    ($($ty:ty),*) => {
        $(impl Shape for $ty {})*
    };
}

scalar_shape!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, String, &'static str);

fn normalize_items<I: Shape>(items: Vec<I>, dropna: bool) -> Vec<I> {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        item.flatten_into(&mut flat);
    }
    if dropna {
        flat.retain(|item| !item.is_null());
    }
    flat
}

/// Normalises a JSON value into a list: arrays are expanded (recursively
/// when `flatten` is set), any other value becomes a single element.
pub fn to_list(value: Value, flatten: bool, dropna: bool) -> Vec<Value> {
    let mut out = match value {
        Value::Array(items) if flatten => {
            let mut flat = Vec::new();
            for item in items {
                item.flatten_into(&mut flat);
            }
            flat
        }
        Value::Array(items) => items,
        other => vec![other],
    };
    if dropna {
        out.retain(|item| !item.is_null());
    }
    out
}

/// Applies `operation` to every item and returns the full per-item outputs
/// in input order, including attempt counts and timings.
pub async fn map_call_outputs<I, T, F, Fut>(
    items: Vec<I>,
    operation: F,
    params: &MapCallParams<T>,
) -> Result<Vec<CallOutput<T>>, AgentError>
where
    I: Shape + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
{
    let items = normalize_items(items, params.config.dropna);
    let total = items.len();
    let operation = Arc::new(operation);
    let call = Arc::new(params.call.clone());
    let semaphore = params
        .config
        .max_concurrent
        .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
    let throttle = params
        .config
        .throttle_period
        .map(secs)
        .filter(|period| !period.is_zero());

    log::debug!(
        "Dispatching {} items (max_concurrent: {:?})",
        total,
        params.config.max_concurrent
    );

    let mut tasks = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        if index > 0 {
            if let Some(period) = throttle {
                tokio::time::sleep(period).await;
            }
        }

        let permit = match &semaphore {
            Some(semaphore) => Some(semaphore.clone().acquire_owned().await.map_err(|e| {
                AgentError::ExecutionError(format!("Concurrency limiter closed: {}", e))
            })?),
            None => None,
        };

        let operation = operation.clone();
        let call = call.clone();
        tasks.spawn(async move {
            let outcome = retry_call(&call, || operation(item.clone())).await;
            drop(permit);
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<Result<CallOutput<T>, AgentError>>> = (0..total).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        let (index, outcome) = joined
            .map_err(|e| AgentError::ExecutionError(format!("Batch item task failed: {}", e)))?;
        slots[index] = Some(outcome);
    }

    let mut outputs = Vec::with_capacity(total);
    for (index, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(Ok(output)) => outputs.push(output),
            Some(Err(err)) => {
                log::warn!("Item {} of {} failed: {}", index, total, err);
                return Err(err);
            }
            None => {
                return Err(AgentError::ExecutionError(format!(
                    "Batch item {} never reported a result",
                    index
                )))
            }
        }
    }
    Ok(outputs)
}

fn shape_results<T>(outputs: Vec<CallOutput<T>>, config: &MapCallConfig) -> Vec<Option<T>>
where
    T: Shape + PartialEq,
{
    let mut results: Vec<Option<T>> = Vec::with_capacity(outputs.len());
    for output in outputs {
        match output.value {
            Some(value) if config.flatten => {
                let mut flat = Vec::new();
                value.flatten_into(&mut flat);
                results.extend(flat.into_iter().map(Some));
            }
            value => results.push(value),
        }
    }

    if config.dropna {
        results.retain(|value| !value.is_null());
    }

    if config.unique {
        let mut seen: Vec<Option<T>> = Vec::with_capacity(results.len());
        for value in results {
            if !seen.contains(&value) {
                seen.push(value);
            }
        }
        results = seen;
    }

    results
}

/// Applies `operation` to every item and returns the post-processed values
/// in input order. A `None` slot is an item whose failure was absorbed by an
/// error-map handler.
pub async fn map_call<I, T, F, Fut>(
    items: Vec<I>,
    operation: F,
    params: &MapCallParams<T>,
) -> Result<Vec<Option<T>>, AgentError>
where
    I: Shape + Clone + Send + Sync + 'static,
    T: Shape + PartialEq + Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
{
    let outputs = map_call_outputs(items, operation, params).await?;
    Ok(shape_results(outputs, &params.config))
}

pub type BatchStream<T> = Pin<Box<dyn Stream<Item = Result<Vec<Option<T>>, AgentError>> + Send>>;

/// Splits the input into chunks of `batch_size` and yields one result group
/// per chunk. A chunk only starts once the previous group has been consumed,
/// and a failed chunk is yielded as an error without stopping later chunks.
pub fn batch_call<I, T, F, Fut>(items: Vec<I>, operation: F, params: MapCallParams<T>) -> BatchStream<T>
where
    I: Shape + Clone + Send + Sync + 'static,
    T: Shape + PartialEq + Clone + Send + Sync + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, AgentError>> + Send + 'static,
{
    let items = normalize_items(items, params.config.dropna);
    let batch_size = params.config.batch_size.unwrap_or(items.len()).max(1);
    let operation = Arc::new(operation);
    // Duplicates are removed across the whole stream, not per chunk.
    let unique = params.config.unique;
    let mut params = params;
    params.config.unique = false;

    Box::pin(async_stream::stream! {
        let mut remaining = items.into_iter().peekable();
        let mut seen: Vec<Option<T>> = Vec::new();
        let mut chunk_index = 0;
        while remaining.peek().is_some() {
            let chunk: Vec<I> = remaining.by_ref().take(batch_size).collect();
            log::debug!("Processing batch chunk {} ({} items)", chunk_index, chunk.len());
            let operation = operation.clone();
            let result = map_call(chunk, move |item| operation(item), &params).await;
            chunk_index += 1;
            yield match result {
                Ok(values) if unique => {
                    let mut fresh = Vec::with_capacity(values.len());
                    for value in values {
                        if !seen.contains(&value) {
                            seen.push(value.clone());
                            fresh.push(value);
                        }
                    }
                    Ok(fresh)
                }
                other => other,
            };
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::RetryConfig;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_results_keep_input_order() {
        let params = MapCallParams::default();
        let results = map_call(
            vec![5u64, 1, 3],
            |n| async move {
                tokio::time::sleep(Duration::from_millis(n * 10)).await;
                Ok(n * 2)
            },
            &params,
        )
        .await
        .unwrap();

        assert_eq!(results, vec![Some(10), Some(2), Some(6)]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_cap() {
        for cap in [1usize, 2, 4] {
            let in_flight = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));
            let params = MapCallParams::new(
                CallParams::default(),
                MapCallConfig::default().with_max_concurrent(cap),
            );

            let (in_flight_op, peak_op) = (in_flight.clone(), peak.clone());
            let results = map_call(
                (0..12i32).collect(),
                move |n| {
                    let in_flight = in_flight_op.clone();
                    let peak = peak_op.clone();
                    async move {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        Ok(n)
                    }
                },
                &params,
            )
            .await
            .unwrap();

            assert_eq!(results.len(), 12);
            assert!(peak.load(Ordering::SeqCst) <= cap);
        }
    }

    #[tokio::test]
    async fn test_lowest_index_failure_is_returned_after_all_items_run() {
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();
        let params = MapCallParams::default();

        let err = map_call(
            vec![0i32, 1, 2, 3],
            move |n| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    match n {
                        1 => Err(AgentError::ExecutionError("first".into())),
                        3 => Err(AgentError::ExecutionError("second".into())),
                        _ => Ok(n),
                    }
                }
            },
            &params,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("first"));
        assert_eq!(completed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_default_fills_failed_slot() {
        let params = MapCallParams::new(
            CallParams::new(RetryConfig::default().with_retries(1)).with_default(-1),
            MapCallConfig::default(),
        );

        let results = map_call(
            vec![1i32, 2, 3],
            |n| async move {
                if n == 2 {
                    Err(AgentError::ExecutionError("two".into()))
                } else {
                    Ok(n)
                }
            },
            &params,
        )
        .await
        .unwrap();

        assert_eq!(results, vec![Some(1), Some(-1), Some(3)]);
    }

    #[tokio::test]
    async fn test_flatten_dropna_unique() {
        let params = MapCallParams::new(
            CallParams::default(),
            MapCallConfig::default().flattened().dropping_nulls().deduplicated(),
        );

        let results = map_call(
            vec![json!(1), json!(2), json!(3)],
            |v| async move {
                match v.as_i64() {
                    Some(1) => Ok(json!([1, [2, null]])),
                    Some(2) => Ok(json!(null)),
                    _ => Ok(json!([2, 3])),
                }
            },
            &params,
        )
        .await
        .unwrap();

        assert_eq!(results, vec![Some(json!(1)), Some(json!(2)), Some(json!(3))]);
    }

    #[tokio::test]
    async fn test_input_is_flattened_and_nulls_dropped() {
        let params = MapCallParams::new(CallParams::default(), MapCallConfig::default().dropping_nulls());
        let results = map_call(
            vec![json!([1, [2]]), json!(null), json!(3)],
            |v| async move { Ok(json!(v.as_i64().unwrap_or_default() * 10)) },
            &params,
        )
        .await
        .unwrap();

        assert_eq!(results, vec![Some(json!(10)), Some(json!(20)), Some(json!(30))]);
    }

    #[tokio::test]
    async fn test_chunk_concatenation_matches_unbatched() {
        let op = |n: i32| async move { Ok::<i32, AgentError>(n * n) };
        let items: Vec<i32> = (0..7).collect();

        let unbatched = map_call(items.clone(), op, &MapCallParams::default()).await.unwrap();

        let params = MapCallParams::new(CallParams::default(), MapCallConfig::default().with_batch_size(3));
        let chunks: Vec<_> = batch_call(items, op, params).collect().await;

        assert_eq!(chunks.len(), 3);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.as_ref().unwrap().len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        let concatenated: Vec<Option<i32>> = chunks.into_iter().flat_map(|c| c.unwrap()).collect();
        assert_eq!(concatenated, unbatched);
    }

    #[tokio::test]
    async fn test_unique_spans_chunks() {
        let op = |n: i32| async move { Ok::<i32, AgentError>(n % 3) };
        let items: Vec<i32> = (0..8).collect();
        let config = MapCallConfig::default().deduplicated();

        let unbatched = map_call(items.clone(), op, &MapCallParams::new(CallParams::default(), config.clone()))
            .await
            .unwrap();
        assert_eq!(unbatched, vec![Some(0), Some(1), Some(2)]);

        let params = MapCallParams::new(CallParams::default(), config.with_batch_size(2));
        let chunks: Vec<Vec<Option<i32>>> = batch_call(items, op, params)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert!(chunks[2].is_empty());
        assert_eq!(chunks.concat(), unbatched);
    }

    #[tokio::test]
    async fn test_failed_chunk_does_not_stop_later_chunks() {
        let params = MapCallParams::new(CallParams::default(), MapCallConfig::default().with_batch_size(2));
        let mut stream = batch_call(
            vec![1i32, 2, 3, 4],
            |n| async move {
                if n == 2 {
                    Err(AgentError::ExecutionError("bad item".into()))
                } else {
                    Ok(n)
                }
            },
            params,
        );

        assert!(stream.next().await.unwrap().is_err());
        assert_eq!(stream.next().await.unwrap().unwrap(), vec![Some(3), Some(4)]);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_throttle_paces_dispatch() {
        let params = MapCallParams::new(CallParams::default(), MapCallConfig::default().with_throttle_period(0.02));
        let start = std::time::Instant::now();
        map_call(vec![1i32, 2, 3], |n| async move { Ok(n) }, &params)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_to_list() {
        assert_eq!(to_list(json!([1, [2, [3]]]), true, false), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(to_list(json!([1, [2]]), false, false), vec![json!(1), json!([2])]);
        assert_eq!(to_list(json!([1, null]), false, true), vec![json!(1)]);
        assert_eq!(to_list(json!("x"), true, true), vec![json!("x")]);
        assert!(to_list(json!(null), false, true).is_empty());
    }
}
