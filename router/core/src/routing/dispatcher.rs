//! Concurrent Dispatcher
//!
//! Fan-out/fan-in invocation of the handlers selected for one request.
//!
//! ```text
//!   targets ──┬── acquire slot ── invoke (timeout) ── release ──┐
//!             ├── acquire slot ── invoke (timeout) ── release ──┼── join_all ── DispatchReport
//!             └── (waits for a slot while max_concurrent busy) ─┘
//! ```
//!
//! Each invocation runs in its own task so a handler that errors, times out
//! or panics only loses its own contribution. The call returns once every
//! target has completed or failed.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::handler::{DomainHandler, HandlerResult, RequestContext};

/// One handler to invoke
#[derive(Clone)]
pub struct DispatchTarget {
    /// Handler id
    pub handler_id: String,
    /// Callable
    pub handler: Arc<dyn DomainHandler>,
    /// Relevance score passed to the handler
    pub confidence: f64,
    /// Per-invocation deadline
    pub timeout: Duration,
}

/// Why a handler contributed nothing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureKind {
    /// Handler returned an error
    #[error("handler error: {0}")]
    Error(String),

    /// Handler exceeded its max processing time
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),

    /// Handler task panicked or was cancelled
    #[error("handler task aborted: {0}")]
    Panicked(String),

    /// Concurrency limiter closed before a slot was granted
    #[error("no dispatch slot available")]
    SlotUnavailable,
}

/// A failed invocation
#[derive(Debug, Clone)]
pub struct HandlerFailure {
    /// Handler id
    pub handler_id: String,
    /// Relevance score the handler was invoked with
    pub confidence: f64,
    /// Time spent before the failure
    pub elapsed: Duration,
    /// Failure cause
    pub kind: FailureKind,
}

impl HandlerFailure {
    /// Whether the failure was a timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout(_))
    }
}

/// Outcome of one fan-out
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Successful results, in target order
    pub results: Vec<HandlerResult>,
    /// Failed invocations, in target order
    pub failures: Vec<HandlerFailure>,
}

/// Dispatcher statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub total_dispatched: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
}

#[derive(Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
}

impl Counters {
    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::AcqRel);
        InFlight(self)
    }
}

/// Decrements the in-flight gauge on drop, including on panic
struct InFlight<'a>(&'a Counters);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded parallel handler invoker
pub struct ConcurrentDispatcher {
    max_concurrent: usize,
    slots: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl ConcurrentDispatcher {
    /// Create a dispatcher allowing `max_concurrent` simultaneous handlers
    ///
    /// A bound of zero is raised to one.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            max_concurrent,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Configured bound
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Invoke every target, returning once all have completed or failed
    pub async fn dispatch(
        &self,
        text: &str,
        context: &RequestContext,
        targets: Vec<DispatchTarget>,
    ) -> DispatchReport {
        if targets.is_empty() {
            return DispatchReport::default();
        }

        let text: Arc<str> = Arc::from(text);
        let context = Arc::new(context.clone());

        let tasks = targets.into_iter().map(|target| {
            let slots = Arc::clone(&self.slots);
            let counters = Arc::clone(&self.counters);
            let text = Arc::clone(&text);
            let context = Arc::clone(&context);
            let handler_id = target.handler_id.clone();
            let confidence = target.confidence;
            // Set once the slot is held, so queueing time is never counted
            let started = Arc::new(OnceLock::new());
            let task_started = Arc::clone(&started);

            let task = tokio::spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return Err((Duration::ZERO, FailureKind::SlotUnavailable));
                };
                let _in_flight = counters.enter();
                let _ = task_started.set(Instant::now());
                invoke(&target, &text, &context).await
            });

            async move {
                match task.await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err((elapsed, kind))) => Err(HandlerFailure {
                        handler_id,
                        confidence,
                        elapsed,
                        kind,
                    }),
                    Err(join_error) => Err(HandlerFailure {
                        handler_id,
                        confidence,
                        elapsed: started.get().map_or(Duration::ZERO, Instant::elapsed),
                        kind: FailureKind::Panicked(join_error.to_string()),
                    }),
                }
            }
        });

        let outcomes = join_all(tasks).await;

        let mut report = DispatchReport::default();
        for outcome in outcomes {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            match outcome {
                Ok(result) => {
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    report.results.push(result);
                }
                Err(failure) => {
                    if failure.is_timeout() {
                        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    }
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        handler = %failure.handler_id,
                        error = %failure.kind,
                        elapsed_ms = failure.elapsed.as_millis() as u64,
                        "Handler failed; dropping its contribution"
                    );
                    report.failures.push(failure);
                }
            }
        }
        report
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            max_concurrent: self.max_concurrent,
            in_flight: self.counters.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.counters.peak_in_flight.load(Ordering::Relaxed),
            total_dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            total_succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            total_failed: self.counters.failed.load(Ordering::Relaxed),
            total_timed_out: self.counters.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Run one handler under its deadline, backfilling processing time
async fn invoke(
    target: &DispatchTarget,
    text: &str,
    context: &RequestContext,
) -> Result<HandlerResult, (Duration, FailureKind)> {
    let start = Instant::now();
    let call = target
        .handler
        .process_request(text, context, target.confidence);

    match tokio::time::timeout(target.timeout, call).await {
        Ok(Ok(mut result)) => {
            let elapsed = start.elapsed();
            result.processing_time_secs = elapsed.as_secs_f64();
            result.handler_id.clone_from(&target.handler_id);
            tracing::debug!(
                handler = %target.handler_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Handler completed"
            );
            Ok(result)
        }
        Ok(Err(e)) => Err((start.elapsed(), FailureKind::Error(format!("{e:#}")))),
        Err(_) => Err((start.elapsed(), FailureKind::Timeout(target.timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ResultKind;
    use async_trait::async_trait;

    enum Behavior {
        Succeed,
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct Scripted {
        id: &'static str,
        behavior: Behavior,
    }

    #[async_trait]
    impl DomainHandler for Scripted {
        async fn process_request(
            &self,
            _text: &str,
            _context: &RequestContext,
            confidence: f64,
        ) -> anyhow::Result<HandlerResult> {
            match self.behavior {
                Behavior::Succeed => {}
                Behavior::Fail => anyhow::bail!("{} refused", self.id),
                Behavior::Panic => panic!("{} exploded", self.id),
                Behavior::Sleep(d) => tokio::time::sleep(d).await,
            }
            Ok(HandlerResult::new(
                self.id,
                ResultKind::Analysis,
                serde_json::Value::Null,
                confidence,
            ))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn target(id: &'static str, behavior: Behavior, timeout: Duration) -> DispatchTarget {
        DispatchTarget {
            handler_id: id.to_string(),
            handler: Arc::new(Scripted { id, behavior }),
            confidence: 0.75,
            timeout,
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let dispatcher = ConcurrentDispatcher::new(3);
        let report = dispatcher
            .dispatch(
                "text",
                &RequestContext::new(),
                vec![
                    target("a", Behavior::Fail, Duration::from_secs(1)),
                    target("b", Behavior::Succeed, Duration::from_secs(1)),
                    target("c", Behavior::Panic, Duration::from_secs(1)),
                ],
            )
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].handler_id, "b");
        assert_eq!(report.failures.len(), 2);
        assert!(matches!(report.failures[0].kind, FailureKind::Error(_)));
        assert!(matches!(report.failures[1].kind, FailureKind::Panicked(_)));

        let stats = dispatcher.stats();
        assert_eq!(stats.total_dispatched, 3);
        assert_eq!(stats.total_succeeded, 1);
        assert_eq!(stats.total_failed, 2);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_drops_contribution() {
        let dispatcher = ConcurrentDispatcher::new(2);
        let report = dispatcher
            .dispatch(
                "text",
                &RequestContext::new(),
                vec![
                    target(
                        "slow",
                        Behavior::Sleep(Duration::from_secs(10)),
                        Duration::from_secs(1),
                    ),
                    target(
                        "fast",
                        Behavior::Sleep(Duration::from_millis(10)),
                        Duration::from_secs(1),
                    ),
                ],
            )
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].handler_id, "fast");
        assert!(report.failures[0].is_timeout());
        assert_eq!(dispatcher.stats().total_timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_time_is_backfilled() {
        let dispatcher = ConcurrentDispatcher::new(1);
        let report = dispatcher
            .dispatch(
                "text",
                &RequestContext::new(),
                vec![target(
                    "a",
                    Behavior::Sleep(Duration::from_millis(250)),
                    Duration::from_secs(1),
                )],
            )
            .await;

        let secs = report.results[0].processing_time_secs;
        assert!((0.25..0.3).contains(&secs), "processing time {secs}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let dispatcher = ConcurrentDispatcher::new(2);
        let targets = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|id| {
                target(
                    id,
                    Behavior::Sleep(Duration::from_millis(100)),
                    Duration::from_secs(1),
                )
            })
            .collect();

        let start = Instant::now();
        let report = dispatcher
            .dispatch("text", &RequestContext::new(), targets)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(report.results.len(), 5);
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert_eq!(dispatcher.stats().peak_in_flight, 2);
    }

    #[tokio::test]
    async fn test_results_keep_target_order() {
        let dispatcher = ConcurrentDispatcher::new(3);
        let report = dispatcher
            .dispatch(
                "text",
                &RequestContext::new(),
                vec![
                    target(
                        "first",
                        Behavior::Sleep(Duration::from_millis(30)),
                        Duration::from_secs(1),
                    ),
                    target("second", Behavior::Succeed, Duration::from_secs(1)),
                ],
            )
            .await;

        let ids: Vec<_> = report.results.iter().map(|r| r.handler_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_latency_excludes_queue_wait() {
        let dispatcher = ConcurrentDispatcher::new(1);
        let report = dispatcher
            .dispatch(
                "text",
                &RequestContext::new(),
                vec![
                    target(
                        "busy",
                        Behavior::Sleep(Duration::from_secs(2)),
                        Duration::from_secs(5),
                    ),
                    target("crash", Behavior::Panic, Duration::from_secs(5)),
                ],
            )
            .await;

        assert_eq!(report.results.len(), 1);
        let failure = &report.failures[0];
        assert_eq!(failure.handler_id, "crash");
        assert!(matches!(failure.kind, FailureKind::Panicked(_)));
        assert!(
            failure.elapsed < Duration::from_secs(1),
            "elapsed {:?}",
            failure.elapsed
        );
    }

    #[test]
    fn test_zero_bound_is_raised() {
        assert_eq!(ConcurrentDispatcher::new(0).max_concurrent(), 1);
    }
}
