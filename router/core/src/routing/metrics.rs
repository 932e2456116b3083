//! Handler Performance Tracking
//!
//! Observability for dispatched handlers:
//! - Request, success, error, timeout and cache-hit counts
//! - Processing time (avg/min/max exact, p50/p95 over a recent window)
//! - Confidence averages
//!
//! Counters only grow; they reset with the process.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

/// Recent processing-time samples kept per handler for percentiles
pub const SAMPLE_WINDOW: usize = 1024;

// ============================================================================
// Outcome
// ============================================================================

/// How one handler contribution ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Handler ran and returned a result
    Success,
    /// Result served from the cache
    CacheHit,
    /// Handler returned an error or panicked
    Failure,
    /// Handler exceeded its max processing time
    Timeout,
}

impl Outcome {
    /// Whether this outcome contributed a result
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success | Self::CacheHit)
    }
}

// ============================================================================
// Per-Handler Metrics
// ============================================================================

/// Accumulated series for one handler
#[derive(Debug, Clone)]
pub struct HandlerMetrics {
    /// Handler id
    pub handler_id: String,
    /// Total recorded requests
    pub requests: u64,
    /// Requests that produced a result (including cache hits)
    pub successes: u64,
    /// Requests that failed (errors and timeouts)
    pub errors: u64,
    /// Subset of errors that were timeouts
    pub timeouts: u64,
    /// Subset of successes served from cache
    pub cache_hits: u64,
    processing_time_sum: f64,
    processing_time_min: f64,
    processing_time_max: f64,
    confidence_sum: f64,
    recent_processing_times: VecDeque<f64>,
}

impl HandlerMetrics {
    /// Empty metrics for a handler
    pub fn new(handler_id: impl Into<String>) -> Self {
        Self {
            handler_id: handler_id.into(),
            requests: 0,
            successes: 0,
            errors: 0,
            timeouts: 0,
            cache_hits: 0,
            processing_time_sum: 0.0,
            processing_time_min: f64::INFINITY,
            processing_time_max: 0.0,
            confidence_sum: 0.0,
            recent_processing_times: VecDeque::with_capacity(64),
        }
    }

    fn record(&mut self, processing_secs: f64, confidence: f64, outcome: Outcome) {
        self.requests += 1;
        match outcome {
            Outcome::Success => self.successes += 1,
            Outcome::CacheHit => {
                self.successes += 1;
                self.cache_hits += 1;
            }
            Outcome::Failure => self.errors += 1,
            Outcome::Timeout => {
                self.errors += 1;
                self.timeouts += 1;
            }
        }

        self.processing_time_sum += processing_secs;
        self.processing_time_min = self.processing_time_min.min(processing_secs);
        self.processing_time_max = self.processing_time_max.max(processing_secs);
        self.confidence_sum += confidence;

        if self.recent_processing_times.len() == SAMPLE_WINDOW {
            self.recent_processing_times.pop_front();
        }
        self.recent_processing_times.push_back(processing_secs);
    }

    /// Success / requests
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.requests)
    }

    /// Errors / requests
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        ratio(self.errors, self.requests)
    }

    fn percentile(&self, p: f64) -> f64 {
        if self.recent_processing_times.is_empty() {
            return 0.0;
        }
        let mut sorted: Vec<f64> = self.recent_processing_times.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    /// Computed statistics
    #[must_use]
    pub fn stats(&self) -> HandlerStats {
        #[allow(clippy::cast_precision_loss)]
        let n = self.requests as f64;
        let (avg_time, min_time, avg_confidence) = if self.requests == 0 {
            (0.0, 0.0, 0.0)
        } else {
            (
                self.processing_time_sum / n,
                self.processing_time_min,
                self.confidence_sum / n,
            )
        };

        HandlerStats {
            handler_id: self.handler_id.clone(),
            total_requests: self.requests,
            successful_requests: self.successes,
            error_count: self.errors,
            timeout_count: self.timeouts,
            cache_hits: self.cache_hits,
            avg_processing_time_secs: avg_time,
            min_processing_time_secs: min_time,
            max_processing_time_secs: self.processing_time_max,
            p50_processing_time_secs: self.percentile(0.5),
            p95_processing_time_secs: self.percentile(0.95),
            avg_confidence,
            success_rate: self.success_rate(),
            error_rate: self.error_rate(),
        }
    }
}

/// Escape a Prometheus label value (backslash, quote, newline)
fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Snapshot of one handler's statistics
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HandlerStats {
    pub handler_id: String,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub cache_hits: u64,
    pub avg_processing_time_secs: f64,
    pub min_processing_time_secs: f64,
    pub max_processing_time_secs: f64,
    pub p50_processing_time_secs: f64,
    pub p95_processing_time_secs: f64,
    pub avg_confidence: f64,
    pub success_rate: f64,
    pub error_rate: f64,
}

/// Aggregate across all handlers
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct OverallStats {
    pub total_requests: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub total_cache_hits: u64,
    pub error_rate: f64,
    pub avg_processing_time_secs: f64,
    /// Handlers with at least one recorded request
    pub active_handlers: usize,
}

// ============================================================================
// Performance Tracker
// ============================================================================

/// Centralized per-handler metrics
#[derive(Default)]
pub struct PerformanceTracker {
    handlers: DashMap<String, Mutex<HandlerMetrics>>,
}

impl PerformanceTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handler contribution
    pub fn record(
        &self,
        handler_id: &str,
        processing_time: Duration,
        confidence: f64,
        outcome: Outcome,
    ) {
        let secs = processing_time.as_secs_f64();

        if let Some(metrics) = self.handlers.get(handler_id) {
            metrics.lock().record(secs, confidence, outcome);
            return;
        }

        self.handlers
            .entry(handler_id.to_string())
            .or_insert_with(|| Mutex::new(HandlerMetrics::new(handler_id)))
            .lock()
            .record(secs, confidence, outcome);
    }

    /// Raw metrics for one handler
    #[must_use]
    pub fn metrics(&self, handler_id: &str) -> Option<HandlerMetrics> {
        self.handlers.get(handler_id).map(|m| m.lock().clone())
    }

    /// Statistics for one handler
    #[must_use]
    pub fn stats(&self, handler_id: &str) -> Option<HandlerStats> {
        self.handlers.get(handler_id).map(|m| m.lock().stats())
    }

    /// Statistics for every handler with recorded requests, sorted by id
    #[must_use]
    pub fn all_stats(&self) -> Vec<HandlerStats> {
        let mut stats: Vec<HandlerStats> =
            self.handlers.iter().map(|m| m.value().lock().stats()).collect();
        stats.sort_by(|a, b| a.handler_id.cmp(&b.handler_id));
        stats
    }

    /// Aggregate statistics
    #[must_use]
    pub fn overall_stats(&self) -> OverallStats {
        let mut overall = OverallStats::default();
        let mut time_sum = 0.0;

        for entry in &self.handlers {
            let metrics = entry.value().lock();
            overall.total_requests += metrics.requests;
            overall.total_errors += metrics.errors;
            overall.total_timeouts += metrics.timeouts;
            overall.total_cache_hits += metrics.cache_hits;
            time_sum += metrics.processing_time_sum;
            if metrics.requests > 0 {
                overall.active_handlers += 1;
            }
        }

        overall.error_rate = ratio(overall.total_errors, overall.total_requests);
        if overall.total_requests > 0 {
            #[allow(clippy::cast_precision_loss)]
            let n = overall.total_requests as f64;
            overall.avg_processing_time_secs = time_sum / n;
        }
        overall
    }

    /// Export as Prometheus format
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let overall = self.overall_stats();
        let mut output = String::new();

        let _ = write!(
            output,
            "# HELP router_handler_requests_total Handler contributions recorded\n\
             # TYPE router_handler_requests_total counter\n\
             router_handler_requests_total {}\n\n",
            overall.total_requests
        );
        let _ = write!(
            output,
            "# HELP router_handler_errors_total Failed handler contributions\n\
             # TYPE router_handler_errors_total counter\n\
             router_handler_errors_total {}\n\n",
            overall.total_errors
        );
        let _ = write!(
            output,
            "# HELP router_active_handlers Handlers with recorded requests\n\
             # TYPE router_active_handlers gauge\n\
             router_active_handlers {}\n\n",
            overall.active_handlers
        );

        for stats in self.all_stats() {
            let id = escape_label_value(&stats.handler_id);
            let _ = writeln!(
                output,
                "handler_requests_total{{handler=\"{id}\"}} {}",
                stats.total_requests
            );
            let _ = writeln!(
                output,
                "handler_errors_total{{handler=\"{id}\"}} {}",
                stats.error_count
            );
            let _ = writeln!(
                output,
                "handler_cache_hits_total{{handler=\"{id}\"}} {}",
                stats.cache_hits
            );
            let _ = writeln!(
                output,
                "handler_processing_seconds_p50{{handler=\"{id}\"}} {}",
                stats.p50_processing_time_secs
            );
            let _ = writeln!(
                output,
                "handler_processing_seconds_p95{{handler=\"{id}\"}} {}\n",
                stats.p95_processing_time_secs
            );
        }

        output
    }
}
