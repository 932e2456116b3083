//! Domain Router
//!
//! Entry point tying the routing pieces together.
//!
//! # Dispatch Pipeline
//!
//! ```text
//! 1. Route: score, filter by threshold, rank, truncate
//! 2. Fingerprint the request text
//! 3. Split matches into cached / uncached
//! 4. Fan out uncached matches through the ConcurrentDispatcher
//! 5. Cache new results (handler and global flags permitting)
//! 6. Record every contribution in the PerformanceTracker
//! 7. Return cached results, then new results, each in ranking order
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;
use uuid::Uuid;

use super::cache::{fingerprint, CacheStats, ResultCache};
use super::config::RouterConfig;
use super::dispatcher::{ConcurrentDispatcher, DispatchTarget, DispatcherStats};
use super::health::{probe_all, HealthStatus};
use super::metrics::{HandlerStats, Outcome, OverallStats, PerformanceTracker};
use super::policy::{select_matches, HandlerMatch};
use super::registry::{HandlerRegistry, RegisteredHandler, RegistrationError};
use super::scoring::{HybridScorer, ScoringStrategy};
use crate::handler::{
    DomainHandler, HandlerDescriptor, HandlerResult, RequestContext, DEFAULT_MAX_PROCESSING_TIME_MS,
};

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by router entry points
///
/// Handler failures never appear here; they are absorbed per handler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// Descriptor rejected at registration
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// `max_domains` must be at least one
    #[error("max_domains must be at least 1 (got {0})")]
    InvalidMaxDomains(usize),

    /// No handler with this id is registered
    #[error("unknown handler: {0}")]
    UnknownHandler(String),
}

// ============================================================================
// Status Snapshot
// ============================================================================

/// One handler as seen by `status`
#[derive(Clone, Debug, Serialize)]
pub struct HandlerStatus {
    /// Registered descriptor
    pub descriptor: HandlerDescriptor,
    /// Live health probe result
    pub health: HealthStatus,
    /// Metrics, if the handler has served anything yet
    pub metrics: Option<HandlerStats>,
}

/// Point-in-time router snapshot
#[derive(Clone, Debug, Serialize)]
pub struct RouterStatus {
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Number of registered handlers
    pub total_handlers: usize,
    /// Per-handler detail in registration order
    pub handlers: Vec<HandlerStatus>,
    /// Whether the relevance model has been trained at least once
    pub model_trained: bool,
    /// Active scoring strategy
    pub scoring_strategy: String,
    /// Result cache counters
    pub cache: CacheStats,
    /// Dispatcher counters
    pub dispatcher: DispatcherStats,
    /// Aggregate handler metrics
    pub overall: OverallStats,
}

impl RouterStatus {
    /// Number of handlers whose probe reported healthy
    #[must_use]
    pub fn healthy_handlers(&self) -> usize {
        self.handlers
            .iter()
            .filter(|handler| handler.health.is_healthy())
            .count()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Multi-domain request router
pub struct DomainRouter {
    config: RouterConfig,
    registry: Arc<HandlerRegistry>,
    scorer: RwLock<Box<dyn ScoringStrategy>>,
    /// Registry generation the scorer was last trained on
    trained_generation: AtomicU64,
    cache: Arc<ResultCache>,
    tracker: Arc<PerformanceTracker>,
    dispatcher: ConcurrentDispatcher,
}

impl DomainRouter {
    /// Create a router with fresh components and the hybrid scorer
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        let cache = Arc::new(ResultCache::new(config.cache_ttl()));
        Self::with_components(
            config,
            Arc::new(HandlerRegistry::new()),
            cache,
            Arc::new(PerformanceTracker::new()),
        )
    }

    /// Create a router over caller-owned components
    ///
    /// Handlers already present in `registry` are trained on immediately.
    /// Routers sharing a registry each retrain before routing once another
    /// router has changed it.
    #[must_use]
    pub fn with_components(
        config: RouterConfig,
        registry: Arc<HandlerRegistry>,
        cache: Arc<ResultCache>,
        tracker: Arc<PerformanceTracker>,
    ) -> Self {
        let dispatcher = ConcurrentDispatcher::new(config.max_concurrent_handlers);
        let generation = registry.generation();
        let router = Self {
            config,
            registry,
            scorer: RwLock::new(Box::new(HybridScorer::new())),
            trained_generation: AtomicU64::new(generation),
            cache,
            tracker,
            dispatcher,
        };
        if !router.registry.is_empty() {
            router.retrain(&mut **router.scorer.write());
        }
        router
    }

    /// Swap in a different scoring strategy
    #[must_use]
    pub fn with_strategy(self, strategy: Box<dyn ScoringStrategy>) -> Self {
        {
            let mut scorer = self.scorer.write();
            *scorer = strategy;
            if !self.registry.is_empty() {
                self.retrain(&mut **scorer);
            }
        }
        self
    }

    /// Runtime configuration
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Handler registry, read-only; change it through `register` / `unregister`
    #[must_use]
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&self.registry)
    }

    /// Result cache
    #[must_use]
    pub fn cache(&self) -> Arc<ResultCache> {
        Arc::clone(&self.cache)
    }

    /// Performance tracker
    #[must_use]
    pub fn tracker(&self) -> Arc<PerformanceTracker> {
        Arc::clone(&self.tracker)
    }

    /// Dispatcher counters
    #[must_use]
    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.dispatcher.stats()
    }

    /// Aggregate handler metrics
    #[must_use]
    pub fn overall_stats(&self) -> OverallStats {
        self.tracker.overall_stats()
    }

    /// Metrics for one handler
    #[must_use]
    pub fn handler_stats(&self, handler_id: &str) -> Option<HandlerStats> {
        self.tracker.stats(handler_id)
    }

    /// Whether the relevance model has been trained
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.scorer.read().is_trained()
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register (or replace) a handler and retrain the relevance model
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Registration`] for an invalid descriptor.
    pub fn register(
        &self,
        descriptor: HandlerDescriptor,
        handler: Arc<dyn DomainHandler>,
    ) -> Result<(), RouterError> {
        let id = descriptor.id.clone();

        // Scorer lock first so concurrent registrations train in insert order
        let mut scorer = self.scorer.write();
        let replaced = self.registry.insert(descriptor, handler)?;
        self.retrain(&mut **scorer);
        drop(scorer);

        // Answers cached under this id came from some earlier callable
        let dropped = self.cache.invalidate_handler(&id);
        if replaced {
            tracing::info!(handler = %id, cached_results = dropped, "Replaced handler");
        } else {
            tracing::info!(handler = %id, cached_results = dropped, "Registered handler");
        }
        Ok(())
    }

    /// Remove a handler, retrain, and drop its cached results
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownHandler`] if `handler_id` is not registered.
    pub fn unregister(&self, handler_id: &str) -> Result<(), RouterError> {
        let mut scorer = self.scorer.write();
        if self.registry.remove(handler_id).is_none() {
            return Err(RouterError::UnknownHandler(handler_id.to_string()));
        }
        self.retrain(&mut **scorer);
        drop(scorer);

        let dropped = self.cache.invalidate_handler(handler_id);
        tracing::info!(handler = handler_id, cached_results = dropped, "Unregistered handler");
        Ok(())
    }

    fn retrain(&self, scorer: &mut dyn ScoringStrategy) {
        let (generation, descriptors) = self.registry.versioned_descriptors();
        scorer.train(&descriptors);
        self.trained_generation.store(generation, Ordering::Release);
    }

    /// Retrain if the shared registry changed behind this router's back
    fn sync_model(&self) {
        if self.trained_generation.load(Ordering::Acquire) == self.registry.generation() {
            return;
        }
        let mut scorer = self.scorer.write();
        if self.trained_generation.load(Ordering::Acquire) != self.registry.generation() {
            tracing::debug!("Registry changed by another router; retraining");
            self.retrain(&mut **scorer);
        }
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Rank handlers for `text` using the configured `default_max_domains`
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidMaxDomains`] if the configured limit is zero.
    pub fn route(&self, text: &str) -> Result<Vec<HandlerMatch>, RouterError> {
        self.route_with_limit(text, self.config.default_max_domains)
    }

    /// Rank handlers for `text`, keeping at most `max_domains`
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidMaxDomains`] if `max_domains` is zero.
    pub fn route_with_limit(
        &self,
        text: &str,
        max_domains: usize,
    ) -> Result<Vec<HandlerMatch>, RouterError> {
        Ok(self.rank(text, max_domains)?.0)
    }

    /// Matches plus the registry snapshot they were drawn from
    fn rank(
        &self,
        text: &str,
        max_domains: usize,
    ) -> Result<(Vec<HandlerMatch>, Vec<Arc<RegisteredHandler>>), RouterError> {
        if max_domains == 0 {
            return Err(RouterError::InvalidMaxDomains(max_domains));
        }
        self.sync_model();

        let scores = {
            let scorer = self.scorer.read();
            if !scorer.is_trained() {
                tracing::warn!("Relevance model not trained; no handlers selected");
                return Ok((Vec::new(), Vec::new()));
            }
            scorer.score(text)
        };

        let handlers = self.registry.snapshot();
        let matches = select_matches(&handlers, scores, max_domains);
        tracing::debug!(
            candidates = handlers.len(),
            selected = matches.len(),
            "Routed request"
        );
        Ok((matches, handlers))
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    /// Route and invoke handlers using the configured `default_max_domains`
    ///
    /// Handler failures are logged and recorded, never returned.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidMaxDomains`] if the configured limit is zero.
    pub async fn dispatch(
        &self,
        text: &str,
        context: &RequestContext,
    ) -> Result<Vec<HandlerResult>, RouterError> {
        self.dispatch_with_limit(text, context, self.config.default_max_domains)
            .await
    }

    /// Route and invoke at most `max_domains` handlers
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidMaxDomains`] if `max_domains` is zero.
    pub async fn dispatch_with_limit(
        &self,
        text: &str,
        context: &RequestContext,
        max_domains: usize,
    ) -> Result<Vec<HandlerResult>, RouterError> {
        let span = tracing::info_span!("dispatch", dispatch_id = %Uuid::new_v4());
        self.run_pipeline(text, context, max_domains)
            .instrument(span)
            .await
    }

    async fn run_pipeline(
        &self,
        text: &str,
        context: &RequestContext,
        max_domains: usize,
    ) -> Result<Vec<HandlerResult>, RouterError> {
        let (matches, handlers) = self.rank(text, max_domains)?;
        if matches.is_empty() {
            tracing::debug!("No handler qualified");
            return Ok(Vec::new());
        }

        let routed: HashMap<&str, &Arc<RegisteredHandler>> = handlers
            .iter()
            .map(|entry| (entry.descriptor.id.as_str(), entry))
            .collect();
        let cacheable = |id: &str| {
            self.config.cache_enabled
                && routed
                    .get(id)
                    .is_some_and(|entry| entry.descriptor.cache_enabled)
        };
        // The handler that produced a result must still be the registered one
        let still_registered = |id: &str| {
            routed.get(id).is_some_and(|entry| {
                self.registry
                    .get(id)
                    .is_some_and(|live| Arc::ptr_eq(&live, *entry))
            })
        };

        let fp = fingerprint(text);
        let mut cached = Vec::new();
        let mut targets = Vec::new();

        for matched in matches {
            if cacheable(&matched.handler_id) {
                if let Some(result) = self.cache.get(&fp, &matched.handler_id) {
                    cached.push(result);
                    continue;
                }
            }

            let timeout = routed
                .get(matched.handler_id.as_str())
                .map_or(Duration::from_millis(DEFAULT_MAX_PROCESSING_TIME_MS), |entry| {
                    entry.descriptor.max_processing_time()
                });
            targets.push(DispatchTarget {
                handler_id: matched.handler_id,
                handler: matched.handler,
                confidence: matched.confidence,
                timeout,
            });
        }

        let report = self.dispatcher.dispatch(text, context, targets).await;

        for result in &report.results {
            if !cacheable(&result.handler_id) {
                continue;
            }
            if still_registered(&result.handler_id) {
                self.cache.put(&fp, &result.handler_id, result.clone());
            } else {
                tracing::debug!(
                    handler = %result.handler_id,
                    "Handler changed during dispatch; result not cached"
                );
            }
        }

        for result in &cached {
            self.tracker.record(
                &result.handler_id,
                secs_to_duration(result.processing_time_secs),
                result.confidence,
                Outcome::CacheHit,
            );
        }
        for result in &report.results {
            self.tracker.record(
                &result.handler_id,
                secs_to_duration(result.processing_time_secs),
                result.confidence,
                Outcome::Success,
            );
        }
        for failure in &report.failures {
            let outcome = if failure.is_timeout() {
                Outcome::Timeout
            } else {
                Outcome::Failure
            };
            self.tracker
                .record(&failure.handler_id, failure.elapsed, failure.confidence, outcome);
        }

        tracing::debug!(
            cached = cached.len(),
            fresh = report.results.len(),
            failed = report.failures.len(),
            "Dispatch complete"
        );

        let mut results = cached;
        results.extend(report.results);
        Ok(results)
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Snapshot registry, health, and metrics
    ///
    /// Health probes run concurrently, each bounded by `health_check_timeout_ms`.
    pub async fn status(&self) -> RouterStatus {
        self.sync_model();
        let handlers = self.registry.snapshot();
        let health = probe_all(
            handlers
                .iter()
                .map(|entry| (entry.descriptor.id.as_str(), entry.handler.as_ref())),
            self.config.health_check_timeout(),
        )
        .await;

        let (model_trained, scoring_strategy) = {
            let scorer = self.scorer.read();
            (scorer.is_trained(), scorer.name().to_string())
        };

        RouterStatus {
            timestamp: Utc::now(),
            total_handlers: handlers.len(),
            handlers: handlers
                .iter()
                .zip(health)
                .map(|(entry, health)| HandlerStatus {
                    descriptor: entry.descriptor.clone(),
                    health,
                    metrics: self.tracker.stats(&entry.descriptor.id),
                })
                .collect(),
            model_trained,
            scoring_strategy,
            cache: self.cache.stats(),
            dispatcher: self.dispatcher.stats(),
            overall: self.tracker.overall_stats(),
        }
    }
}

impl Default for DomainRouter {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
