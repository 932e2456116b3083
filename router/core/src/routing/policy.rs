//! Routing Policy
//!
//! Turns raw relevance scores into a ranked candidate list.
//!
//! # Selection Flow
//!
//! ```text
//! 1. Score every registered handler (ScoringStrategy)
//! 2. Drop handlers scoring below their own confidence threshold
//! 3. Stable-sort survivors by descending score (ties keep registration order)
//! 4. Truncate to max_domains
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::registry::RegisteredHandler;
use super::scoring::RelevanceScore;
use crate::handler::DomainHandler;

/// A handler selected for one request
///
/// Created fresh per request; never persisted.
#[derive(Clone, Serialize)]
pub struct HandlerMatch {
    /// Selected handler id
    pub handler_id: String,

    /// Relevance score for this request
    pub confidence: f64,

    /// Callable to dispatch to
    #[serde(skip)]
    pub handler: Arc<dyn DomainHandler>,

    /// Why this handler was selected
    pub reasons: Vec<String>,
}

impl std::fmt::Debug for HandlerMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMatch")
            .field("handler_id", &self.handler_id)
            .field("confidence", &self.confidence)
            .field("reasons", &self.reasons)
            .finish_non_exhaustive()
    }
}

/// Select, rank and truncate candidates
///
/// `handlers` must be in registration order; that order is the tie-break.
#[must_use]
pub fn select_matches(
    handlers: &[Arc<RegisteredHandler>],
    mut scores: HashMap<String, RelevanceScore>,
    max_domains: usize,
) -> Vec<HandlerMatch> {
    let mut matches: Vec<HandlerMatch> = handlers
        .iter()
        .filter_map(|entry| {
            let descriptor = &entry.descriptor;
            let relevance = scores.remove(&descriptor.id)?;
            if relevance.score < descriptor.confidence_threshold {
                tracing::trace!(
                    handler = %descriptor.id,
                    score = relevance.score,
                    threshold = descriptor.confidence_threshold,
                    "Handler below threshold"
                );
                return None;
            }

            let mut reasons = relevance.reasons;
            reasons.push(format!(
                "confidence {:.2} >= threshold {:.2}",
                relevance.score, descriptor.confidence_threshold
            ));

            Some(HandlerMatch {
                handler_id: descriptor.id.clone(),
                confidence: relevance.score,
                handler: Arc::clone(&entry.handler),
                reasons,
            })
        })
        .collect();

    // sort_by is stable: equal scores keep registration order
    matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    matches.truncate(max_domains);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerDescriptor, HandlerResult, RequestContext, ResultKind};
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl DomainHandler for Noop {
        async fn process_request(
            &self,
            _text: &str,
            _context: &RequestContext,
            confidence: f64,
        ) -> anyhow::Result<HandlerResult> {
            Ok(HandlerResult::new(
                "noop",
                ResultKind::Other,
                serde_json::Value::Null,
                confidence,
            ))
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn entry(id: &str, threshold: f64) -> Arc<RegisteredHandler> {
        Arc::new(RegisteredHandler {
            descriptor: HandlerDescriptor::new(id, id).with_threshold(threshold),
            handler: Arc::new(Noop),
        })
    }

    fn scores(pairs: &[(&str, f64)]) -> HashMap<String, RelevanceScore> {
        pairs
            .iter()
            .map(|(id, score)| {
                (
                    (*id).to_string(),
                    RelevanceScore {
                        score: *score,
                        reasons: Vec::new(),
                    },
                )
            })
            .collect()
    }

    fn ids(matches: &[HandlerMatch]) -> Vec<&str> {
        matches.iter().map(|m| m.handler_id.as_str()).collect()
    }

    #[test]
    fn test_threshold_filter_is_per_handler() {
        let handlers = vec![entry("strict", 0.9), entry("lenient", 0.3)];
        let matches = select_matches(&handlers, scores(&[("strict", 0.8), ("lenient", 0.4)]), 3);
        assert_eq!(ids(&matches), vec!["lenient"]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let handlers = vec![entry("edge", 0.6)];
        let matches = select_matches(&handlers, scores(&[("edge", 0.6)]), 3);
        assert_eq!(ids(&matches), vec!["edge"]);
    }

    #[test]
    fn test_ranking_and_truncation() {
        let handlers = vec![
            entry("a", 0.1),
            entry("b", 0.1),
            entry("c", 0.1),
            entry("d", 0.1),
        ];
        let matches = select_matches(
            &handlers,
            scores(&[("a", 0.2), ("b", 0.9), ("c", 0.5), ("d", 0.7)]),
            3,
        );
        assert_eq!(ids(&matches), vec!["b", "d", "c"]);
    }

    #[test]
    fn test_ties_break_by_registration_order() {
        let handlers = vec![entry("first", 0.1), entry("second", 0.1), entry("third", 0.1)];
        let matches = select_matches(
            &handlers,
            scores(&[("third", 0.5), ("second", 0.5), ("first", 0.5)]),
            3,
        );
        assert_eq!(ids(&matches), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unscored_handlers_are_skipped() {
        let handlers = vec![entry("known", 0.0), entry("new", 0.0)];
        let matches = select_matches(&handlers, scores(&[("known", 0.1)]), 3);
        assert_eq!(ids(&matches), vec!["known"]);
        assert!(matches[0].reasons[0].contains("threshold"));
    }
}
