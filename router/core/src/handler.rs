//! Domain Handler Contract
//!
//! Trait and data definitions for domain handlers. This abstraction lets the
//! router work with any number of domain-specific handlers (API design,
//! security review, documentation, ...) without knowing their internals.
//!
//! # Design Philosophy
//!
//! The router only ever calls two operations on a handler:
//! - [`DomainHandler::process_request`] to answer a routed request
//! - [`DomainHandler::health_check`] to report liveness for status snapshots
//!
//! Everything else a handler needs to describe itself lives in its
//! [`HandlerDescriptor`], which is registered once alongside the callable.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Free-form context passed through to handlers
pub type RequestContext = HashMap<String, serde_json::Value>;

/// Default confidence threshold for newly described handlers
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Default max processing time (30s)
pub const DEFAULT_MAX_PROCESSING_TIME_MS: u64 = 30_000;

fn default_threshold() -> f64 {
    DEFAULT_CONFIDENCE_THRESHOLD
}

fn default_max_processing_time_ms() -> u64 {
    DEFAULT_MAX_PROCESSING_TIME_MS
}

fn default_cache_enabled() -> bool {
    true
}

// ============================================================================
// Handler Descriptor
// ============================================================================

/// Metadata registered once per handler
///
/// Immutable after registration; re-register the handler to change it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    /// Unique handler identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Capability tags (e.g. "api design", "threat modeling")
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Minimum relevance score before this handler is a routing candidate
    #[serde(default = "default_threshold")]
    pub confidence_threshold: f64,

    /// Keywords matched case-insensitively against request text
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Free-text description of what the handler does
    #[serde(default)]
    pub description: String,

    /// Upper bound on a single invocation, in milliseconds
    #[serde(default = "default_max_processing_time_ms")]
    pub max_processing_time_ms: u64,

    /// Whether results from this handler may be cached
    #[serde(default = "default_cache_enabled")]
    pub cache_enabled: bool,
}

impl HandlerDescriptor {
    /// Create a descriptor with default threshold, timeout and caching
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capabilities: Vec::new(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            keywords: Vec::new(),
            description: String::new(),
            max_processing_time_ms: DEFAULT_MAX_PROCESSING_TIME_MS,
            cache_enabled: true,
        }
    }

    /// Set capability tags
    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    /// Set keywords
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Set description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set confidence threshold
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Set max processing time
    #[must_use]
    pub fn with_max_processing_time(mut self, max: Duration) -> Self {
        self.max_processing_time_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Enable or disable result caching
    #[must_use]
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Max processing time as a duration
    #[must_use]
    pub fn max_processing_time(&self) -> Duration {
        Duration::from_millis(self.max_processing_time_ms)
    }

    /// Text the relevance model learns from: description, capabilities, keywords
    #[must_use]
    pub fn corpus_text(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.capabilities.len() + self.keywords.len());
        parts.push(self.description.as_str());
        parts.extend(self.capabilities.iter().map(String::as_str));
        parts.extend(self.keywords.iter().map(String::as_str));
        parts.join(" ")
    }
}

// ============================================================================
// Handler Result
// ============================================================================

/// Kind of output a handler produced
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// Analysis of the request
    #[default]
    Analysis,
    /// Concrete recommendations
    Recommendation,
    /// Implementation artifacts (code, config)
    Implementation,
    /// Validation / review findings
    Validation,
    /// Documentation output
    Documentation,
    /// Anything else
    Other,
}

/// Output of one handler invocation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// Handler that produced this result
    pub handler_id: String,

    /// Result kind tag
    pub kind: ResultKind,

    /// Opaque payload
    pub content: serde_json::Value,

    /// Handler's own confidence in the answer
    pub confidence: f64,

    /// Wall-clock seconds spent in the handler (filled in by the dispatcher)
    pub processing_time_secs: f64,

    /// Human-readable recommendations
    #[serde(default)]
    pub recommendations: Vec<String>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HandlerResult {
    /// Create a result with no recommendations or metadata
    pub fn new(
        handler_id: impl Into<String>,
        kind: ResultKind,
        content: serde_json::Value,
        confidence: f64,
    ) -> Self {
        Self {
            handler_id: handler_id.into(),
            kind,
            content,
            confidence,
            processing_time_secs: 0.0,
            recommendations: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Set recommendations
    #[must_use]
    pub fn with_recommendations<I, S>(mut self, recommendations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recommendations = recommendations.into_iter().map(Into::into).collect();
        self
    }

    /// Add one metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// Domain handler trait
///
/// Implement this to plug a domain into the router. Keep it to these two
/// operations: the router never inspects anything else.
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Answer a routed request
    ///
    /// `confidence` is the relevance score the router computed for this
    /// handler. Errors are isolated per handler and never fail the dispatch.
    async fn process_request(
        &self,
        text: &str,
        context: &RequestContext,
        confidence: f64,
    ) -> anyhow::Result<HandlerResult>;

    /// Check if the handler is able to serve requests
    async fn health_check(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = HandlerDescriptor::new("api", "API Design");
        assert!((descriptor.confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert!(descriptor.cache_enabled);
        assert_eq!(descriptor.max_processing_time(), Duration::from_secs(30));
    }

    #[test]
    fn test_descriptor_from_toml_uses_defaults() {
        let descriptor: HandlerDescriptor = toml::from_str(
            r#"
            id = "security"
            name = "Security Review"
            keywords = ["secure", "auth"]
            "#,
        )
        .unwrap();

        assert_eq!(descriptor.keywords, vec!["secure", "auth"]);
        assert!((descriptor.confidence_threshold - 0.6).abs() < f64::EPSILON);
        assert_eq!(descriptor.max_processing_time_ms, 30_000);
        assert!(descriptor.cache_enabled);
    }

    #[test]
    fn test_corpus_text_concatenates_metadata() {
        let descriptor = HandlerDescriptor::new("api", "API")
            .with_description("Designs APIs")
            .with_capabilities(["api design"])
            .with_keywords(["rest"]);
        assert_eq!(descriptor.corpus_text(), "Designs APIs api design rest");
    }

    #[test]
    fn test_result_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ResultKind::Recommendation).unwrap();
        assert_eq!(json, "\"recommendation\"");
    }
}
