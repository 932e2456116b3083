//! Routing Configuration
//!
//! Runtime settings for the router: concurrency bound, result limits,
//! cache lifetime and health probe deadlines.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main router configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Maximum handlers invoked in parallel for one request
    pub max_concurrent_handlers: usize,

    /// Result limit used when the caller does not supply one
    pub default_max_domains: usize,

    /// Global cache switch (per-handler flags still apply)
    pub cache_enabled: bool,

    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: u64,

    /// Deadline for a single handler health probe in milliseconds
    pub health_check_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_concurrent_handlers: 3,
            default_max_domains: 3,
            cache_enabled: true,
            cache_ttl_secs: 3600,
            health_check_timeout_ms: 5000,
        }
    }
}

impl RouterConfig {
    /// Get cache TTL as duration
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Get health check timeout as duration
    #[must_use]
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Set the concurrency bound
    #[must_use]
    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = max;
        self
    }

    /// Set the cache TTL
    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_secs = ttl.as_secs();
        self
    }

    /// Set the health probe timeout
    #[must_use]
    pub fn with_health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_config_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.max_concurrent_handlers, 3);
        assert_eq!(config.default_max_domains, 3);
        assert!(config.cache_enabled);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert_eq!(config.health_check_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: RouterConfig = toml::from_str("max_concurrent_handlers = 8").unwrap();
        assert_eq!(config.max_concurrent_handlers, 8);
        assert_eq!(config.cache_ttl_secs, 3600);
    }
}
