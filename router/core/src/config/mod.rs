//! TOML Configuration File Support
//!
//! Loads router settings and config-declared handlers from
//! `~/.config/mcp-router/router.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # XDG Base Directory Compliance
//!
//! - `$XDG_CONFIG_HOME/mcp-router/router.toml` (typically `~/.config/mcp-router/router.toml`)
//!
//! # Example Configuration
//!
//! ```toml
//! [router]
//! max_concurrent_handlers = 3
//! default_max_domains = 3
//! health_check_timeout_ms = 5000
//!
//! [cache]
//! enabled = true
//! ttl_secs = 3600
//!
//! [[handlers]]
//! id = "api"
//! name = "API Design"
//! keywords = ["api", "rest", "endpoint"]
//! capabilities = ["api design"]
//! description = "Designs REST APIs"
//! confidence_threshold = 0.6
//! result_kind = "recommendation"
//! recommendations = ["Version the API from day one"]
//! ```

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::handler::{HandlerDescriptor, ResultKind};
use crate::routing::RouterConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[router]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSectionToml {
    /// Maximum handlers invoked in parallel
    pub max_concurrent_handlers: Option<usize>,

    /// Default result limit per request
    pub default_max_domains: Option<usize>,

    /// Health probe deadline in milliseconds
    pub health_check_timeout_ms: Option<u64>,
}

/// `[cache]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSectionToml {
    /// Global cache switch
    pub enabled: Option<bool>,

    /// Entry lifetime in seconds
    pub ttl_secs: Option<u64>,
}

/// One `[[handlers]]` entry
///
/// Descriptor fields plus the canned answer a config-driven handler returns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HandlerEntry {
    /// Routing metadata
    #[serde(flatten)]
    pub descriptor: HandlerDescriptor,

    /// Kind of result the handler produces
    #[serde(default)]
    pub result_kind: ResultKind,

    /// Recommendations attached to every result
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Root of the TOML configuration file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Router settings
    pub router: RouterSectionToml,

    /// Cache settings
    pub cache: CacheSectionToml,

    /// Declared handlers
    pub handlers: Vec<HandlerEntry>,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct RouterConfigFile {
    /// Runtime router settings
    pub router: RouterConfig,

    /// Handlers declared in the file, in file order
    pub handlers: Vec<HandlerEntry>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Highest-priority layer that contributed a value
    source: ConfigSource,
}

impl Default for RouterConfigFile {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            handlers: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RouterConfigFile {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check the resolved values
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for a zero concurrency bound,
    /// a zero result limit, or duplicate handler ids.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router.max_concurrent_handlers == 0 {
            return Err(ConfigError::ValidationError(
                "max_concurrent_handlers must be at least 1".to_string(),
            ));
        }
        if self.router.default_max_domains == 0 {
            return Err(ConfigError::ValidationError(
                "default_max_domains must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for entry in &self.handlers {
            if !seen.insert(entry.descriptor.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate handler id '{}'",
                    entry.descriptor.id
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/mcp-router/router.toml` or
/// `~/.config/mcp-router/router.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("mcp-router").join("router.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed or the
/// resolved values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<RouterConfigFile, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// `None` means defaults plus environment only.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RouterConfigFile, ConfigError> {
    let mut config = RouterConfigFile::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: RouterToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                handlers = config.handlers.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut RouterConfigFile, toml: RouterToml) {
    if let Some(max) = toml.router.max_concurrent_handlers {
        config.router.max_concurrent_handlers = max;
    }
    if let Some(max) = toml.router.default_max_domains {
        config.router.default_max_domains = max;
    }
    if let Some(timeout) = toml.router.health_check_timeout_ms {
        config.router.health_check_timeout_ms = timeout;
    }

    if let Some(enabled) = toml.cache.enabled {
        config.router.cache_enabled = enabled;
    }
    if let Some(ttl) = toml.cache.ttl_secs {
        config.router.cache_ttl_secs = ttl;
    }

    config.handlers = toml.handlers;
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut RouterConfigFile) {
    apply_env_with(config, |key| std::env::var(key).ok());
}

fn apply_env_with(config: &mut RouterConfigFile, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
    ) -> Option<T> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = key, value = %raw, "Ignoring unparseable environment override");
                None
            }
        }
    }

    if let Some(max) = parsed(&lookup, "MCP_ROUTER_MAX_CONCURRENT") {
        config.router.max_concurrent_handlers = max;
        config.source = ConfigSource::Env;
    }
    if let Some(max) = parsed(&lookup, "MCP_ROUTER_MAX_DOMAINS") {
        config.router.default_max_domains = max;
        config.source = ConfigSource::Env;
    }
    if let Some(ttl) = parsed(&lookup, "MCP_ROUTER_CACHE_TTL") {
        config.router.cache_ttl_secs = ttl;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = lookup("MCP_ROUTER_CACHE_ENABLED") {
        config.router.cache_enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = parsed(&lookup, "MCP_ROUTER_HEALTH_TIMEOUT_MS") {
        config.router.health_check_timeout_ms = timeout;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Concurrency bound override
    pub max_concurrent_handlers: Option<usize>,

    /// Default result limit override
    pub default_max_domains: Option<usize>,

    /// Global cache switch override
    pub cache_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency bound override
    #[must_use]
    pub fn with_max_concurrent_handlers(mut self, max: usize) -> Self {
        self.max_concurrent_handlers = Some(max);
        self
    }

    /// Set default result limit override
    #[must_use]
    pub fn with_default_max_domains(mut self, max: usize) -> Self {
        self.default_max_domains = Some(max);
        self
    }

    /// Set cache switch override
    #[must_use]
    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Apply overrides, then re-validate
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if an override is out of range.
    pub fn apply(&self, config: &mut RouterConfigFile) -> Result<(), ConfigError> {
        if self.max_concurrent_handlers.is_some()
            || self.default_max_domains.is_some()
            || self.cache_enabled.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(max) = self.max_concurrent_handlers {
            config.router.max_concurrent_handlers = max;
        }
        if let Some(max) = self.default_max_domains {
            config.router.default_max_domains = max;
        }
        if let Some(enabled) = self.cache_enabled {
            config.router.cache_enabled = enabled;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse(content: &str) -> RouterConfigFile {
        let toml: RouterToml = toml::from_str(content).unwrap();
        let mut config = RouterConfigFile::default();
        apply_toml_config(&mut config, toml);
        config
    }

    #[test]
    fn test_default_config() {
        let config = RouterConfigFile::default();
        assert_eq!(config.router, RouterConfig::default());
        assert!(config.handlers.is_empty());
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("mcp-router"));
            assert!(p.to_string_lossy().ends_with("router.toml"));
        }
    }

    #[test]
    fn test_parse_sections_and_handlers() {
        let config = parse(
            r#"
[router]
max_concurrent_handlers = 5
default_max_domains = 2

[cache]
enabled = false
ttl_secs = 60

[[handlers]]
id = "api"
name = "API Design"
keywords = ["api", "rest"]
confidence_threshold = 0.5
result_kind = "recommendation"
recommendations = ["Version your endpoints"]

[[handlers]]
id = "docs"
name = "Documentation"
"#,
        );

        assert_eq!(config.router.max_concurrent_handlers, 5);
        assert_eq!(config.router.default_max_domains, 2);
        assert!(!config.router.cache_enabled);
        assert_eq!(config.router.cache_ttl_secs, 60);
        assert_eq!(config.router.health_check_timeout_ms, 5000);

        assert_eq!(config.handlers.len(), 2);
        let api = &config.handlers[0];
        assert_eq!(api.descriptor.keywords, vec!["api", "rest"]);
        assert!((api.descriptor.confidence_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(api.result_kind, ResultKind::Recommendation);
        assert_eq!(api.recommendations, vec!["Version your endpoints"]);

        let docs = &config.handlers[1];
        assert_eq!(docs.result_kind, ResultKind::Analysis);
        assert!(docs.descriptor.cache_enabled);
        assert_eq!(docs.descriptor.max_processing_time_ms, 30_000);
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config("[router]\nhealth_check_timeout_ms = 250\n");
        let config = load_config_from_path(Some(file.path().to_path_buf())).unwrap();

        assert_eq!(config.router.health_check_timeout_ms, 250);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(Some(dir.path().join("absent.toml"))).unwrap();
        assert!(config.config_file_path.is_none());
        assert!(config.handlers.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = write_config("[router\nmax_concurrent_handlers = ");
        let err = load_config_from_path(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_duplicate_handler_ids_rejected() {
        let file = write_config(
            r#"
[[handlers]]
id = "api"
name = "One"

[[handlers]]
id = "api"
name = "Two"
"#,
        );
        let err = load_config_from_path(Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("duplicate handler id 'api'"));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = RouterConfigFile::default();
        config.router.max_concurrent_handlers = 0;
        assert!(config.validate().is_err());

        let mut config = RouterConfigFile::default();
        config.router.default_max_domains = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = parse("[cache]\nttl_secs = 60\n");
        config.set_source(ConfigSource::File);

        let env: HashMap<&str, &str> = HashMap::from([
            ("MCP_ROUTER_CACHE_TTL", "120"),
            ("MCP_ROUTER_CACHE_ENABLED", "false"),
            ("MCP_ROUTER_MAX_DOMAINS", "not-a-number"),
        ]);
        apply_env_with(&mut config, |key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.router.cache_ttl_secs, 120);
        assert!(!config.router.cache_enabled);
        assert_eq!(config.router.default_max_domains, 3);
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_cli_overrides_apply() {
        let mut config = RouterConfigFile::default();
        ConfigOverrides::new()
            .with_max_concurrent_handlers(8)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.router.max_concurrent_handlers, 8);
        assert_eq!(config.source(), ConfigSource::Cli);

        let err = ConfigOverrides::new()
            .with_default_max_domains(0)
            .apply(&mut config);
        assert!(err.is_err());
    }

    #[test]
    fn test_empty_overrides_keep_source() {
        let mut config = RouterConfigFile::default();
        ConfigOverrides::new().apply(&mut config).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::Env.to_string(), "environment");
        assert_eq!(ConfigSource::File.to_string(), "config file");
        assert_eq!(ConfigSource::Default.to_string(), "default");
    }
}
