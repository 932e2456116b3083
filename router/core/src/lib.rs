//! MCP Router Core - Multi-Domain Request Routing
//!
//! Routes a free-text request to the domain handlers best suited to answer
//! it, invokes them in parallel under a concurrency bound, caches their
//! results, and keeps per-handler performance metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   Callers (CLI, services)                    │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │ route / dispatch / status
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                       DomainRouter                           │
//! │  ┌──────────┐  ┌──────────┐  ┌────────────┐  ┌────────────┐  │
//! │  │ Registry │  │ Scoring  │  │ Dispatcher │  │   Cache    │  │
//! │  │          │  │ Strategy │  │ (bounded)  │  │   (TTL)    │  │
//! │  └──────────┘  └──────────┘  └─────┬──────┘  └────────────┘  │
//! └────────────────────────────────────┼─────────────────────────┘
//!                                      │ process_request / health_check
//!                    ┌─────────────────┼─────────────────┐
//!                    v                 v                 v
//!              ┌──────────┐      ┌──────────┐      ┌──────────┐
//!              │ Handler  │      │ Handler  │      │ Handler  │
//!              └──────────┘      └──────────┘      └──────────┘
//! ```
//!
//! # Key Types
//!
//! - [`DomainRouter`]: Registration, routing, dispatch and status
//! - [`DomainHandler`]: The two-operation contract every handler implements
//! - [`HandlerDescriptor`]: Routing metadata registered with each handler
//! - [`HandlerResult`]: What a handler returns
//! - [`ScoringStrategy`]: Pluggable relevance model
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_router_core::{DomainRouter, HandlerDescriptor, RequestContext, RouterConfig};
//!
//! let router = DomainRouter::new(RouterConfig::default());
//! router.register(
//!     HandlerDescriptor::new("api", "API Design").with_keywords(["api", "rest"]),
//!     Arc::new(MyApiHandler),
//! )?;
//!
//! let results = router.dispatch("design a REST API", &RequestContext::new()).await?;
//! ```
//!
//! # Module Overview
//!
//! - [`handler`]: Handler contract, descriptors and results
//! - [`routing`]: Scoring, registry, policy, dispatcher, cache, metrics, health
//! - [`config`]: TOML file, environment and CLI configuration layering

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod handler;
pub mod routing;

// Handler contract
pub use handler::{DomainHandler, HandlerDescriptor, HandlerResult, RequestContext, ResultKind};

// Routing exports
pub use routing::{
    fingerprint, CacheStats, DispatcherStats, DomainRouter, FailureKind, HandlerMatch,
    HandlerRegistry, HandlerStats, HandlerStatus, HealthStatus, HybridScorer, Outcome, OverallStats,
    PerformanceTracker, RegistrationError, RelevanceScore, ResultCache, RouterConfig, RouterError,
    RouterStatus, ScoringStrategy,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, HandlerEntry, RouterConfigFile, RouterToml,
};
