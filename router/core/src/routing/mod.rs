#![allow(missing_docs)]
//! Multi-Domain Request Routing
//!
//! Scores a request against every registered domain handler, keeps the
//! handlers confident enough to answer, and fans the request out to them
//! under a fixed concurrency bound.
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |   DomainRouter   |  <-- Entry point: register / route / dispatch / status
//! +--------+---------+
//!          |
//!          v
//! +------------------+     +------------------+
//! | ScoringStrategy  | --> |  Routing Policy  |  <-- threshold, rank, truncate
//! +------------------+     +--------+---------+
//!                                   |
//!                                   v
//! +------------------+     +------------------+
//! |   ResultCache    | <-- |    Dispatcher    |  <-- semaphore-bounded fan-out
//! +------------------+     +--------+---------+
//!                                   |
//!                          +--------+---------+
//!                          |PerformanceTracker|
//!                          +------------------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Failure Isolation**: One handler failing never fails the dispatch
//! 2. **Bounded Fan-out**: At most `max_concurrent_handlers` run at once
//! 3. **Deterministic Ranking**: Ties keep registration order

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod health;
pub mod metrics;
pub mod policy;
pub mod registry;
pub mod router;
pub mod scoring;

pub use cache::{fingerprint, CacheStats, ResultCache};
pub use config::*;
pub use dispatcher::{ConcurrentDispatcher, DispatcherStats, FailureKind, HandlerFailure};
pub use health::HealthStatus;
pub use metrics::{HandlerStats, Outcome, OverallStats, PerformanceTracker};
pub use policy::HandlerMatch;
pub use registry::{HandlerRegistry, RegistrationError};
pub use router::*;
pub use scoring::{HybridScorer, RelevanceScore, ScoringStrategy};
