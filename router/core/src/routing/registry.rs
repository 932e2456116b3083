//! Handler Registry
//!
//! Explicit, shareable registry of domain handlers. Constructed once and
//! handed to the router by `Arc`, so independent routers (and tests) never
//! share hidden global state.
//!
//! Registration order is preserved: it is the tie-break when two handlers
//! score equally.
//!
//! Only the router mutates a registry, so every change is followed by a
//! retrain. Each change bumps a generation counter; a router sharing the
//! registry with another retrains when it sees a generation it has not
//! trained on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::handler::{DomainHandler, HandlerDescriptor};

/// Invalid descriptor supplied to `register`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Descriptor id is empty
    #[error("handler descriptor is missing an id")]
    MissingId,

    /// Descriptor name is empty
    #[error("handler {id} is missing a name")]
    MissingName {
        /// Offending handler id
        id: String,
    },

    /// Threshold outside [0, 1]
    #[error("handler {id} has confidence threshold {threshold} outside [0, 1]")]
    InvalidThreshold {
        /// Offending handler id
        id: String,
        /// Supplied threshold
        threshold: f64,
    },

    /// Zero max processing time
    #[error("handler {id} must allow a non-zero processing time")]
    InvalidProcessingTime {
        /// Offending handler id
        id: String,
    },
}

/// Check a descriptor before it enters the registry
///
/// # Errors
///
/// Returns the first [`RegistrationError`] the descriptor violates.
pub fn validate_descriptor(descriptor: &HandlerDescriptor) -> Result<(), RegistrationError> {
    if descriptor.id.trim().is_empty() {
        return Err(RegistrationError::MissingId);
    }
    if descriptor.name.trim().is_empty() {
        return Err(RegistrationError::MissingName {
            id: descriptor.id.clone(),
        });
    }
    if !(0.0..=1.0).contains(&descriptor.confidence_threshold) {
        return Err(RegistrationError::InvalidThreshold {
            id: descriptor.id.clone(),
            threshold: descriptor.confidence_threshold,
        });
    }
    if descriptor.max_processing_time_ms == 0 {
        return Err(RegistrationError::InvalidProcessingTime {
            id: descriptor.id.clone(),
        });
    }
    Ok(())
}

/// A descriptor together with its callable
#[derive(Clone)]
pub struct RegisteredHandler {
    /// Registered metadata
    pub descriptor: HandlerDescriptor,
    /// The handler itself
    pub handler: Arc<dyn DomainHandler>,
}

impl std::fmt::Debug for RegisteredHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredHandler")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    /// Ids in registration order
    order: Vec<String>,
    entries: HashMap<String, Arc<RegisteredHandler>>,
    /// Bumped on every insert and remove
    generation: u64,
}

/// Thread-safe handler registry
#[derive(Default)]
pub struct HandlerRegistry {
    inner: RwLock<Inner>,
}

impl HandlerRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a handler
    ///
    /// Replacing keeps the original registration position. Returns `true`
    /// if an existing handler was replaced.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistrationError`] for an invalid descriptor.
    pub(crate) fn insert(
        &self,
        descriptor: HandlerDescriptor,
        handler: Arc<dyn DomainHandler>,
    ) -> Result<bool, RegistrationError> {
        validate_descriptor(&descriptor)?;

        let id = descriptor.id.clone();
        let entry = Arc::new(RegisteredHandler {
            descriptor,
            handler,
        });

        let mut inner = self.inner.write();
        let replaced = inner.entries.insert(id.clone(), entry).is_some();
        if !replaced {
            inner.order.push(id);
        }
        inner.generation += 1;
        Ok(replaced)
    }

    /// Remove a handler, returning it if present
    pub(crate) fn remove(&self, id: &str) -> Option<Arc<RegisteredHandler>> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(id)?;
        inner.order.retain(|existing| existing != id);
        inner.generation += 1;
        Some(removed)
    }

    /// Change counter, bumped by every insert and remove
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// Look up a handler by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<RegisteredHandler>> {
        self.inner.read().entries.get(id).cloned()
    }

    /// Check if a handler is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().entries.contains_key(id)
    }

    /// Number of registered handlers
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Check if no handlers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All handlers in registration order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<RegisteredHandler>> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect()
    }

    /// All descriptors in registration order
    #[must_use]
    pub fn descriptors(&self) -> Vec<HandlerDescriptor> {
        self.snapshot()
            .into_iter()
            .map(|entry| entry.descriptor.clone())
            .collect()
    }

    /// Descriptors in registration order with the generation they belong to
    pub(crate) fn versioned_descriptors(&self) -> (u64, Vec<HandlerDescriptor>) {
        let inner = self.inner.read();
        let descriptors = inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id))
            .map(|entry| entry.descriptor.clone())
            .collect();
        (inner.generation, descriptors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerResult, RequestContext, ResultKind};
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

    #[test]
    fn test_validation_rejects_bad_descriptors() {
        assert_eq!(
            validate_descriptor(&HandlerDescriptor::new("", "x")),
            Err(RegistrationError::MissingId)
        );
        assert!(matches!(
            validate_descriptor(&HandlerDescriptor::new("x", " ")),
            Err(RegistrationError::MissingName { .. })
        ));
        assert!(matches!(
            validate_descriptor(&HandlerDescriptor::new("x", "X").with_threshold(1.5)),
            Err(RegistrationError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            validate_descriptor(&HandlerDescriptor::new("x", "X").with_threshold(f64::NAN)),
            Err(RegistrationError::InvalidThreshold { .. })
        ));
        assert!(matches!(
            validate_descriptor(
                &HandlerDescriptor::new("x", "X")
                    .with_max_processing_time(std::time::Duration::ZERO)
            ),
            Err(RegistrationError::InvalidProcessingTime { .. })
        ));
    }

    #[test]
    fn test_reregistration_keeps_position() {
        let registry = HandlerRegistry::new();
        registry
            .insert(HandlerDescriptor::new("a", "A"), Arc::new(Noop))
            .unwrap();
        registry
            .insert(HandlerDescriptor::new("b", "B"), Arc::new(Noop))
            .unwrap();
        let replaced = registry
            .insert(HandlerDescriptor::new("a", "A v2"), Arc::new(Noop))
            .unwrap();

        assert!(replaced);
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["A v2", "B"]);
    }

    #[test]
    fn test_remove() {
        let registry = HandlerRegistry::new();
        registry
            .insert(HandlerDescriptor::new("a", "A"), Arc::new(Noop))
            .unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
        assert!(!registry.contains("a"));
    }

    #[test]
    fn test_generation_tracks_changes() {
        let registry = HandlerRegistry::new();
        assert_eq!(registry.generation(), 0);

        registry
            .insert(HandlerDescriptor::new("a", "A"), Arc::new(Noop))
            .unwrap();
        registry
            .insert(HandlerDescriptor::new("a", "A v2"), Arc::new(Noop))
            .unwrap();
        assert_eq!(registry.generation(), 2);

        // Rejected descriptors and missing ids change nothing
        assert!(registry
            .insert(HandlerDescriptor::new("", "B"), Arc::new(Noop))
            .is_err());
        assert!(registry.remove("missing").is_none());
        assert_eq!(registry.generation(), 2);

        assert!(registry.remove("a").is_some());
        let (generation, descriptors) = registry.versioned_descriptors();
        assert_eq!(generation, 3);
        assert!(descriptors.is_empty());
    }
}
