//! Output classification.
//!
//! Classifiers turn raw backend output lines into [`DiagnosticEvent`]s. They
//! are pure and total: every line maps to at least an info event. Each stage
//! picks its classifier from a [`ClassifierRegistry`] by backend identifier
//! when it is constructed, so supporting another backend only means
//! registering another classifier.

mod pep517;

pub use pep517::{Pep517Classifier, PlainClassifier};

use crate::core::{DiagnosticEvent, RawOutputLine};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Maps raw output lines to diagnostics using a backend's conventions.
pub trait OutputClassifier: Send + Sync + Debug {
    /// Returns the identifier of this classifier.
    fn id(&self) -> &str;

    /// Classifies a single line. Never discards input.
    fn classify(&self, line: &RawOutputLine) -> DiagnosticEvent;
}

/// Registry of classifiers keyed by backend identifier.
#[derive(Debug, Clone)]
pub struct ClassifierRegistry {
    classifiers: HashMap<String, Arc<dyn OutputClassifier>>,
    fallback: Arc<dyn OutputClassifier>,
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Pep517Classifier::ID, Arc::new(Pep517Classifier::new()));
        registry
    }
}

impl ClassifierRegistry {
    /// Creates a registry with the built-in classifiers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with only the plain fallback.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            classifiers: HashMap::new(),
            fallback: Arc::new(PlainClassifier),
        }
    }

    /// Registers a classifier, replacing any previous one under `id`.
    pub fn register(&mut self, id: impl Into<String>, classifier: Arc<dyn OutputClassifier>) {
        self.classifiers.insert(id.into(), classifier);
    }

    /// Returns the classifier for `id`, or the plain fallback.
    #[must_use]
    pub fn get(&self, id: &str) -> Arc<dyn OutputClassifier> {
        self.classifiers
            .get(id)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// Returns true if a classifier is registered for `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.classifiers.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    #[derive(Debug)]
    struct ShoutingClassifier;

    impl OutputClassifier for ShoutingClassifier {
        fn id(&self) -> &str {
            "shouting"
        }

        fn classify(&self, line: &RawOutputLine) -> DiagnosticEvent {
            DiagnosticEvent::error(line.text.to_uppercase())
        }
    }

    #[test]
    fn test_default_registry_has_pep517() {
        let registry = ClassifierRegistry::new();
        assert!(registry.contains("pep517"));
        assert_eq!(registry.get("pep517").id(), "pep517");
    }

    #[test]
    fn test_unknown_backend_falls_back_to_plain() {
        let registry = ClassifierRegistry::new();
        assert_eq!(registry.get("maturin").id(), "plain");
    }

    #[test]
    fn test_registering_a_second_backend() {
        let mut registry = ClassifierRegistry::new();
        registry.register("shouting", Arc::new(ShoutingClassifier));

        let event = registry.get("shouting").classify(&RawOutputLine::stdout("hi"));
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.message, "HI");
        assert_eq!(registry.get("pep517").id(), "pep517");
    }
}
