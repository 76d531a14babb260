//! Registry of step bodies keyed by step type and version.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::StepBody;
use crate::errors::StepflowError;
use crate::graph::StepGraph;

/// Maps `(step_type, version)` to a step body.
///
/// A body registered with [`register_any_version`](Self::register_any_version)
/// serves every version of its type that has no exact registration.
#[derive(Debug, Default)]
pub struct StepRegistry {
    exact: RwLock<HashMap<(String, String), Arc<dyn StepBody>>>,
    any_version: RwLock<HashMap<String, Arc<dyn StepBody>>>,
}

impl StepRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a body for one type and version, replacing any previous one.
    pub fn register(
        &self,
        step_type: impl Into<String>,
        version: impl Into<String>,
        body: Arc<dyn StepBody>,
    ) {
        let key = (step_type.into(), version.into());
        debug!(step_type = %key.0, version = %key.1, "Registered step body");
        self.exact.write().insert(key, body);
    }

    /// Registers a body for every version of a type.
    pub fn register_any_version(&self, step_type: impl Into<String>, body: Arc<dyn StepBody>) {
        let step_type = step_type.into();
        debug!(step_type = %step_type, "Registered step body for any version");
        self.any_version.write().insert(step_type, body);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with_step(
        self,
        step_type: impl Into<String>,
        version: impl Into<String>,
        body: Arc<dyn StepBody>,
    ) -> Self {
        self.register(step_type, version, body);
        self
    }

    /// Builder-style [`register_any_version`](Self::register_any_version).
    #[must_use]
    pub fn with_any_version(self, step_type: impl Into<String>, body: Arc<dyn StepBody>) -> Self {
        self.register_any_version(step_type, body);
        self
    }

    /// Returns the body for a type and version.
    #[must_use]
    pub fn get(&self, step_type: &str, version: &str) -> Option<Arc<dyn StepBody>> {
        let key = (step_type.to_string(), version.to_string());
        if let Some(body) = self.exact.read().get(&key) {
            return Some(Arc::clone(body));
        }
        self.any_version.read().get(step_type).cloned()
    }

    /// Returns true if a body exists for a type and version.
    #[must_use]
    pub fn contains(&self, step_type: &str, version: &str) -> bool {
        self.get(step_type, version).is_some()
    }

    /// Returns the number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.read().len() + self.any_version.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves the body of every listed step up front.
    ///
    /// # Errors
    ///
    /// Returns [`StepflowError::UnknownStepType`] for the first step without a
    /// body.
    pub fn resolve_graph<S: AsRef<str>>(
        &self,
        graph: &StepGraph,
        steps: &[S],
    ) -> Result<HashMap<String, Arc<dyn StepBody>>, StepflowError> {
        let mut bodies = HashMap::with_capacity(steps.len());
        for name in steps {
            let name = name.as_ref();
            let spec = graph
                .spec(name)
                .ok_or_else(|| crate::errors::GraphError::UnknownTarget(name.to_string()))?;
            let body = self.get(&spec.step_type, &spec.version).ok_or_else(|| {
                StepflowError::UnknownStepType {
                    step_name: spec.step_name.clone(),
                    step_type: spec.step_type.clone(),
                    version: spec.version.clone(),
                }
            })?;
            bodies.insert(name.to_string(), body);
        }
        Ok(bodies)
    }
}
