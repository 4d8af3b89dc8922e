//! Process-wide step registry.
//!
//! Steps are registered once through [`StepRegistryBuilder`] and the frozen
//! [`StepRegistry`] is shared behind an `Arc`. There is no mutation after
//! `build()`, so concurrent reads need no synchronisation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::{NodeError, RuntimeContext, Step, StepInput, StepResult};

/// One declared input of a step type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputField {
    pub name: String,
    pub required: bool,
}

impl InputField {
    pub fn required(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: true }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self { name: name.into(), required: false }
    }
}

/// What a step type needs (its input schema) and how to run it.
#[derive(Clone)]
pub struct StepDescriptor {
    pub step_type: String,
    pub inputs: Vec<InputField>,
    step: Arc<dyn Step>,
}

impl StepDescriptor {
    pub fn new(step_type: impl Into<String>, step: impl Step + 'static) -> Self {
        Self::from_arc(step_type, Arc::new(step))
    }

    pub fn from_arc(step_type: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            step_type: step_type.into(),
            inputs: Vec::new(),
            step,
        }
    }

    pub fn with_input(mut self, field: InputField) -> Self {
        self.inputs.push(field);
        self
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &InputField> {
        self.inputs.iter().filter(|f| f.required)
    }

    /// Shared handle to the step, for dispatch on a separate task.
    pub fn step(&self) -> Arc<dyn Step> {
        Arc::clone(&self.step)
    }

    pub async fn invoke(&self, input: StepInput, ctx: &RuntimeContext) -> StepResult {
        self.step.invoke(input, ctx).await
    }
}

impl fmt::Debug for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDescriptor")
            .field("step_type", &self.step_type)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Collects descriptors before the registry is frozen.
#[derive(Debug, Default)]
pub struct StepRegistryBuilder {
    steps: HashMap<String, StepDescriptor>,
}

impl StepRegistryBuilder {
    /// Add a step type.
    ///
    /// # Errors
    /// [`NodeError::DuplicateStepType`] if the type key is already taken.
    pub fn register(&mut self, descriptor: StepDescriptor) -> Result<&mut Self, NodeError> {
        if self.steps.contains_key(&descriptor.step_type) {
            return Err(NodeError::DuplicateStepType(descriptor.step_type));
        }
        debug!(step_type = %descriptor.step_type, "registered step");
        self.steps.insert(descriptor.step_type.clone(), descriptor);
        Ok(self)
    }

    pub fn build(self) -> StepRegistry {
        StepRegistry { steps: self.steps }
    }
}

/// Read-only map of step type → descriptor.
#[derive(Debug, Default)]
pub struct StepRegistry {
    steps: HashMap<String, StepDescriptor>,
}

impl StepRegistry {
    pub fn builder() -> StepRegistryBuilder {
        StepRegistryBuilder::default()
    }

    /// Look up a step type.
    ///
    /// # Errors
    /// [`NodeError::NotFound`] if nothing is registered under `step_type`.
    pub fn resolve(&self, step_type: &str) -> Result<&StepDescriptor, NodeError> {
        self.steps
            .get(step_type)
            .ok_or_else(|| NodeError::NotFound(step_type.to_owned()))
    }

    /// Registered step types, sorted.
    pub fn step_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStep;
    use serde_json::json;

    #[test]
    fn resolves_registered_steps() {
        let mut builder = StepRegistry::builder();
        builder
            .register(
                StepDescriptor::new("email", MockStep::returning(json!({})))
                    .with_input(InputField::required("to"))
                    .with_input(InputField::optional("cc")),
            )
            .unwrap();
        let registry = builder.build();

        let descriptor = registry.resolve("email").unwrap();
        let required: Vec<&str> = descriptor.required_inputs().map(|f| f.name.as_str()).collect();
        assert_eq!(required, vec!["to"]);
        assert!(registry.resolve("email").is_ok());
    }

    #[test]
    fn unknown_step_type_is_not_found() {
        let registry = StepRegistry::builder().build();
        assert_eq!(
            registry.resolve("ghost").unwrap_err(),
            NodeError::NotFound("ghost".into())
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut builder = StepRegistry::builder();
        builder
            .register(StepDescriptor::new("draft", MockStep::returning(json!({}))))
            .unwrap();
        let err = builder
            .register(StepDescriptor::new("draft", MockStep::returning(json!({}))))
            .unwrap_err();
        assert_eq!(err, NodeError::DuplicateStepType("draft".into()));
    }

    #[test]
    fn step_types_are_enumerated_in_order() {
        let mut builder = StepRegistry::builder();
        for t in ["slack", "draft", "email"] {
            builder
                .register(StepDescriptor::new(t, MockStep::returning(json!({}))))
                .unwrap();
        }
        let registry = builder.build();
        assert_eq!(registry.step_types(), vec!["draft", "email", "slack"]);
        assert_eq!(registry.step_types().len(), 3);
    }
}
