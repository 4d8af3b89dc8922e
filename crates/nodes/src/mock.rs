//! `MockStep` — a test double for `Step`.
//!
//! Useful in unit and integration tests where a real connector is either
//! unavailable or irrelevant. Clones share the recorded calls, so a test can
//! register one clone and inspect another.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::{RuntimeContext, Step, StepInput, StepResult};

/// Behaviour injected into `MockStep` at construction time.
#[derive(Debug, Clone)]
pub enum MockBehaviour {
    /// Succeed with a specific `data` value.
    ReturnValue(Value),
    /// Report `{success: false, error}`.
    Fail(String),
    /// Panic inside `invoke`, simulating an unexpected fault.
    Panic(String),
}

/// A mock step that records every input it receives and returns a
/// programmer-specified result.
#[derive(Debug, Clone)]
pub struct MockStep {
    /// What the step will do when `invoke` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this step (in call order).
    pub calls: Arc<Mutex<Vec<StepInput>>>,
}

impl MockStep {
    fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given data.
    pub fn returning(data: Value) -> Self {
        Self::with_behaviour(MockBehaviour::ReturnValue(data))
    }

    /// Create a mock that always reports failure.
    pub fn failing(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Fail(msg.into()))
    }

    /// Create a mock that panics when invoked.
    pub fn panicking(msg: impl Into<String>) -> Self {
        Self::with_behaviour(MockBehaviour::Panic(msg.into()))
    }

    /// Number of times this step has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Inputs received so far.
    pub fn calls(&self) -> Vec<StepInput> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Step for MockStep {
    async fn invoke(&self, input: StepInput, _ctx: &RuntimeContext) -> StepResult {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(input);

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => StepResult::success(v.clone()),
            MockBehaviour::Fail(msg) => StepResult::failure(msg.clone()),
            MockBehaviour::Panic(msg) => panic!("{msg}"),
        }
    }
}
