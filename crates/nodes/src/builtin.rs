//! Built-in steps that ship with every deployment.
//!
//! Connector steps (mail, calendar, drive, model providers) are registered by
//! the embedding application; these need no credentials.

use async_trait::async_trait;
use serde_json::Value;

use crate::{NodeError, RuntimeContext, Step, StepDescriptor, StepInput, StepRegistryBuilder, StepResult};

/// Returns its resolved input unchanged as `data`.
///
/// Handy for shaping data between connector steps and for smoke-testing a
/// graph end to end.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoStep;

#[async_trait]
impl Step for EchoStep {
    async fn invoke(&self, input: StepInput, _ctx: &RuntimeContext) -> StepResult {
        StepResult::success(Value::Object(input))
    }
}

/// Register every built-in step.
pub fn register_builtins(builder: &mut StepRegistryBuilder) -> Result<(), NodeError> {
    builder.register(StepDescriptor::new("echo", EchoStep))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NoCredentials, StepRegistry};
    use serde_json::json;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn echo_returns_its_input() {
        let mut builder = StepRegistry::builder();
        register_builtins(&mut builder).unwrap();
        let registry = builder.build();

        let ctx = RuntimeContext::new(Uuid::new_v4(), Uuid::new_v4(), "e", Arc::new(NoCredentials));
        let mut input = StepInput::new();
        input.insert("greeting".into(), json!("hi"));

        let result = registry.resolve("echo").unwrap().invoke(input, &ctx).await;
        assert_eq!(result, StepResult::success(json!({ "greeting": "hi" })));
    }
}
