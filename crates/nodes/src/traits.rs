//! The `Step` trait every step type must fulfil, and the
//! runtime context handed to it.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::NodeError;

/// Resolved input handed to a step: one entry per configured field.
pub type StepInput = Map<String, Value>;

/// Outcome of a single step invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// `{success: true, data}`
    Success { data: Value },
    /// `{success: false, error}`
    Failure { error: String },
}

impl StepResult {
    pub fn success(data: Value) -> Self {
        Self::Success { data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure { error: error.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// The wire shape consumed by connectors and shown in logs.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Success { data } => serde_json::json!({ "success": true, "data": data }),
            Self::Failure { error } => serde_json::json!({ "success": false, "error": error }),
        }
    }
}

/// Message a step reports when the credentials it needs are absent.
pub fn credentials_not_configured(provider: &str) -> String {
    format!("{provider} credentials are not configured. Please add them in Project Integrations.")
}

// ---------------------------------------------------------------------------
// Credentials collaborator
// ---------------------------------------------------------------------------

/// Looks up the decrypted credentials of an integration.
///
/// Storage and encryption live outside this workspace; steps only see the
/// resulting key/value map.
#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn fetch_credentials(
        &self,
        integration_id: &str,
    ) -> Result<HashMap<String, String>, NodeError>;
}

/// Provider for deployments without any configured integrations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCredentials;

#[async_trait]
impl CredentialsProvider for NoCredentials {
    async fn fetch_credentials(
        &self,
        _integration_id: &str,
    ) -> Result<HashMap<String, String>, NodeError> {
        Ok(HashMap::new())
    }
}

/// Fixed, in-process credential table keyed by integration id.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, HashMap<String, String>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_integration<K, V>(
        mut self,
        integration_id: impl Into<String>,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.entries.insert(integration_id.into(), values);
        self
    }
}

#[async_trait]
impl CredentialsProvider for StaticCredentials {
    async fn fetch_credentials(
        &self,
        integration_id: &str,
    ) -> Result<HashMap<String, String>, NodeError> {
        Ok(self.entries.get(integration_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// RuntimeContext
// ---------------------------------------------------------------------------

/// Shared context passed to every step during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual step
/// implementations can import it without a circular dependency.
#[derive(Clone)]
pub struct RuntimeContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// Graph-scoped ID of the node being invoked.
    pub node_id: String,
    /// Integration selected in the node's configuration, if any.
    pub integration_id: Option<String>,
    /// Credentials collaborator.
    pub credentials: Arc<dyn CredentialsProvider>,
}

impl RuntimeContext {
    pub fn new(
        workflow_id: Uuid,
        execution_id: Uuid,
        node_id: impl Into<String>,
        credentials: Arc<dyn CredentialsProvider>,
    ) -> Self {
        Self {
            workflow_id,
            execution_id,
            node_id: node_id.into(),
            integration_id: None,
            credentials,
        }
    }

    pub fn with_integration(mut self, integration_id: Option<String>) -> Self {
        self.integration_id = integration_id;
        self
    }

    /// Fetch this node's integration credentials.
    ///
    /// Any missing piece (no integration selected, lookup failure, empty
    /// credential set) becomes the descriptive "not configured" message so a
    /// step can return it as a [`StepResult::Failure`] instead of raising.
    pub async fn require_credentials(
        &self,
        provider: &str,
    ) -> Result<HashMap<String, String>, String> {
        let Some(integration_id) = self.integration_id.as_deref() else {
            return Err(credentials_not_configured(provider));
        };

        match self.credentials.fetch_credentials(integration_id).await {
            Ok(values) if !values.is_empty() => Ok(values),
            Ok(_) => Err(credentials_not_configured(provider)),
            Err(e) => {
                warn!(node_id = %self.node_id, "credential lookup failed: {e}");
                Err(credentials_not_configured(provider))
            }
        }
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("workflow_id", &self.workflow_id)
            .field("execution_id", &self.execution_id)
            .field("node_id", &self.node_id)
            .field("integration_id", &self.integration_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// The core step trait.
///
/// A step receives its resolved input (template references already bound to
/// upstream outputs) and reports success or failure through [`StepResult`].
/// Expected failures must be returned, not raised; the engine treats a panic
/// as an unexpected fault and records it against the node.
#[async_trait]
pub trait Step: Send + Sync {
    async fn invoke(&self, input: StepInput, ctx: &RuntimeContext) -> StepResult;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(credentials: Arc<dyn CredentialsProvider>) -> RuntimeContext {
        RuntimeContext::new(Uuid::new_v4(), Uuid::new_v4(), "send", credentials)
    }

    #[test]
    fn not_configured_message_names_the_provider() {
        assert_eq!(
            credentials_not_configured("Gmail"),
            "Gmail credentials are not configured. Please add them in Project Integrations."
        );
    }

    #[test]
    fn step_result_wire_shape() {
        let ok = StepResult::success(serde_json::json!({ "text": "hi" }));
        assert_eq!(ok.to_json()["success"], true);
        assert_eq!(ok.to_json()["data"]["text"], "hi");

        let err = StepResult::failure("nope");
        assert!(!err.is_success());
        assert_eq!(err.to_json()["error"], "nope");
    }

    #[tokio::test]
    async fn missing_integration_is_a_graceful_failure() {
        let ctx = ctx(Arc::new(NoCredentials));
        let err = ctx.require_credentials("Slack").await.unwrap_err();
        assert!(err.starts_with("Slack credentials are not configured"));
    }

    #[tokio::test]
    async fn empty_credential_set_is_not_configured() {
        let ctx = ctx(Arc::new(NoCredentials)).with_integration(Some("int-1".into()));
        assert!(ctx.require_credentials("Gmail").await.is_err());
    }

    #[tokio::test]
    async fn configured_integration_returns_values() {
        let creds = StaticCredentials::new().with_integration("int-1", [("apiKey", "k")]);
        let ctx = ctx(Arc::new(creds)).with_integration(Some("int-1".into()));
        let values = ctx.require_credentials("Gmail").await.unwrap();
        assert_eq!(values["apiKey"], "k");
    }
}
