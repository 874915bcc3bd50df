//! Type-erased workflow registration, the same shape as the teacher's
//! `AnyWorkflow`/`WorkflowFactory`/`WorkflowRegistry`, collapsed to a single
//! async dispatch call since there's no event-sourced replay to wrap.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::workflow::{Workflow, WorkflowError};

/// Type-erased workflow invocation.
#[async_trait]
pub(crate) trait AnyWorkflow: Send + Sync {
    async fn run_json(&self, input: Value) -> Result<Value, WorkflowError>;
}

struct WorkflowWrapper<W: Workflow> {
    inner: W,
}

#[async_trait]
impl<W: Workflow> AnyWorkflow for WorkflowWrapper<W> {
    async fn run_json(&self, input: Value) -> Result<Value, WorkflowError> {
        let typed_input: W::Input = serde_json::from_value(input)
            .map_err(|e| WorkflowError::non_retryable(format!("invalid input: {e}")))?;
        let output = self.inner.run(typed_input).await?;
        serde_json::to_value(output)
            .map_err(|e| WorkflowError::non_retryable(format!("invalid output: {e}")))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("workflow type `{0}` is already registered")]
    DuplicateInputType(String),
}

/// Maps `workflow_type_name` to a registered handler. Registration is a
/// one-time, startup-only operation (invariant 2: one workflow per input
/// type); duplicate registration is a configuration error, not a runtime
/// one.
#[derive(Default)]
pub struct WorkflowRegistry {
    handlers: HashMap<String, Arc<dyn AnyWorkflow>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: Workflow>(&mut self, workflow: W) -> Result<(), RegistryError> {
        if self.handlers.contains_key(W::TYPE) {
            return Err(RegistryError::DuplicateInputType(W::TYPE.to_string()));
        }
        self.handlers.insert(
            W::TYPE.to_string(),
            Arc::new(WorkflowWrapper { inner: workflow }),
        );
        Ok(())
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.handlers.contains_key(workflow_type)
    }

    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }

    pub(crate) fn handler(&self, workflow_type: &str) -> Option<Arc<dyn AnyWorkflow>> {
        self.handlers.get(workflow_type).cloned()
    }

    pub async fn dispatch(&self, workflow_type: &str, input: Value) -> Result<Value, DispatchError> {
        let handler = self
            .handler(workflow_type)
            .ok_or_else(|| DispatchError::Unregistered(workflow_type.to_string()))?;
        handler
            .run_json(input)
            .await
            .map_err(DispatchError::Workflow)
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no workflow registered for type `{0}`")]
    Unregistered(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo {
        value: i32,
    }

    struct EchoWorkflow;

    #[async_trait]
    impl Workflow for EchoWorkflow {
        const TYPE: &'static str = "echo";
        type Input = Echo;
        type Output = Echo;

        async fn run(&self, input: Self::Input) -> Result<Self::Output, WorkflowError> {
            Ok(input)
        }
    }

    #[test]
    fn register_rejects_duplicate_type() {
        let mut registry = WorkflowRegistry::new();
        registry.register(EchoWorkflow).unwrap();
        let err = registry.register(EchoWorkflow).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateInputType(_)));
    }

    #[tokio::test]
    async fn dispatch_runs_registered_workflow() {
        let mut registry = WorkflowRegistry::new();
        registry.register(EchoWorkflow).unwrap();

        let output = registry
            .dispatch("echo", serde_json::json!({"value": 7}))
            .await
            .unwrap();
        assert_eq!(output, serde_json::json!({"value": 7}));
    }

    #[tokio::test]
    async fn dispatch_rejects_unregistered_type() {
        let registry = WorkflowRegistry::new();
        let err = registry
            .dispatch("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unregistered(_)));
    }
}
