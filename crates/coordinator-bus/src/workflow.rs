//! The `Workflow` trait user code implements and registers. Deliberately
//! thinner than a full event-sourced workflow definition — the engine this
//! coordinator drives is out of scope; what's specified here is the
//! dispatch contract `TaskServerExecutor` needs: a typed input, a typed
//! output, and a single async entry point.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct WorkflowError {
    pub message: String,
    pub retryable: bool,
}

impl WorkflowError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    /// Mark this failure as non-retryable: `TaskServerExecutor` sends it
    /// straight to the dead letter queue regardless of remaining retries.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// A registered unit of user code. `TYPE` is the stable identifier stored
/// in `manifest.workflow_type_name` / `metadata.workflow_name`; `Input`'s
/// runtime type is the key invariant 2 enforces uniqueness over.
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    const TYPE: &'static str;
    type Input: Serialize + DeserializeOwned + Send + Sync;
    type Output: Serialize + DeserializeOwned + Send + Sync;

    async fn run(&self, input: Self::Input) -> Result<Self::Output, WorkflowError>;
}
