//! `WorkflowBus`: the handle `TaskServerExecutor` holds to run a dispatched
//! job's workflow, and the `WorkflowTypeResolver` implementation
//! `ManifestScheduler` uses to enforce invariant 2 at schedule time.

use std::sync::{Arc, RwLock};

use coordinator_store::WorkflowTypeResolver;
use serde_json::Value;

use crate::registry::{DispatchError, WorkflowRegistry};
use crate::workflow::Workflow;

/// Thread-safe facade over a [`WorkflowRegistry`]. Built once at startup
/// (every workflow registered before the polling services start) and
/// shared by `coordinator-engine`'s executor and `coordinator-store`'s
/// scheduler. Uses a synchronous lock rather than `tokio::sync::RwLock`
/// because `WorkflowTypeResolver::is_registered` is called synchronously
/// from inside already-async scheduler methods.
#[derive(Clone)]
pub struct WorkflowBus {
    registry: Arc<RwLock<WorkflowRegistry>>,
}

impl Default for WorkflowBus {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(WorkflowRegistry::new())),
        }
    }

    pub fn register<W: Workflow>(&self, workflow: W) -> Result<(), crate::registry::RegistryError> {
        self.registry.write().unwrap().register(workflow)
    }

    pub async fn dispatch(&self, workflow_type: &str, input: Value) -> Result<Value, DispatchError> {
        let handler = self
            .registry
            .read()
            .unwrap()
            .handler(workflow_type)
            .ok_or_else(|| DispatchError::Unregistered(workflow_type.to_string()))?;
        handler
            .run_json(input)
            .await
            .map_err(DispatchError::Workflow)
    }

    /// A resolver handle that can be handed to `ManifestScheduler` without
    /// giving it access to `dispatch`.
    pub fn resolver(&self) -> Arc<dyn WorkflowTypeResolver> {
        Arc::new(BusResolver {
            registry: self.registry.clone(),
        })
    }
}

struct BusResolver {
    registry: Arc<RwLock<WorkflowRegistry>>,
}

impl WorkflowTypeResolver for BusResolver {
    fn is_registered(&self, workflow_type_name: &str) -> bool {
        self.registry.read().unwrap().contains(workflow_type_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowError;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Ping;

    struct PingWorkflow;

    #[async_trait]
    impl Workflow for PingWorkflow {
        const TYPE: &'static str = "ping";
        type Input = Ping;
        type Output = Ping;

        async fn run(&self, input: Self::Input) -> Result<Self::Output, WorkflowError> {
            Ok(input)
        }
    }

    #[tokio::test]
    async fn resolver_reflects_registered_workflows() {
        let bus = WorkflowBus::new();
        let resolver = bus.resolver();
        assert!(!resolver.is_registered("ping"));

        bus.register(PingWorkflow).unwrap();
        assert!(resolver.is_registered("ping"));
    }

    #[tokio::test]
    async fn dispatch_through_bus_runs_workflow() {
        let bus = WorkflowBus::new();
        bus.register(PingWorkflow).unwrap();

        let result = bus.dispatch("ping", serde_json::json!(null)).await.unwrap();
        assert_eq!(result, serde_json::Value::Null);
    }
}
