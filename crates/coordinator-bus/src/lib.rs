//! The workflow registration and dispatch surface: user code implements
//! [`Workflow`], registers it on a [`WorkflowBus`] at startup, and
//! `coordinator-engine`'s `TaskServerExecutor` calls `WorkflowBus::dispatch`
//! for each claimed job.

pub mod bus;
pub mod registry;
pub mod workflow;

pub use bus::WorkflowBus;
pub use registry::{DispatchError, RegistryError, WorkflowRegistry};
pub use workflow::{Workflow, WorkflowError};
