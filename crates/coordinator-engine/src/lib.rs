//! The poll loops that drive the scheduler at runtime: due-manifest
//! detection, admission dispatch, workflow execution with retry/dead-letter
//! routing, startup recovery, and retention cleanup. Each loop owns a
//! `tokio::sync::watch<bool>` shutdown receiver, the same pattern
//! `coordinator-taskserver::WorkerPool` uses for its workers.

pub mod job_dispatcher;
pub mod manifest_manager;
pub mod metadata_cleanup;
pub mod retry;
pub mod startup_service;
pub mod task_server_executor;

pub use job_dispatcher::{JobDispatcher, JobDispatcherConfig};
pub use manifest_manager::{ManifestManager, ManifestManagerConfig};
pub use metadata_cleanup::{MetadataCleanup, MetadataCleanupConfig, ADMIN_WORKFLOW_NAMES};
pub use retry::RetryPolicy;
pub use startup_service::{ManifestSeed, StartupService, StartupServiceConfig};
pub use task_server_executor::{TaskServerExecutor, TaskServerExecutorConfig};
