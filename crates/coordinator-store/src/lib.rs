//! Durable CRUD and atomic operations over the coordinator's six tables,
//! the work-queue dispatch algebra, and the `ManifestScheduler` public API
//! that configuration code and runtime callers use to declare schedules.

pub mod dispatch;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod scheduler;
pub mod store;

pub use error::StoreError;
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use scheduler::{
    ManifestScheduler, ManyScheduleItem, ScheduleOptions, SchedulerError, WorkflowTypeResolver,
};
pub use store::{AdmissionParams, GroupCap, NewWorkQueueEntry, Store, UpsertManifestInput};
