//! Domain types shared by the coordinator: manifests, groups, the work
//! queue, dead letters, background jobs, and the pure priority/DAG algebra
//! that sits on top of them.
//!
//! This crate has no database or async dependency — it is the vocabulary
//! the rest of the workspace speaks.

pub mod dag;
pub mod due;
pub mod model;
pub mod priority;
pub mod schedule;

pub use dag::{DagValidator, DagValidatorError};
pub use due::{is_due, next_cron_fire};
pub use model::{
    BackgroundJob, DeadLetter, DeadLetterStatus, Manifest, ManifestGroup, Metadata,
    MetadataState, ScheduleKind, ScheduleTypeTag, WorkQueueEntry, WorkQueueStatus,
};
pub use priority::{clamp_priority, MAX_PRIORITY, MIN_PRIORITY};
pub use schedule::{Schedule, ScheduleError};
