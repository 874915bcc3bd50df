//! Postgres-backed task server: enqueue/claim/complete over
//! `background_job`, with visibility-timeout crash recovery, and the
//! worker pool that drives it.

pub mod error;
pub mod postgres;
pub mod server;
pub mod worker;

pub use error::TaskServerError;
pub use postgres::PostgresTaskServer;
pub use server::TaskServer;
pub use worker::{handler_fn, JobHandler, WorkerPool, WorkerPoolConfig};
