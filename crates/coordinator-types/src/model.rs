//! Entity structs for the six persisted tables. These mirror the Postgres
//! schema column-for-column so the store layer can `FromRow` them directly;
//! derived helpers (e.g. [`Manifest::schedule_kind`]) live alongside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical bucket sharing dispatch policy (priority, concurrency cap, kill
/// switch) across a set of manifests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestGroup {
    pub id: Uuid,
    pub name: String,
    pub priority: i16,
    /// `None` means unbounded.
    pub max_active_jobs: Option<i32>,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The four persisted schedule-type column values, plus the two optional
/// columns (`cron_expression`, `interval_seconds`) they're paired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleTypeTag {
    None,
    Cron,
    Interval,
    OnDemand,
    Dependent,
}

impl ScheduleTypeTag {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cron => "cron",
            Self::Interval => "interval",
            Self::OnDemand => "on_demand",
            Self::Dependent => "dependent",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "none" => Self::None,
            "cron" => Self::Cron,
            "interval" => Self::Interval,
            "on_demand" => Self::OnDemand,
            "dependent" => Self::Dependent,
            _ => return None,
        })
    }
}

/// A scheduled-job definition, upsertable by `external_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub id: Uuid,
    pub external_id: String,
    pub workflow_type_name: String,
    pub input: serde_json::Value,
    pub schedule_type: ScheduleTypeTag,
    pub cron_expression: Option<String>,
    pub interval_seconds: Option<i64>,
    pub is_enabled: bool,
    pub is_dormant: bool,
    pub max_retries: i32,
    pub timeout_seconds: Option<i64>,
    pub priority: i16,
    pub manifest_group_id: Uuid,
    pub parent_manifest_id: Option<Uuid>,
    pub last_successful_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A manifest's schedule collapsed into the single enum business logic
/// actually branches on. Derived from the three raw columns rather than
/// stored directly (invariant 4: `Dependent` implies `parent_manifest_id`
/// is set and cron/interval are both `None`).
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleKind {
    None,
    Cron(String),
    Interval(i64),
    OnDemand,
    Dependent(Uuid),
}

impl Manifest {
    pub fn schedule_kind(&self) -> ScheduleKind {
        match self.schedule_type {
            ScheduleTypeTag::None => ScheduleKind::None,
            ScheduleTypeTag::OnDemand => ScheduleKind::OnDemand,
            ScheduleTypeTag::Cron => {
                ScheduleKind::Cron(self.cron_expression.clone().unwrap_or_default())
            }
            ScheduleTypeTag::Interval => {
                ScheduleKind::Interval(self.interval_seconds.unwrap_or(0))
            }
            ScheduleTypeTag::Dependent => {
                ScheduleKind::Dependent(self.parent_manifest_id.unwrap_or_default())
            }
        }
    }
}

/// State of a single execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl MetadataState {
    /// Whether this state counts toward active-jobs accounting
    /// (invariant 10: `Pending` or `InProgress`).
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// One execution attempt of a manifest (or an ad-hoc trigger).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Uuid,
    pub external_id: String,
    pub manifest_id: Option<Uuid>,
    pub workflow_name: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub state: MetadataState,
    pub scheduled_time: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub currently_running_step: Option<String>,
    pub cancellation_requested: bool,
}

/// Status of a work-queue row (invariant 7: Queued -> {Dispatched|Cancelled}, terminal after).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkQueueStatus {
    Queued,
    Dispatched,
    Cancelled,
}

impl WorkQueueStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "queued" => Self::Queued,
            "dispatched" => Self::Dispatched,
            "cancelled" => Self::Cancelled,
            _ => return None,
        })
    }
}

/// A request to dispatch one manifest execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueueEntry {
    pub id: Uuid,
    pub external_id: String,
    pub workflow_name: String,
    pub input: serde_json::Value,
    pub input_type_name: String,
    pub manifest_id: Option<Uuid>,
    pub metadata_id: Option<Uuid>,
    pub priority: i16,
    pub status: WorkQueueStatus,
    /// Cumulative retry attempt carried forward from the metadata row that
    /// triggered this re-enqueue; `0` for a fresh scheduled/triggered run.
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
}

/// Status of a dead-letter entry, transitioned only by manual action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    AwaitingIntervention,
    Acknowledged,
    Retried,
}

impl DeadLetterStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::AwaitingIntervention => "awaiting_intervention",
            Self::Acknowledged => "acknowledged",
            Self::Retried => "retried",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        Some(match s {
            "awaiting_intervention" => Self::AwaitingIntervention,
            "acknowledged" => Self::Acknowledged,
            "retried" => Self::Retried,
            _ => return None,
        })
    }
}

/// A manifest execution that exhausted retries or hit a non-retryable error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub reason: String,
    pub retry_count_at_dead_letter: i32,
    pub status: DeadLetterStatus,
    pub resolution_note: Option<String>,
    pub retry_metadata_id: Option<Uuid>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// A task-server claim row. `fetched_at = None` means unclaimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundJob {
    pub id: Uuid,
    pub payload: serde_json::Value,
    pub fetched_at: Option<DateTime<Utc>>,
    pub available_at: DateTime<Utc>,
}
