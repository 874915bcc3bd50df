//! Due-time evaluation shared by both `Store` implementations'
//! `list_due_manifests`, so interval/cron/dependent due-ness is computed
//! identically regardless of backend.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use crate::model::{Manifest, ScheduleKind};

/// Whether `manifest` has a due occurrence at `now`. `parent_last_successful_run`
/// is the parent manifest's `last_successful_run`, looked up by the caller;
/// irrelevant for non-`Dependent` schedules.
pub fn is_due(
    manifest: &Manifest,
    now: DateTime<Utc>,
    parent_last_successful_run: Option<DateTime<Utc>>,
) -> bool {
    match manifest.schedule_kind() {
        ScheduleKind::None | ScheduleKind::OnDemand => false,
        ScheduleKind::Interval(seconds) => match manifest.last_successful_run {
            Some(last) => now >= last + chrono::Duration::seconds(seconds),
            None => true,
        },
        ScheduleKind::Cron(expression) => {
            let anchor = manifest.last_successful_run.unwrap_or(manifest.created_at);
            match next_cron_fire(&expression, anchor) {
                Some(next) => next <= now,
                None => false,
            }
        }
        ScheduleKind::Dependent(_) => {
            if manifest.is_dormant {
                return false;
            }
            match (parent_last_successful_run, manifest.last_successful_run) {
                (Some(parent_run), Some(self_run)) => parent_run > self_run,
                (Some(_), None) => true,
                _ => false,
            }
        }
    }
}

/// The next occurrence of `expression` strictly after `after`, or `None` if
/// the expression is malformed (treated as never-due rather than panicking;
/// `Schedule::cron` validates at construction time so this should not
/// happen for manifests created through `ManifestScheduler`).
pub fn next_cron_fire(expression: &str, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let schedule = CronSchedule::from_str(expression).ok()?;
    schedule.after(&after).next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleTypeTag;
    use uuid::Uuid;

    fn base_manifest() -> Manifest {
        let now = Utc::now();
        Manifest {
            id: Uuid::now_v7(),
            external_id: "m".to_string(),
            workflow_type_name: "Wf".to_string(),
            input: serde_json::json!({}),
            schedule_type: ScheduleTypeTag::None,
            cron_expression: None,
            interval_seconds: None,
            is_enabled: true,
            is_dormant: false,
            max_retries: 3,
            timeout_seconds: None,
            priority: 16,
            manifest_group_id: Uuid::now_v7(),
            parent_manifest_id: None,
            last_successful_run: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn cron_manifest_is_not_due_before_its_next_occurrence() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Cron;
        manifest.cron_expression = Some("0 0 0 1 1 * 2999".to_string());
        assert!(!is_due(&manifest, Utc::now(), None));
    }

    #[test]
    fn cron_manifest_is_due_once_its_next_occurrence_has_passed() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Cron;
        // every second, so any `now` after `created_at` has a due occurrence.
        manifest.cron_expression = Some("* * * * * *".to_string());
        assert!(is_due(&manifest, manifest.created_at + chrono::Duration::seconds(2), None));
    }

    #[test]
    fn cron_manifest_anchors_on_last_successful_run_not_every_tick() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Cron;
        manifest.cron_expression = Some("0 0 0 * * *".to_string()); // once a day at midnight
        manifest.last_successful_run = Some(manifest.created_at);
        let next_midnight = next_cron_fire("0 0 0 * * *", manifest.created_at).unwrap();
        assert!(!is_due(&manifest, next_midnight - chrono::Duration::seconds(1), None));
        assert!(is_due(&manifest, next_midnight, None));
    }

    #[test]
    fn interval_manifest_due_when_elapsed() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Interval;
        manifest.interval_seconds = Some(60);
        manifest.last_successful_run = Some(manifest.created_at);
        assert!(!is_due(&manifest, manifest.created_at + chrono::Duration::seconds(30), None));
        assert!(is_due(&manifest, manifest.created_at + chrono::Duration::seconds(61), None));
    }

    #[test]
    fn dependent_manifest_due_when_parent_advanced_past_self() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Dependent;
        manifest.parent_manifest_id = Some(Uuid::now_v7());
        manifest.last_successful_run = Some(manifest.created_at);
        let parent_run = manifest.created_at + chrono::Duration::seconds(5);
        assert!(is_due(&manifest, Utc::now(), Some(parent_run)));
        assert!(!is_due(&manifest, Utc::now(), Some(manifest.created_at)));
    }

    #[test]
    fn dormant_dependent_manifest_is_never_due() {
        let mut manifest = base_manifest();
        manifest.schedule_type = ScheduleTypeTag::Dependent;
        manifest.parent_manifest_id = Some(Uuid::now_v7());
        manifest.is_dormant = true;
        let parent_run = Utc::now();
        assert!(!is_due(&manifest, Utc::now(), Some(parent_run)));
    }
}
