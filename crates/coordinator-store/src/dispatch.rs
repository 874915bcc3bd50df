//! Pure work-queue dispatch algebra (§4.3): effective-priority computation,
//! sort order, and greedy admission. Kept free of any DB type so the
//! ordering/admission rules can be tested without a Postgres instance; the
//! Postgres-backed `Store::claim_next_work_queue` builds its candidate set
//! with SQL and then runs this same algebra over it inside the transaction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use coordinator_types::clamp_priority;
use uuid::Uuid;

use crate::store::GroupCap;

/// One queued candidate as seen by the admission algorithm.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: Uuid,
    pub group_id: Uuid,
    pub priority: i16,
    pub is_dependent: bool,
    pub created_at: DateTime<Utc>,
}

/// `effectivePriority = clamp(priority + (dependent ? dependentBoost : 0))`.
pub fn effective_priority(candidate: &Candidate, dependent_boost: i32) -> i16 {
    if candidate.is_dependent {
        clamp_priority(candidate.priority as i32 + dependent_boost)
    } else {
        candidate.priority
    }
}

/// Sort candidates by effective priority descending, `created_at` ascending
/// (FIFO tie-break). Stable so equal-priority FIFO order is preserved.
pub fn sort_candidates(candidates: &mut [Candidate], dependent_boost: i32) {
    candidates.sort_by(|a, b| {
        let ea = effective_priority(a, dependent_boost);
        let eb = effective_priority(b, dependent_boost);
        eb.cmp(&ea).then(a.created_at.cmp(&b.created_at))
    });
}

/// Greedy admission: walk candidates in sorted order, admitting a row iff
/// both the global and its group's counter are under cap. Admitted rows'
/// counters increment immediately so later candidates in the same group see
/// the updated count. Returns the admitted candidate ids in admission order.
pub fn admit(
    candidates: &[Candidate],
    global_cap: GroupCap,
    group_caps: &HashMap<Uuid, GroupCap>,
    mut global_active: u32,
    mut group_active: HashMap<Uuid, u32>,
) -> Vec<Uuid> {
    let mut admitted = Vec::new();
    for candidate in candidates {
        if !global_cap.allows(global_active) {
            continue;
        }
        let group_cap = group_caps
            .get(&candidate.group_id)
            .copied()
            .unwrap_or(GroupCap::Unbounded);
        let current_group_active = *group_active.get(&candidate.group_id).unwrap_or(&0);
        if !group_cap.allows(current_group_active) {
            continue;
        }

        admitted.push(candidate.id);
        global_active += 1;
        group_active.insert(candidate.group_id, current_group_active + 1);
    }
    admitted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: u8, group: u8, priority: i16, dependent: bool, offset_secs: i64) -> Candidate {
        Candidate {
            id: Uuid::from_bytes([id; 16]),
            group_id: Uuid::from_bytes([group; 16]),
            priority,
            is_dependent: dependent,
            created_at: DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn effective_priority_ignores_boost_for_non_dependents() {
        let c = candidate(1, 1, 10, false, 0);
        assert_eq!(effective_priority(&c, 20), 10);
    }

    #[test]
    fn effective_priority_applies_boost_and_clamps() {
        let c = candidate(1, 1, 28, true, 10);
        assert_eq!(effective_priority(&c, 10), 31);
    }

    #[test]
    fn sort_orders_by_priority_desc_then_fifo() {
        let mut candidates = vec![
            candidate(1, 1, 5, false, 10),
            candidate(2, 1, 10, false, 5),
            candidate(3, 1, 10, false, 1),
        ];
        sort_candidates(&mut candidates, 0);
        let ids: Vec<_> = candidates.iter().map(|c| c.id).collect();
        assert_eq!(
            ids,
            vec![
                Uuid::from_bytes([3; 16]),
                Uuid::from_bytes([2; 16]),
                Uuid::from_bytes([1; 16]),
            ]
        );
    }

    #[test]
    fn admission_respects_global_cap() {
        let candidates = vec![
            candidate(1, 1, 10, false, 0),
            candidate(2, 1, 10, false, 1),
            candidate(3, 1, 10, false, 2),
        ];
        let admitted = admit(
            &candidates,
            GroupCap::Bounded(2),
            &HashMap::new(),
            0,
            HashMap::new(),
        );
        assert_eq!(admitted.len(), 2);
    }

    #[test]
    fn admission_respects_per_group_cap() {
        let group_a = Uuid::from_bytes([1; 16]);
        let group_b = Uuid::from_bytes([2; 16]);
        let candidates = vec![
            candidate(1, 1, 10, false, 0),
            candidate(2, 1, 10, false, 1),
            candidate(3, 2, 10, false, 2),
        ];
        let mut group_caps = HashMap::new();
        group_caps.insert(group_a, GroupCap::Bounded(1));
        group_caps.insert(group_b, GroupCap::Unbounded);

        let admitted = admit(
            &candidates,
            GroupCap::Unbounded,
            &group_caps,
            0,
            HashMap::new(),
        );
        assert_eq!(admitted, vec![Uuid::from_bytes([1; 16]), Uuid::from_bytes([3; 16])]);
    }

    #[test]
    fn unbounded_cap_never_blocks() {
        assert!(GroupCap::Unbounded.allows(u32::MAX));
    }
}
