//! Candidate enumeration and preemption ordering.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::quota::{is_borrowing, uses_required_flavors, FlavorsPerResource};
use crate::snapshot::{QuotaPool, Snapshot};
use crate::types::{ReclaimPolicy, WithinPoolPolicy, Workload};

/// Enumerates the admitted workloads eligible for preemption under the
/// target pool's policies, restricted to workloads occupying a flavor the
/// incoming workload requires.
///
/// Foreign pools of the cohort are scanned only when the reclaim policy
/// allows it and only while they are borrowing. Within the target pool,
/// only strictly lower-priority workloads are ever eligible; in foreign
/// pools [`ReclaimPolicy::Any`] lifts the priority restriction.
///
/// The returned order is arbitrary; the caller sorts with
/// [`candidate_ordering`].
#[must_use]
pub fn find_candidates(
    incoming: &Workload,
    snapshot: &Snapshot,
    target_pool: &str,
    flavors: &FlavorsPerResource,
) -> Vec<Arc<Workload>> {
    let Some(target) = snapshot.pool(target_pool) else {
        return Vec::new();
    };
    let mut scan: Vec<&QuotaPool> = vec![target];
    if target.preemption.reclaim_within_cohort != ReclaimPolicy::Never {
        if let Some(cohort) = snapshot.cohort_of(target) {
            scan = cohort
                .members
                .iter()
                .filter_map(|name| snapshot.pool(name))
                .collect();
        }
    }
    if target.preemption.within_pool == WithinPoolPolicy::Never {
        scan.retain(|pool| pool.name != target_pool);
    }

    let mut candidates = Vec::new();
    for pool in scan {
        let mut only_lower_priority = true;
        if pool.name != target_pool {
            // Quota can only be reclaimed from pools that are borrowing.
            if !is_borrowing(pool, flavors) {
                continue;
            }
            if target.preemption.reclaim_within_cohort == ReclaimPolicy::Any {
                only_lower_priority = false;
            }
        }
        for workload in pool.workloads.values() {
            if only_lower_priority && workload.priority >= incoming.priority {
                continue;
            }
            if !uses_required_flavors(workload, flavors) {
                continue;
            }
            candidates.push(Arc::clone(workload));
        }
    }
    candidates
}

/// Total order on candidates; lower sorts first and is preempted sooner.
///
/// Criteria:
/// 1. workloads from other pools of the cohort before workloads in the
///    target pool,
/// 2. lower priority first,
/// 3. earlier effective admission first, where a workload without an
///    admission timestamp counts as admitted at `now`.
#[must_use]
pub fn candidate_ordering(
    a: &Workload,
    b: &Workload,
    target_pool: &str,
    now: DateTime<Utc>,
) -> Ordering {
    let a_in_pool = a.pool == target_pool;
    let b_in_pool = b.pool == target_pool;
    if a_in_pool != b_in_pool {
        return if a_in_pool {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    a.priority
        .cmp(&b.priority)
        .then_with(|| admission_time(a, now).cmp(&admission_time(b, now)))
}

fn admission_time(workload: &Workload, now: DateTime<Utc>) -> DateTime<Utc> {
    workload.admitted_at.unwrap_or(now)
}
