//! Near-minimal eviction set computation.

use std::sync::Arc;

use crate::quota::{fits, is_borrowing, per_flavor_demand, FlavorsPerResource};
use crate::snapshot::Snapshot;
use crate::types::{Assignment, ResourceQuantities, Workload};

/// Computes a near-minimal set of workloads whose removal lets the
/// incoming workload fit in its pool's nominal quota.
///
/// Candidates are removed from the snapshot in the given order, skipping
/// foreign-pool candidates whose pool stopped borrowing because of earlier
/// removals, until the incoming workload fits. A reverse restoration pass
/// then adds candidates back where the fit survives without them. The
/// candidate whose removal produced the fit is necessary by construction
/// and is never restored.
///
/// Returns the empty vector when even removing every candidate does not
/// produce a fit; the snapshot keeps the removals in that case and the
/// caller is expected to discard it.
#[must_use]
pub fn minimal_preemptions(
    incoming: &Workload,
    assignment: &Assignment,
    snapshot: &mut Snapshot,
    flavors: &FlavorsPerResource,
    candidates: &[Arc<Workload>],
) -> Vec<Arc<Workload>> {
    let demand = per_flavor_demand(incoming, assignment);
    let mut targets: Vec<Arc<Workload>> = Vec::new();
    let mut admissible = false;
    for candidate in candidates {
        if candidate.pool != incoming.pool {
            // Eligibility at enumeration time is not enough: an earlier
            // removal may have ended this pool's borrowing.
            let still_borrowing = snapshot
                .pool(&candidate.pool)
                .is_some_and(|pool| is_borrowing(pool, flavors));
            if !still_borrowing {
                continue;
            }
        }
        snapshot.remove_workload(candidate);
        targets.push(Arc::clone(candidate));
        if demand_fits(snapshot, &incoming.pool, &demand) {
            admissible = true;
            break;
        }
    }
    if !admissible {
        return Vec::new();
    }

    // Walk everything but the last target in reverse insertion order and
    // spare whoever the fit survives without.
    for index in (0..targets.len().saturating_sub(1)).rev() {
        snapshot.add_workload(Arc::clone(&targets[index]));
        if demand_fits(snapshot, &incoming.pool, &demand) {
            targets.swap_remove(index);
        } else {
            snapshot.remove_workload(&targets[index]);
        }
    }
    targets
}

fn demand_fits(snapshot: &Snapshot, pool_name: &str, demand: &ResourceQuantities) -> bool {
    snapshot
        .pool(pool_name)
        .is_some_and(|pool| fits(demand, pool, snapshot.cohort_of(pool)))
}
