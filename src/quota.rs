//! Quota predicates and demand derivation.
//!
//! Free functions over the snapshot records: the strict fit check used
//! during preemption, the live borrowing predicate, and the helpers that
//! translate a flavor [`Assignment`] into per-flavor demand.

use std::collections::{HashMap, HashSet};

use crate::snapshot::{Cohort, QuotaPool};
use crate::types::{
    Assignment, AssignmentMode, FlavorName, ResourceName, ResourceQuantities, Workload,
};

/// The flavors an incoming workload must preempt from, per resource.
pub type FlavorsPerResource = HashMap<ResourceName, HashSet<FlavorName>>;

/// Collects the (resource, flavor) pairs assigned in `Preempt` mode.
///
/// `Fit` assignments contribute nothing and `NoFit` assignments never
/// reach the preemption path.
#[must_use]
pub fn flavors_requiring_preemption(assignment: &Assignment) -> FlavorsPerResource {
    let mut flavors = FlavorsPerResource::new();
    for pod_set in &assignment.pod_sets {
        for (resource, flavor) in &pod_set.flavors {
            if flavor.mode != AssignmentMode::Preempt {
                continue;
            }
            flavors
                .entry(resource.clone())
                .or_default()
                .insert(flavor.name.clone());
        }
    }
    flavors
}

/// Per-flavor demand of an incoming workload under an assignment.
///
/// Every request is keyed by the flavor the assignment chose for its
/// pod-set and resource, whatever the assignment mode. Requests the
/// assignment does not cover contribute nothing.
#[must_use]
pub fn per_flavor_demand(workload: &Workload, assignment: &Assignment) -> ResourceQuantities {
    let mut demand = ResourceQuantities::new();
    for (index, pod_set) in workload.pod_sets.iter().enumerate() {
        let Some(assigned) = assignment.pod_sets.get(index) else {
            continue;
        };
        for (resource, quantity) in &pod_set.requests {
            let Some(flavor) = assigned.flavors.get(resource) else {
                continue;
            };
            *demand
                .entry(resource.clone())
                .or_default()
                .entry(flavor.name.clone())
                .or_insert(0) += quantity;
        }
    }
    demand
}

/// Whether an admitted workload occupies any of the required flavors.
///
/// Evicting a workload that uses none of them cannot help the preemptor.
#[must_use]
pub fn uses_required_flavors(workload: &Workload, flavors: &FlavorsPerResource) -> bool {
    workload.pod_sets.iter().any(|pod_set| {
        pod_set.flavors.iter().any(|(resource, flavor)| {
            flavors
                .get(resource)
                .is_some_and(|names| names.contains(flavor))
        })
    })
}

/// Whether the demand fits the pool's nominal quota and, when the pool
/// joins a cohort, the cohort's aggregate quota.
///
/// This is stricter than the admission check: no borrowing is allowed,
/// since preemption must reclaim nominal quota. Pairs the pool defines no
/// quota for are ignored; the upstream flavor assigner guarantees
/// requested flavors exist in the pool.
#[must_use]
pub fn fits(demand: &ResourceQuantities, pool: &QuotaPool, cohort: Option<&Cohort>) -> bool {
    for (resource, flavor_demand) in demand {
        let Some(quota_flavors) = pool.quota.get(resource) else {
            continue;
        };
        for (flavor, quota) in quota_flavors {
            let Some(&requested) = flavor_demand.get(flavor) else {
                continue;
            };
            if lookup(&pool.used, resource, flavor) + requested > quota.min {
                return false;
            }
            let Some(cohort) = cohort else { continue };
            let Some(&limit) = cohort
                .requestable
                .get(resource)
                .and_then(|flavors| flavors.get(flavor))
            else {
                continue;
            };
            if lookup(&cohort.used, resource, flavor) + requested > limit {
                return false;
            }
        }
    }
    true
}

/// Whether the pool currently consumes more than its nominal minimum on
/// any of the given flavors.
///
/// Recomputed against the live snapshot throughout the search; earlier
/// removals can end a pool's borrowing.
#[must_use]
pub fn is_borrowing(pool: &QuotaPool, flavors: &FlavorsPerResource) -> bool {
    flavors.iter().any(|(resource, names)| {
        pool.quota.get(resource).is_some_and(|quota_flavors| {
            quota_flavors.iter().any(|(flavor, quota)| {
                names.contains(flavor) && lookup(&pool.used, resource, flavor) > quota.min
            })
        })
    })
}

fn lookup(quantities: &ResourceQuantities, resource: &str, flavor: &str) -> i64 {
    quantities
        .get(resource)
        .and_then(|flavors| flavors.get(flavor))
        .copied()
        .unwrap_or(0)
}
