//! Quota accounting snapshot.
//!
//! A [`Snapshot`] is a self-consistent, mutable view of all pools and
//! cohorts taken at the start of a scheduling attempt. The minimal-set
//! solver owns it exclusively and mutates it hypothetically through
//! [`Snapshot::add_workload`] and [`Snapshot::remove_workload`]; the
//! caller discards or rebuilds it once the attempt finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::warn;

use crate::types::{
    FlavorName, PreemptionPolicies, ResourceName, ResourceQuantities, Workload, WorkloadKey,
};

/// Quota limits of one (resource, flavor) pair in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlavorQuota {
    /// Nominal entitlement. Consumption above it means the pool is
    /// borrowing from its cohort.
    pub min: i64,
}

/// A named quota container workloads are admitted into.
#[derive(Debug, Clone)]
pub struct QuotaPool {
    /// Pool name.
    pub name: String,
    /// Cohort the pool shares quota with, if any.
    pub cohort: Option<String>,
    /// Preemption configuration of the pool.
    pub preemption: PreemptionPolicies,
    /// Per-(resource, flavor) quota limits.
    pub quota: HashMap<ResourceName, HashMap<FlavorName, FlavorQuota>>,
    /// Per-(resource, flavor) consumption of the admitted workloads.
    pub used: ResourceQuantities,
    /// Currently admitted workloads.
    pub workloads: HashMap<WorkloadKey, Arc<Workload>>,
}

impl QuotaPool {
    /// Creates an empty standalone pool.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cohort: None,
            preemption: PreemptionPolicies::default(),
            quota: HashMap::new(),
            used: ResourceQuantities::new(),
            workloads: HashMap::new(),
        }
    }

    /// Places the pool in a cohort.
    #[must_use]
    pub fn with_cohort(mut self, cohort: impl Into<String>) -> Self {
        self.cohort = Some(cohort.into());
        self
    }

    /// Sets the preemption policies.
    #[must_use]
    pub fn with_preemption(mut self, preemption: PreemptionPolicies) -> Self {
        self.preemption = preemption;
        self
    }

    /// Sets the nominal quota of one (resource, flavor) pair.
    #[must_use]
    pub fn with_quota(
        mut self,
        resource: impl Into<ResourceName>,
        flavor: impl Into<FlavorName>,
        min: i64,
    ) -> Self {
        self.quota
            .entry(resource.into())
            .or_default()
            .insert(flavor.into(), FlavorQuota { min });
        self
    }

    /// Usage of a workload restricted to the (resource, flavor) pairs this
    /// pool defines quota for. Only those pairs are charged to counters.
    fn chargeable_usage(&self, workload: &Workload) -> ResourceQuantities {
        let mut usage = workload.usage();
        usage.retain(|resource, flavors| match self.quota.get(resource) {
            Some(defined) => {
                flavors.retain(|flavor, _| defined.contains_key(flavor));
                !flavors.is_empty()
            }
            None => false,
        });
        usage
    }
}

/// A group of pools sharing aggregate quota.
#[derive(Debug, Clone)]
pub struct Cohort {
    /// Cohort name.
    pub name: String,
    /// Names of the member pools.
    pub members: HashSet<String>,
    /// Aggregated consumption of the members.
    pub used: ResourceQuantities,
    /// Aggregated nominal entitlement, the sum of member minimums.
    pub requestable: ResourceQuantities,
}

impl Cohort {
    fn new(name: String) -> Self {
        Self {
            name,
            members: HashSet::new(),
            used: ResourceQuantities::new(),
            requestable: ResourceQuantities::new(),
        }
    }
}

/// Mutable view of all pools and cohorts at one scheduling attempt.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pools: HashMap<String, QuotaPool>,
    cohorts: HashMap<String, Cohort>,
}

impl Snapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pool, folding its quota into its cohort's aggregates.
    ///
    /// Each pool is expected to be added once, before any of its
    /// workloads.
    pub fn add_pool(&mut self, pool: QuotaPool) {
        if let Some(cohort_name) = pool.cohort.clone() {
            let cohort = self
                .cohorts
                .entry(cohort_name.clone())
                .or_insert_with(|| Cohort::new(cohort_name));
            cohort.members.insert(pool.name.clone());
            for (resource, flavors) in &pool.quota {
                for (flavor, quota) in flavors {
                    *cohort
                        .requestable
                        .entry(resource.clone())
                        .or_default()
                        .entry(flavor.clone())
                        .or_insert(0) += quota.min;
                }
            }
        }
        self.pools.insert(pool.name.clone(), pool);
    }

    /// Admits a workload into its pool, charging its usage to the pool
    /// and cohort counters.
    pub fn add_workload(&mut self, workload: Arc<Workload>) {
        let Some(pool) = self.pools.get_mut(&workload.pool) else {
            warn!(
                workload = %workload.key,
                pool = %workload.pool,
                "workload references a pool missing from the snapshot"
            );
            return;
        };
        let usage = pool.chargeable_usage(&workload);
        shift_usage(&mut pool.used, &usage, 1);
        pool.workloads
            .insert(workload.key.clone(), Arc::clone(&workload));
        let cohort_name = pool.cohort.clone();
        if let Some(name) = cohort_name {
            if let Some(cohort) = self.cohorts.get_mut(&name) {
                shift_usage(&mut cohort.used, &usage, 1);
            }
        }
    }

    /// Removes an admitted workload from its pool, releasing its usage
    /// from the pool and cohort counters.
    ///
    /// Removing a workload the snapshot does not hold is a no-op, so
    /// `remove_workload(add_workload(w))` is the identity.
    pub fn remove_workload(&mut self, workload: &Workload) {
        let Some(pool) = self.pools.get_mut(&workload.pool) else {
            return;
        };
        if pool.workloads.remove(&workload.key).is_none() {
            return;
        }
        let usage = pool.chargeable_usage(workload);
        shift_usage(&mut pool.used, &usage, -1);
        let cohort_name = pool.cohort.clone();
        if let Some(name) = cohort_name {
            if let Some(cohort) = self.cohorts.get_mut(&name) {
                shift_usage(&mut cohort.used, &usage, -1);
            }
        }
    }

    /// Looks up a pool by name.
    #[must_use]
    pub fn pool(&self, name: &str) -> Option<&QuotaPool> {
        self.pools.get(name)
    }

    /// Looks up a cohort by name.
    #[must_use]
    pub fn cohort(&self, name: &str) -> Option<&Cohort> {
        self.cohorts.get(name)
    }

    /// Resolves the cohort a pool belongs to, if any.
    #[must_use]
    pub fn cohort_of(&self, pool: &QuotaPool) -> Option<&Cohort> {
        pool.cohort.as_deref().and_then(|name| self.cohorts.get(name))
    }
}

fn shift_usage(counters: &mut ResourceQuantities, usage: &ResourceQuantities, sign: i64) {
    for (resource, flavors) in usage {
        let entry = counters.entry(resource.clone()).or_default();
        for (flavor, quantity) in flavors {
            *entry.entry(flavor.clone()).or_insert(0) += sign * quantity;
        }
    }
}
