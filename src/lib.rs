//! Priority-based preemption core for quota-managed batch admission.
//!
//! When an incoming batch workload cannot be admitted because its quota
//! pool, or the cohort the pool shares quota with, is saturated, this
//! crate decides which already-admitted workloads to evict and issues the
//! evictions. It is a library with no binary, wire protocol or CLI; the
//! flavor assigner, the quota cache builder and the authoritative cluster
//! state store are external collaborators reached through injectable
//! seams.
//!
//! # How a preemption attempt runs
//!
//! 1. The flavors the incoming workload must preempt from are derived
//!    from its [`Assignment`] (`Preempt`-mode entries only).
//! 2. [`find_candidates`] enumerates eligible admitted workloads under
//!    the target pool's two policy axes: [`WithinPoolPolicy`] for its own
//!    workloads and [`ReclaimPolicy`] for borrowing pools of the cohort.
//! 3. [`candidate_ordering`] sorts them: cohort-foreign first, lower
//!    priority first, earlier admission first.
//! 4. [`minimal_preemptions`] greedily removes candidates from the
//!    [`Snapshot`] until the incoming workload fits its pool's nominal
//!    quota, then restores in reverse order whoever the fit survives
//!    without.
//! 5. [`Preemptor::preempt`] applies the admission-clearing mutation to
//!    each target with bounded parallelism, canceling the batch on the
//!    first error, and emits one `Preempted` event per confirmed
//!    eviction.
//!
//! The fit check is deliberately stricter than admission: a preemptor may
//! not borrow, since reclaiming nominal quota is the point of preempting.
//!
//! # Example
//!
//! ```rust
//! use preemptor::{
//!     Assignment, AssignmentMode, FlavorAssignment, NoOpAdmissionPatcher, PodSetAssignment,
//!     PreemptionPolicies, Preemptor, QuotaPool, Snapshot, TracingEventRecorder,
//!     WithinPoolPolicy, Workload,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! let mut snapshot = Snapshot::new();
//! snapshot.add_pool(
//!     QuotaPool::new("batch")
//!         .with_quota("cpu", "default", 6)
//!         .with_preemption(PreemptionPolicies {
//!             within_pool: WithinPoolPolicy::LowerPriority,
//!             ..PreemptionPolicies::default()
//!         }),
//! );
//! snapshot.add_workload(Arc::new(
//!     Workload::new("team-a/model-sweep", "batch")
//!         .with_priority(-1)
//!         .with_request("cpu", 4)
//!         .with_flavor("cpu", "default"),
//! ));
//! snapshot.add_workload(Arc::new(
//!     Workload::new("team-a/etl", "batch")
//!         .with_request("cpu", 2)
//!         .with_flavor("cpu", "default"),
//! ));
//!
//! // The upstream planner decided admission requires preempting on the
//! // default cpu flavor.
//! let incoming = Workload::new("team-b/urgent", "batch")
//!     .with_priority(1)
//!     .with_request("cpu", 4);
//! let assignment = Assignment::new().with_pod_set(
//!     PodSetAssignment::new("main")
//!         .with_flavor("cpu", FlavorAssignment::new("default", AssignmentMode::Preempt)),
//! );
//!
//! let preemptor = Preemptor::new(NoOpAdmissionPatcher::new(), TracingEventRecorder::new());
//! let (preempted, error) = futures::executor::block_on(preemptor.preempt(
//!     &CancellationToken::new(),
//!     &incoming,
//!     &assignment,
//!     &mut snapshot,
//! ));
//!
//! assert_eq!(preempted, 1);
//! assert!(error.is_none());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod candidates;
pub mod error;
pub mod preemptor;
pub mod quota;
pub mod snapshot;
pub mod solver;
pub mod types;

pub use candidates::{candidate_ordering, find_candidates};
pub use error::{PreemptionError, Result};
pub use preemptor::{
    AdmissionPatcher, EventRecorder, NoOpAdmissionPatcher, Preemptor, TracingEventRecorder,
    PARALLEL_PREEMPTIONS,
};
pub use quota::{
    fits, flavors_requiring_preemption, is_borrowing, per_flavor_demand, uses_required_flavors,
    FlavorsPerResource,
};
pub use snapshot::{Cohort, FlavorQuota, QuotaPool, Snapshot};
pub use solver::minimal_preemptions;
pub use types::{
    AdmissionPatch, Assignment, AssignmentMode, EventSeverity, FlavorAssignment, FlavorName,
    PodSetAssignment, PodSetResources, PreemptionOrigin, PreemptionPolicies, ReclaimPolicy,
    ResourceName, ResourceQuantities, WithinPoolPolicy, Workload, WorkloadEvent, WorkloadKey,
    FIELD_OWNER,
};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{PreemptionError, Result};
    pub use crate::preemptor::{
        AdmissionPatcher, EventRecorder, NoOpAdmissionPatcher, Preemptor, TracingEventRecorder,
    };
    pub use crate::snapshot::{Cohort, FlavorQuota, QuotaPool, Snapshot};
    pub use crate::types::{
        AdmissionPatch, Assignment, AssignmentMode, FlavorAssignment, PodSetAssignment,
        PodSetResources, PreemptionPolicies, ReclaimPolicy, WithinPoolPolicy, Workload,
        WorkloadEvent, WorkloadKey,
    };
}

#[cfg(test)]
mod scenario_tests {
    use super::*;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn standalone_pool() -> QuotaPool {
        QuotaPool::new("standalone")
            .with_quota("cpu", "default", 6)
            .with_quota("memory", "alpha", 3)
            .with_quota("memory", "beta", 3)
            .with_preemption(PreemptionPolicies {
                within_pool: WithinPoolPolicy::LowerPriority,
                ..PreemptionPolicies::default()
            })
    }

    fn cohort_pools() -> Vec<QuotaPool> {
        vec![
            QuotaPool::new("c1")
                .with_cohort("shared")
                .with_quota("cpu", "default", 6)
                .with_preemption(PreemptionPolicies {
                    within_pool: WithinPoolPolicy::LowerPriority,
                    reclaim_within_cohort: ReclaimPolicy::LowerPriority,
                }),
            QuotaPool::new("c2")
                .with_cohort("shared")
                .with_quota("cpu", "default", 6)
                .with_preemption(PreemptionPolicies {
                    within_pool: WithinPoolPolicy::Never,
                    reclaim_within_cohort: ReclaimPolicy::Any,
                }),
        ]
    }

    fn build_snapshot(pools: Vec<QuotaPool>, admitted: Vec<Workload>) -> Snapshot {
        let mut snapshot = Snapshot::new();
        for pool in pools {
            snapshot.add_pool(pool);
        }
        for workload in admitted {
            snapshot.add_workload(Arc::new(workload));
        }
        snapshot
    }

    fn cpu_workload(key: &str, pool: &str, priority: i32, cpus: i64) -> Workload {
        Workload::new(key, pool)
            .with_priority(priority)
            .with_request("cpu", cpus)
            .with_flavor("cpu", "default")
    }

    fn cpu_assignment() -> Assignment {
        Assignment::new().with_pod_set(
            PodSetAssignment::new("main").with_flavor(
                "cpu",
                FlavorAssignment::new("default", AssignmentMode::Preempt),
            ),
        )
    }

    /// Runs one preemption attempt against a no-op store and returns the
    /// count, the error and the sorted keys of the evicted workloads.
    async fn run(
        snapshot: &mut Snapshot,
        incoming: &Workload,
        assignment: &Assignment,
    ) -> (usize, Option<PreemptionError>, Vec<String>) {
        let preemptor = Preemptor::new(NoOpAdmissionPatcher::new(), TracingEventRecorder::new());
        let (count, error) = preemptor
            .preempt(&CancellationToken::new(), incoming, assignment, snapshot)
            .await;
        let mut keys: Vec<String> = preemptor
            .patcher()
            .applied()
            .iter()
            .map(|patch| patch.workload.to_string())
            .collect();
        keys.sort();
        (count, error, keys)
    }

    #[tokio::test]
    async fn preempts_lowest_priority_in_pool() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 2),
                cpu_workload("ns/mid", "standalone", 0, 2),
                cpu_workload("ns/high", "standalone", 1, 2),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 2);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/low"]);
    }

    #[tokio::test]
    async fn preempts_multiple_until_fit() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 2),
                cpu_workload("ns/mid", "standalone", 0, 2),
                cpu_workload("ns/high", "standalone", 1, 2),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 3);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (2, None));
        assert_eq!(keys, vec!["ns/low", "ns/mid"]);
    }

    #[tokio::test]
    async fn equal_priority_capacity_is_out_of_reach() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 3),
                cpu_workload("ns/mid", "standalone", 0, 3),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone").with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn incoming_without_priority_advantage_finds_no_candidates() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 3),
                cpu_workload("ns/mid", "standalone", 0, 3),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(-1)
            .with_request("cpu", 1);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn free_quota_still_evicts_only_the_lowest() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 1),
                cpu_workload("ns/mid", "standalone", 0, 1),
                cpu_workload("ns/high", "standalone", 1, 3),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 2);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/low"]);
    }

    #[tokio::test]
    async fn minimal_set_spares_the_lowest_priority() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                cpu_workload("ns/low", "standalone", -1, 1),
                cpu_workload("ns/mid", "standalone", 0, 2),
                cpu_workload("ns/high", "standalone", 1, 3),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 2);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/mid"]);
    }

    #[tokio::test]
    async fn only_workloads_on_the_chosen_flavor_are_evicted() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                Workload::new("ns/low", "standalone")
                    .with_priority(-1)
                    .with_request("memory", 2)
                    .with_flavor("memory", "alpha"),
                Workload::new("ns/mid", "standalone")
                    .with_request("memory", 1)
                    .with_flavor("memory", "beta"),
                Workload::new("ns/high", "standalone")
                    .with_priority(1)
                    .with_request("memory", 1)
                    .with_flavor("memory", "beta"),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 1)
            .with_request("memory", 2);
        let assignment = Assignment::new().with_pod_set(
            PodSetAssignment::new("main")
                .with_flavor("cpu", FlavorAssignment::new("default", AssignmentMode::Fit))
                .with_flavor(
                    "memory",
                    FlavorAssignment::new("beta", AssignmentMode::Preempt),
                ),
        );

        let (count, error, keys) = run(&mut snapshot, &incoming, &assignment).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/mid"]);
    }

    #[tokio::test]
    async fn reclaims_quota_from_the_borrowing_pool() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1-low", "c1", -1, 3),
                cpu_workload("ns/c2-mid", "c2", 0, 3),
                cpu_workload("ns/c2-high", "c2", 1, 6),
            ],
        );
        let incoming = Workload::new("ns/in", "c1")
            .with_priority(1)
            .with_request("cpu", 3);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/c2-mid"]);
    }

    #[tokio::test]
    async fn pools_within_nominal_quota_are_left_alone() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1-high", "c1", 1, 4),
                cpu_workload("ns/c2-low", "c2", -1, 4),
            ],
        );
        let incoming = Workload::new("ns/in", "c1")
            .with_priority(1)
            .with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn reclaim_stops_once_the_borrower_is_at_nominal() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1-high", "c1", 1, 4),
                cpu_workload("ns/c2-low-1", "c2", -1, 4),
                cpu_workload("ns/c2-low-2", "c2", -1, 4),
            ],
        );
        let incoming = Workload::new("ns/in", "c1")
            .with_priority(1)
            .with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn lower_priority_reclaim_skips_equal_priority_borrowers() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1", "c1", 0, 2),
                cpu_workload("ns/c2-1", "c2", 0, 4),
                cpu_workload("ns/c2-2", "c2", 0, 4),
            ],
        );
        let incoming = Workload::new("ns/in", "c1").with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn any_reclaim_takes_equal_priority_borrowers() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1-1", "c1", 0, 4),
                cpu_workload("ns/c1-2", "c1", 1, 4),
                cpu_workload("ns/c2", "c2", 0, 2),
            ],
        );
        let incoming = Workload::new("ns/in", "c2").with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (1, None));
        assert_eq!(keys, vec!["ns/c1-1"]);
    }

    #[tokio::test]
    async fn evicts_across_all_cohort_members() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![
                cpu_workload("ns/c1-low", "c1", -1, 3),
                cpu_workload("ns/c1-mid", "c1", 0, 2),
                cpu_workload("ns/c2-low", "c2", -1, 3),
                cpu_workload("ns/c2-mid", "c2", 0, 4),
            ],
        );
        let incoming = Workload::new("ns/in", "c1").with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (2, None));
        assert_eq!(keys, vec!["ns/c1-low", "ns/c2-low"]);
    }

    #[tokio::test]
    async fn within_pool_never_shields_own_workloads() {
        let mut snapshot = build_snapshot(
            cohort_pools(),
            vec![cpu_workload("ns/c2-low", "c2", -1, 3)],
        );
        let incoming = Workload::new("ns/in", "c2")
            .with_priority(1)
            .with_request("cpu", 4);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!((count, error), (0, None));
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn pod_sets_preempt_their_distinct_flavors() {
        let mut snapshot = build_snapshot(
            vec![standalone_pool()],
            vec![
                Workload::new("ns/low-alpha", "standalone")
                    .with_priority(-1)
                    .with_request("memory", 2)
                    .with_flavor("memory", "alpha"),
                Workload::new("ns/low-beta", "standalone")
                    .with_priority(-1)
                    .with_request("memory", 2)
                    .with_flavor("memory", "beta"),
            ],
        );
        let incoming = Workload::new("ns/in", "standalone")
            .with_pod_set(PodSetResources::new("launcher").with_request("memory", 2))
            .with_pod_set(PodSetResources::new("workers").with_request("memory", 2));
        let assignment = Assignment::new()
            .with_pod_set(PodSetAssignment::new("launcher").with_flavor(
                "memory",
                FlavorAssignment::new("alpha", AssignmentMode::Preempt),
            ))
            .with_pod_set(PodSetAssignment::new("workers").with_flavor(
                "memory",
                FlavorAssignment::new("beta", AssignmentMode::Preempt),
            ));

        let (count, error, keys) = run(&mut snapshot, &incoming, &assignment).await;
        assert_eq!((count, error), (2, None));
        assert_eq!(keys, vec!["ns/low-alpha", "ns/low-beta"]);
    }

    #[tokio::test]
    async fn missing_pool_is_an_error() {
        let mut snapshot = Snapshot::new();
        let incoming = Workload::new("ns/in", "ghost").with_request("cpu", 1);

        let (count, error, keys) = run(&mut snapshot, &incoming, &cpu_assignment()).await;
        assert_eq!(count, 0);
        assert_eq!(
            error,
            Some(PreemptionError::PoolNotFound {
                name: "ghost".into()
            })
        );
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn repeated_attempts_agree_on_the_target_set() {
        let admitted = || {
            vec![
                cpu_workload("ns/low", "standalone", -1, 2),
                cpu_workload("ns/mid", "standalone", 0, 2),
                cpu_workload("ns/high", "standalone", 1, 2),
            ]
        };
        let incoming = Workload::new("ns/in", "standalone")
            .with_priority(1)
            .with_request("cpu", 3);

        let mut first = build_snapshot(vec![standalone_pool()], admitted());
        let mut second = build_snapshot(vec![standalone_pool()], admitted());
        let (_, _, first_keys) = run(&mut first, &incoming, &cpu_assignment()).await;
        let (_, _, second_keys) = run(&mut second, &incoming, &cpu_assignment()).await;

        assert_eq!(first_keys, second_keys);
    }
}
