//! Preemption orchestration and eviction dispatch.
//!
//! The [`Preemptor`] glues the candidate search, the ordering, the
//! minimal-set solver and the bounded-parallel dispatch together. Its two
//! collaborator seams are injectable at construction:
//! - [`AdmissionPatcher`] persists the admission-clearing mutation to the
//!   authoritative store,
//! - [`EventRecorder`] receives one event per confirmed eviction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::candidates::{candidate_ordering, find_candidates};
use crate::error::{PreemptionError, Result};
use crate::quota::flavors_requiring_preemption;
use crate::snapshot::Snapshot;
use crate::solver::minimal_preemptions;
use crate::types::{AdmissionPatch, Assignment, PreemptionOrigin, Workload, WorkloadEvent};

/// Upper bound on concurrent admission-clearing mutations per batch.
pub const PARALLEL_PREEMPTIONS: usize = 8;

/// Applies admission-clearing patches to the authoritative workload
/// store.
///
/// Implement this trait to integrate with your cluster state store. The
/// patch carries a stable field-owner identity; implementations must
/// apply it idempotently so an outer scheduling loop can safely retry.
#[async_trait]
pub trait AdmissionPatcher: Send + Sync {
    /// Persists the admission-clearing mutation for one workload.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects or fails the patch.
    async fn clear_admission(&self, patch: &AdmissionPatch) -> Result<()>;
}

/// Receives the event emitted for each successfully evicted workload.
pub trait EventRecorder: Send + Sync {
    /// Publishes an event on a workload.
    fn publish(&self, event: WorkloadEvent);
}

/// Default [`EventRecorder`] that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl TracingEventRecorder {
    /// Creates a new tracing-backed recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl EventRecorder for TracingEventRecorder {
    fn publish(&self, event: WorkloadEvent) {
        info!(
            workload = %event.workload,
            severity = %event.severity,
            reason = %event.reason,
            "{}", event.message
        );
    }
}

/// An [`AdmissionPatcher`] that records patches instead of applying them.
///
/// Useful in tests and dry runs.
#[derive(Debug, Default)]
pub struct NoOpAdmissionPatcher {
    applied: Mutex<Vec<AdmissionPatch>>,
}

impl NoOpAdmissionPatcher {
    /// Creates a new no-op patcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the patches recorded so far.
    #[must_use]
    pub fn applied(&self) -> Vec<AdmissionPatch> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl AdmissionPatcher for NoOpAdmissionPatcher {
    async fn clear_admission(&self, patch: &AdmissionPatch) -> Result<()> {
        debug!(workload = %patch.workload, "recorded admission clear without applying");
        self.applied.lock().push(patch.clone());
        Ok(())
    }
}

/// Decides which admitted workloads to evict when an incoming workload
/// cannot be admitted without preemption, and issues the evictions.
pub struct Preemptor<P, R> {
    patcher: P,
    recorder: R,
}

impl<P: AdmissionPatcher, R: EventRecorder> Preemptor<P, R> {
    /// Creates a preemptor with the given store and event seams.
    #[must_use]
    pub fn new(patcher: P, recorder: R) -> Self {
        Self { patcher, recorder }
    }

    /// Returns the admission patcher.
    #[must_use]
    pub fn patcher(&self) -> &P {
        &self.patcher
    }

    /// Returns the event recorder.
    #[must_use]
    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Runs one preemption attempt for an incoming workload whose flavor
    /// assignment came back in `Preempt` mode.
    ///
    /// The snapshot is consumed as scratch space: the solver mutates it
    /// in place and it must be discarded or rebuilt afterwards.
    ///
    /// Returns the number of confirmed evictions together with the first
    /// mutation error, if any. A positive count next to an error means
    /// partial progress: some evictions were applied before the batch was
    /// aborted. An empty or insufficient candidate set is not an error
    /// and yields `(0, None)`.
    pub async fn preempt(
        &self,
        cancel: &CancellationToken,
        incoming: &Workload,
        assignment: &Assignment,
        snapshot: &mut Snapshot,
    ) -> (usize, Option<PreemptionError>) {
        let flavors = flavors_requiring_preemption(assignment);
        let Some(pool) = snapshot.pool(&incoming.pool) else {
            return (
                0,
                Some(PreemptionError::PoolNotFound {
                    name: incoming.pool.clone(),
                }),
            );
        };
        let policies = pool.preemption;

        let mut candidates = find_candidates(incoming, snapshot, &incoming.pool, &flavors);
        if candidates.is_empty() {
            debug!(
                workload = %incoming.key,
                pool = %incoming.pool,
                within_pool = ?policies.within_pool,
                reclaim_within_cohort = ?policies.reclaim_within_cohort,
                "workload requires preemption, but no admitted workload is eligible"
            );
            return (0, None);
        }
        let now = Utc::now();
        candidates.sort_by(|a, b| candidate_ordering(a, b, &incoming.pool, now));

        let targets = minimal_preemptions(incoming, assignment, snapshot, &flavors, &candidates);
        if targets.is_empty() {
            debug!(
                workload = %incoming.key,
                pool = %incoming.pool,
                candidates = candidates.len(),
                "workload requires preemption, but the eligible candidates do not free enough quota"
            );
            return (0, None);
        }

        self.issue_preemptions(cancel, &targets, &incoming.pool)
            .await
    }

    /// Applies the admission-clearing mutation to every target with
    /// bounded parallelism and first-error cancellation.
    ///
    /// The internal cancellation token is a child of the caller's, so
    /// caller cancellation propagates in while the first-error cancel
    /// stays internal. Workers that observe cancellation before starting
    /// return without applying and without emitting events; an apply
    /// already in flight runs to completion and its outcome is recorded
    /// either way.
    async fn issue_preemptions(
        &self,
        cancel: &CancellationToken,
        targets: &[Arc<Workload>],
        origin_pool: &str,
    ) -> (usize, Option<PreemptionError>) {
        let cancel = cancel.child_token();
        let preempted = AtomicUsize::new(0);
        let first_error: Mutex<Option<PreemptionError>> = Mutex::new(None);

        stream::iter(targets.iter().cloned())
            .for_each_concurrent(PARALLEL_PREEMPTIONS, |target| {
                let cancel = cancel.clone();
                let preempted = &preempted;
                let first_error = &first_error;
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let patch = target.clear_admission();
                    // An apply that has started runs to completion; the
                    // token only gates starting new work.
                    match self.patcher.clear_admission(&patch).await {
                        Ok(()) => {
                            let origin = if target.pool == origin_pool {
                                PreemptionOrigin::ClusterQueue
                            } else {
                                PreemptionOrigin::Cohort
                            };
                            debug!(
                                workload = %target.key,
                                origin = %origin,
                                "cleared admission of preemption target"
                            );
                            self.recorder
                                .publish(WorkloadEvent::preempted(target.key.clone(), origin));
                            preempted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(error) => {
                            let mut slot = first_error.lock();
                            if slot.is_none() {
                                *slot = Some(error);
                            }
                            drop(slot);
                            cancel.cancel();
                        }
                    }
                }
            })
            .await;

        (preempted.load(Ordering::SeqCst), first_error.into_inner())
    }
}
