//! Core types for the preemption system.
//!
//! This module provides the records the preemption core operates on:
//! - [`Workload`]: an admitted or pending batch unit
//! - [`Assignment`]: the upstream planner's per-pod-set flavor decisions
//! - [`PreemptionPolicies`]: the two per-pool preemption axes
//! - [`AdmissionPatch`]: the mutation payload that clears an admission
//! - [`WorkloadEvent`]: the observability event emitted per eviction

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of a resource (e.g. `cpu`, `memory`).
pub type ResourceName = String;

/// Name of a flavor, a named variant of a resource (e.g. `alpha`, `beta`).
pub type FlavorName = String;

/// Per-(resource, flavor) integer quantities.
pub type ResourceQuantities = HashMap<ResourceName, HashMap<FlavorName, i64>>;

/// Field-owner identity attached to admission-clearing patches so the
/// store can resolve conflicts between writers.
pub const FIELD_OWNER: &str = "batch-admission";

const MAIN_POD_SET: &str = "main";

/// Stable, namespace-qualified identity of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadKey(String);

impl WorkloadKey {
    /// Creates a new workload key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mode the upstream flavor assigner decided for one (pod-set, resource)
/// pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentMode {
    /// The request fits in currently unused quota.
    Fit,
    /// Admission requires evicting incumbents from this flavor.
    Preempt,
    /// The request cannot be satisfied on this flavor.
    NoFit,
}

/// Flavor chosen for one resource of one pod-set, with the mode of the
/// decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlavorAssignment {
    /// Chosen flavor name.
    pub name: FlavorName,
    /// Mode of the decision.
    pub mode: AssignmentMode,
}

impl FlavorAssignment {
    /// Creates a new flavor assignment.
    #[must_use]
    pub fn new(name: impl Into<FlavorName>, mode: AssignmentMode) -> Self {
        Self {
            name: name.into(),
            mode,
        }
    }
}

/// Flavor assignments for a single pod-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetAssignment {
    /// Pod-set name, matching the workload's pod-set.
    pub name: String,
    /// Per-resource flavor decisions.
    pub flavors: HashMap<ResourceName, FlavorAssignment>,
}

impl PodSetAssignment {
    /// Creates an empty assignment for the named pod-set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flavors: HashMap::new(),
        }
    }

    /// Adds a per-resource flavor decision.
    #[must_use]
    pub fn with_flavor(
        mut self,
        resource: impl Into<ResourceName>,
        assignment: FlavorAssignment,
    ) -> Self {
        self.flavors.insert(resource.into(), assignment);
        self
    }
}

/// The upstream planner's output for an incoming workload: one entry per
/// pod-set, parallel to the workload's pod-sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Assignment {
    /// Per-pod-set flavor decisions.
    pub pod_sets: Vec<PodSetAssignment>,
}

impl Assignment {
    /// Creates an empty assignment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pod-set assignment.
    #[must_use]
    pub fn with_pod_set(mut self, pod_set: PodSetAssignment) -> Self {
        self.pod_sets.push(pod_set);
        self
    }
}

/// Policy for preempting workloads admitted in the preemptor's own pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WithinPoolPolicy {
    /// Never evict workloads from the own pool.
    #[default]
    Never,
    /// Evict own-pool workloads of strictly lower priority.
    LowerPriority,
}

/// Policy for reclaiming quota from other pools in the cohort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ReclaimPolicy {
    /// Never reclaim from other pools.
    #[default]
    Never,
    /// Reclaim from borrowers, evicting only lower-priority workloads.
    LowerPriority,
    /// Reclaim from borrowers regardless of priority.
    Any,
}

/// The two preemption axes configured per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PreemptionPolicies {
    /// Policy towards workloads admitted in the same pool.
    pub within_pool: WithinPoolPolicy,
    /// Policy towards workloads admitted elsewhere in the cohort.
    pub reclaim_within_cohort: ReclaimPolicy,
}

/// Requests and, once admitted, assigned flavors of one pod-set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSetResources {
    /// Pod-set name.
    pub name: String,
    /// Aggregated per-resource requests of the pod-set.
    pub requests: HashMap<ResourceName, i64>,
    /// Flavor each resource was admitted under. Empty while the workload
    /// is pending.
    pub flavors: HashMap<ResourceName, FlavorName>,
}

impl PodSetResources {
    /// Creates an empty pod-set.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            requests: HashMap::new(),
            flavors: HashMap::new(),
        }
    }

    /// Sets the request for a resource.
    #[must_use]
    pub fn with_request(mut self, resource: impl Into<ResourceName>, quantity: i64) -> Self {
        self.requests.insert(resource.into(), quantity);
        self
    }

    /// Sets the admitted flavor for a resource.
    #[must_use]
    pub fn with_flavor(
        mut self,
        resource: impl Into<ResourceName>,
        flavor: impl Into<FlavorName>,
    ) -> Self {
        self.flavors.insert(resource.into(), flavor.into());
        self
    }
}

/// A batch unit awaiting or holding admission into a quota pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Stable identity.
    pub key: WorkloadKey,
    /// Priority; higher wins.
    pub priority: i32,
    /// Name of the pool the workload is, or would be, admitted into.
    pub pool: String,
    /// Ordered pod-sets.
    pub pod_sets: Vec<PodSetResources>,
    /// When the workload transitioned to admitted. Absent for workloads
    /// that were never admitted yet.
    pub admitted_at: Option<DateTime<Utc>>,
}

impl Workload {
    /// Creates a pending workload with no requests.
    #[must_use]
    pub fn new(key: impl Into<String>, pool: impl Into<String>) -> Self {
        Self {
            key: WorkloadKey::new(key),
            priority: 0,
            pool: pool.into(),
            pod_sets: Vec::new(),
            admitted_at: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the admission timestamp.
    #[must_use]
    pub fn with_admitted_at(mut self, admitted_at: DateTime<Utc>) -> Self {
        self.admitted_at = Some(admitted_at);
        self
    }

    /// Appends a pod-set.
    #[must_use]
    pub fn with_pod_set(mut self, pod_set: PodSetResources) -> Self {
        self.pod_sets.push(pod_set);
        self
    }

    /// Sets a request on the main pod-set, creating it if needed.
    #[must_use]
    pub fn with_request(mut self, resource: impl Into<ResourceName>, quantity: i64) -> Self {
        self.main_pod_set()
            .requests
            .insert(resource.into(), quantity);
        self
    }

    /// Sets an admitted flavor on the main pod-set, creating it if needed.
    #[must_use]
    pub fn with_flavor(
        mut self,
        resource: impl Into<ResourceName>,
        flavor: impl Into<FlavorName>,
    ) -> Self {
        self.main_pod_set()
            .flavors
            .insert(resource.into(), flavor.into());
        self
    }

    fn main_pod_set(&mut self) -> &mut PodSetResources {
        if self.pod_sets.is_empty() {
            self.pod_sets.push(PodSetResources::new(MAIN_POD_SET));
        }
        &mut self.pod_sets[0]
    }

    /// Effective per-(resource, flavor) consumption of the workload.
    ///
    /// Sums each pod-set's requests under the flavor it was admitted to.
    /// Requests without a flavor assignment contribute nothing.
    #[must_use]
    pub fn usage(&self) -> ResourceQuantities {
        let mut usage = ResourceQuantities::new();
        for pod_set in &self.pod_sets {
            for (resource, quantity) in &pod_set.requests {
                let Some(flavor) = pod_set.flavors.get(resource) else {
                    continue;
                };
                *usage
                    .entry(resource.clone())
                    .or_default()
                    .entry(flavor.clone())
                    .or_insert(0) += quantity;
            }
        }
        usage
    }

    /// Derives the mutation payload that returns this workload to the
    /// unadmitted state.
    #[must_use]
    pub fn clear_admission(&self) -> AdmissionPatch {
        AdmissionPatch {
            workload: self.key.clone(),
            field_owner: FIELD_OWNER.to_string(),
        }
    }
}

/// Mutation payload that clears an admitted workload's admission.
///
/// The store applies it idempotently under the carried field-owner
/// identity, so a retry by an outer scheduling loop is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPatch {
    /// Workload whose admission is cleared.
    pub workload: WorkloadKey,
    /// Owner identity for server-side conflict resolution.
    pub field_owner: String,
}

/// Severity of a workload event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSeverity {
    /// Routine operational event.
    Normal,
}

impl EventSeverity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
        }
    }
}

impl fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a preemption originated relative to the evicted workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptionOrigin {
    /// The preemptor was admitted into the same pool as the target.
    ClusterQueue,
    /// The preemptor reclaimed quota from another pool of the cohort.
    Cohort,
}

impl PreemptionOrigin {
    /// Returns the origin name used in event messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterQueue => "ClusterQueue",
            Self::Cohort => "cohort",
        }
    }
}

impl fmt::Display for PreemptionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observability event attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadEvent {
    /// Workload the event is about.
    pub workload: WorkloadKey,
    /// Event severity.
    pub severity: EventSeverity,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    pub message: String,
}

impl WorkloadEvent {
    /// Creates the event recorded on a successfully preempted workload.
    #[must_use]
    pub fn preempted(workload: WorkloadKey, origin: PreemptionOrigin) -> Self {
        Self {
            workload,
            severity: EventSeverity::Normal,
            reason: "Preempted".to_string(),
            message: format!("Preempted by another workload in the {origin}"),
        }
    }
}
