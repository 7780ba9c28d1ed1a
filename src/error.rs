//! Error types for the preemption core.

use thiserror::Error;

/// Result type for preemption operations.
pub type Result<T> = std::result::Result<T, PreemptionError>;

/// Errors that can occur while preempting workloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreemptionError {
    /// The incoming workload names a pool the snapshot does not contain.
    #[error("pool {name} is not present in the snapshot")]
    PoolNotFound {
        /// Name of the missing pool.
        name: String,
    },

    /// The store rejected or failed an admission-clearing patch.
    #[error("failed to clear admission of {workload}: {reason}")]
    ClearAdmission {
        /// Key of the workload whose patch failed.
        workload: String,
        /// Description of the failure as reported by the store.
        reason: String,
    },
}
