//! Controller-specific error types.
//!
//! Every variant is retryable: remediation is a background process and the
//! error policy turns any failed pass into a requeue.

use cluster_client::ClusterError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Remediation Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client setup error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Get/list/replace failure for the record that triggered the pass
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Pass ran out of time before finishing
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Update lost an optimistic-concurrency race
    #[error("Update conflict: {0}")]
    Conflict(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
