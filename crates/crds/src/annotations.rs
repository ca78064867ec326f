//! Annotation contract between the reconcilers.
//!
//! These keys are the only channel the Configuration and Aging reconcilers
//! share. Anything outside the controller may request remediation by setting
//! [`MISCONFIGURATION_ANNOTATION`] to [`MARKER_PENDING`] on a Deployment.

/// Marker annotation: `"true"` needs remediation, `"false"` remediation applied.
pub const MISCONFIGURATION_ANNOTATION: &str = "anaisurl.com/misconfiguration";

/// RFC 3339 timestamp of the most recent marker transition.
pub const LAST_UPDATED_ANNOTATION: &str = "anaisurl.com/last-updated";

/// Marker value for a workload waiting to be remediated.
pub const MARKER_PENDING: &str = "true";

/// Marker value for a workload that has been remediated and is aging.
pub const MARKER_APPLIED: &str = "false";
