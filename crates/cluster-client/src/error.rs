//! Cluster client errors

use thiserror::Error;

/// Errors that can occur when talking to the Kubernetes API
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Object does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write lost an optimistic-concurrency race (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// API server temporarily unable to serve the request (HTTP 429/5xx)
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Any other API or transport failure
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Request could not be built (e.g. object without name or namespace)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClusterError {
    /// Classifies a kube error by HTTP status, naming the object for context.
    pub fn from_kube(error: kube::Error, object: &str) -> Self {
        match &error {
            kube::Error::Api(response) if response.code == 404 => Self::NotFound(object.to_string()),
            kube::Error::Api(response) if response.code == 409 => {
                Self::Conflict(format!("{}: {}", object, response.message))
            }
            kube::Error::Api(response) if response.code == 429 || response.code >= 500 => {
                Self::Unavailable(format!("{}: {}", object, response.message))
            }
            _ => Self::Kube(error),
        }
    }

    /// Whether the error is a lost optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the target object is gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the API server or the connection to it failed, rather than the
    /// request itself being rejected
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            // 404/409/429/5xx are classified above; what is left is a 4xx rejection
            Self::Kube(kube::Error::Api(_)) => false,
            Self::Kube(_) => true,
            Self::NotFound(_) | Self::Conflict(_) | Self::InvalidRequest(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClusterError::Unavailable("Deployments".to_string()).is_transient());
        assert!(!ClusterError::NotFound("Deployment default/web".to_string()).is_transient());
        assert!(!ClusterError::Conflict("Deployment default/web".to_string()).is_transient());
        assert!(!ClusterError::InvalidRequest("Deployment missing name".to_string()).is_transient());
    }
}
