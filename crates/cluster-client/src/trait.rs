//! ClusterClient trait for mocking
//!
//! This trait abstracts the Kubernetes API access so reconcilers can be unit
//! tested against an in-memory store.

use crate::error::ClusterError;
use crds::Configuration;
use k8s_openapi::api::apps::v1::Deployment;

/// Trait for the Kubernetes operations the reconcilers perform
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterClientTrait: Send + Sync {
    /// Fetch a Configuration by key
    async fn get_configuration(&self, namespace: &str, name: &str) -> Result<Configuration, ClusterError>;

    /// Fetch a Deployment by key
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    /// List Deployments in one namespace, or in all namespaces when `None`
    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>, ClusterError>;

    /// Replace a Deployment, rejected with `Conflict` if its resourceVersion is stale
    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError>;
}
