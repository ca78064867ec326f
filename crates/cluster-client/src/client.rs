//! kube-backed implementation of [`ClusterClientTrait`].

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::Configuration;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client};
use tracing::debug;

const LIST_PAGE_SIZE: u32 = 500;

/// Cluster client backed by the Kubernetes API server.
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient").finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Wraps an existing kube client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: Option<&str>) -> Api<Deployment> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for ClusterClient {
    async fn get_configuration(&self, namespace: &str, name: &str) -> Result<Configuration, ClusterError> {
        let api: Api<Configuration> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("Configuration {}/{}", namespace, name)))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        self.deployments(Some(namespace))
            .get(name)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("Deployment {}/{}", namespace, name)))
    }

    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>, ClusterError> {
        let api = self.deployments(namespace);
        let scope = namespace.unwrap_or("<all namespaces>");
        let mut items = Vec::new();
        let mut params = ListParams::default().limit(LIST_PAGE_SIZE);

        loop {
            let page = api
                .list(&params)
                .await
                .map_err(|e| ClusterError::from_kube(e, &format!("Deployments in {}", scope)))?;
            items.extend(page.items);

            match page.metadata.continue_.filter(|token| !token.is_empty()) {
                Some(token) => {
                    debug!("Fetching next page of Deployments in {}", scope);
                    params = params.continue_token(&token);
                }
                None => break,
            }
        }

        Ok(items)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = deployment.metadata.name.as_deref()
            .ok_or_else(|| ClusterError::InvalidRequest("Deployment missing name".to_string()))?;
        let namespace = deployment.metadata.namespace.as_deref()
            .ok_or_else(|| ClusterError::InvalidRequest(format!("Deployment {} missing namespace", name)))?;

        self.deployments(Some(namespace))
            .replace(name, &PostParams::default(), deployment)
            .await
            .map_err(|e| ClusterError::from_kube(e, &format!("Deployment {}/{}", namespace, name)))
    }
}
