//! Main controller implementation.
//!
//! The `Controller` struct builds the reconciler on a kube client and runs the
//! Configuration and Deployment watchers side by side.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use cluster_client::ClusterClient;
use crds::Configuration;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for workload remediation.
pub struct Controller {
    configuration_watcher: JoinHandle<Result<(), ControllerError>>,
    deployment_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Remediation Controller");

        let kube_client = Client::try_default().await?;

        let (configuration_api, deployment_api): (Api<Configuration>, Api<Deployment>) =
            match config.namespace.as_deref() {
                Some(ns) => (
                    Api::namespaced(kube_client.clone(), ns),
                    Api::namespaced(kube_client.clone(), ns),
                ),
                None => (Api::all(kube_client.clone()), Api::all(kube_client.clone())),
            };

        let reconciler = Arc::new(Reconciler::new(ClusterClient::new(kube_client), config));
        let watcher_instance = Arc::new(Watcher::new(reconciler, configuration_api, deployment_api));

        let configuration_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_configurations().await })
        };

        let deployment_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_deployments().await })
        };

        Ok(Self {
            configuration_watcher,
            deployment_watcher,
        })
    }

    /// Runs until either watcher stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Remediation Controller running");

        tokio::select! {
            result = &mut self.configuration_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Configuration watcher panicked: {}", e)))??;
            }
            result = &mut self.deployment_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Deployment watcher panicked: {}", e)))??;
            }
        }

        // Both watchers listen for the same shutdown signal
        self.configuration_watcher.abort();
        self.deployment_watcher.abort();

        info!("Remediation Controller stopped");
        Ok(())
    }
}
