//! Mock ClusterClient for unit testing
//!
//! Keeps Deployments and Configurations in memory and enforces
//! resourceVersion checks on replace the way the API server does, so
//! reconcilers can be exercised against lost races without a cluster.

use crate::cluster_trait::ClusterClientTrait;
use crate::error::ClusterError;
use crds::Configuration;
use k8s_openapi::api::apps::v1::Deployment;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Key = (String, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Failure returned by every replace of a Deployment
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplaceFault {
    /// Request rejected by the API server (admission, validation), as `InvalidRequest`
    Rejected(String),
    /// API server unavailable, as `Unavailable`
    Unavailable,
}

/// Mock ClusterClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockClusterClient {
    pub(crate) deployments: Arc<Mutex<BTreeMap<Key, Deployment>>>,
    pub(crate) configurations: Arc<Mutex<BTreeMap<Key, Configuration>>>,
    // Counter for resourceVersions
    pub(crate) version: Arc<Mutex<u64>>,
    // Keys whose next get is followed by a write from "someone else"
    pub(crate) concurrent_writes: Arc<Mutex<HashSet<Key>>>,
    // Keys deleted right after the next list returns
    pub(crate) vanish_after_list: Arc<Mutex<HashSet<Key>>>,
    pub(crate) fail_next_list: Arc<Mutex<bool>>,
    // Keys whose every replace fails with the given fault
    pub(crate) replace_faults: Arc<Mutex<HashMap<Key, ReplaceFault>>>,
    pub(crate) replaced: Arc<Mutex<Vec<Deployment>>>,
}

impl MockClusterClient {
    /// Create an empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        let mut version = lock(&self.version);
        *version += 1;
        version.to_string()
    }

    /// Add a Deployment to the mock store, assigning a resourceVersion (for test setup)
    pub fn add_deployment(&self, mut deployment: Deployment) {
        let namespace = deployment.metadata.namespace.clone().unwrap_or_default();
        let name = deployment.metadata.name.clone().unwrap_or_default();
        deployment.metadata.resource_version = Some(self.next_version());
        lock(&self.deployments).insert(key(&namespace, &name), deployment);
    }

    /// Add a Configuration to the mock store (for test setup)
    pub fn add_configuration(&self, configuration: Configuration) {
        let namespace = configuration.metadata.namespace.clone().unwrap_or_default();
        let name = configuration.metadata.name.clone().unwrap_or_default();
        lock(&self.configurations).insert(key(&namespace, &name), configuration);
    }

    /// Remove a Configuration from the mock store
    pub fn remove_configuration(&self, namespace: &str, name: &str) {
        lock(&self.configurations).remove(&key(namespace, name));
    }

    /// Modify a stored Deployment as an external writer would, bumping its resourceVersion
    pub fn update_deployment(&self, namespace: &str, name: &str, mutate: impl FnOnce(&mut Deployment)) {
        let version = self.next_version();
        if let Some(deployment) = lock(&self.deployments).get_mut(&key(namespace, name)) {
            mutate(deployment);
            deployment.metadata.resource_version = Some(version);
        }
    }

    /// After the next get of this Deployment, simulate another writer updating it
    pub fn inject_concurrent_write(&self, namespace: &str, name: &str) {
        lock(&self.concurrent_writes).insert(key(namespace, name));
    }

    /// Delete this Deployment immediately after the next list returns it
    pub fn vanish_after_list(&self, namespace: &str, name: &str) {
        lock(&self.vanish_after_list).insert(key(namespace, name));
    }

    /// Make the next list call fail with `Unavailable`
    pub fn fail_next_list(&self) {
        *lock(&self.fail_next_list) = true;
    }

    /// Make every replace of this Deployment fail with `fault`
    pub fn fail_replaces(&self, namespace: &str, name: &str, fault: ReplaceFault) {
        lock(&self.replace_faults).insert(key(namespace, name), fault);
    }

    /// Current stored copy of a Deployment
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        lock(&self.deployments).get(&key(namespace, name)).cloned()
    }

    /// Every Deployment accepted by `replace_deployment`, in order
    pub fn replaced(&self) -> Vec<Deployment> {
        lock(&self.replaced).clone()
    }

    /// Number of successful replaces
    pub fn replace_count(&self) -> usize {
        lock(&self.replaced).len()
    }
}

#[async_trait::async_trait]
impl ClusterClientTrait for MockClusterClient {
    async fn get_configuration(&self, namespace: &str, name: &str) -> Result<Configuration, ClusterError> {
        lock(&self.configurations)
            .get(&key(namespace, name))
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Configuration {}/{}", namespace, name)))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let k = key(namespace, name);
        let found = lock(&self.deployments)
            .get(&k)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(format!("Deployment {}/{}", namespace, name)))?;

        if lock(&self.concurrent_writes).remove(&k) {
            self.update_deployment(namespace, name, |_| {});
        }
        Ok(found)
    }

    async fn list_deployments(&self, namespace: Option<&str>) -> Result<Vec<Deployment>, ClusterError> {
        if std::mem::take(&mut *lock(&self.fail_next_list)) {
            return Err(ClusterError::Unavailable("Deployments: injected failure".to_string()));
        }

        let items: Vec<Deployment> = lock(&self.deployments)
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| ns.as_str() == wanted))
            .map(|(_, d)| d.clone())
            .collect();

        let vanished: Vec<Key> = lock(&self.vanish_after_list).drain().collect();
        let mut deployments = lock(&self.deployments);
        for k in vanished {
            deployments.remove(&k);
        }
        Ok(items)
    }

    async fn replace_deployment(&self, deployment: &Deployment) -> Result<Deployment, ClusterError> {
        let name = deployment.metadata.name.clone()
            .ok_or_else(|| ClusterError::InvalidRequest("Deployment missing name".to_string()))?;
        let namespace = deployment.metadata.namespace.clone()
            .ok_or_else(|| ClusterError::InvalidRequest(format!("Deployment {} missing namespace", name)))?;
        let k = key(&namespace, &name);

        match lock(&self.replace_faults).get(&k) {
            Some(ReplaceFault::Rejected(message)) => {
                return Err(ClusterError::InvalidRequest(format!(
                    "Deployment {}/{}: {}",
                    namespace, name, message
                )));
            }
            Some(ReplaceFault::Unavailable) => {
                return Err(ClusterError::Unavailable(format!(
                    "Deployment {}/{}: injected failure",
                    namespace, name
                )));
            }
            None => {}
        }

        let version = self.next_version();

        let mut deployments = lock(&self.deployments);
        let stored = deployments
            .get_mut(&k)
            .ok_or_else(|| ClusterError::NotFound(format!("Deployment {}/{}", namespace, name)))?;

        if stored.metadata.resource_version != deployment.metadata.resource_version {
            return Err(ClusterError::Conflict(format!(
                "Deployment {}/{}: resourceVersion {:?} is stale (current {:?})",
                namespace, name, deployment.metadata.resource_version, stored.metadata.resource_version
            )));
        }

        let mut accepted = deployment.clone();
        accepted.metadata.resource_version = Some(version);
        *stored = accepted.clone();
        drop(deployments);

        lock(&self.replaced).push(accepted.clone());
        Ok(accepted)
    }
}
