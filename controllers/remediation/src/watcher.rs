//! Kubernetes resource watchers.
//!
//! Both reconcilers run on `kube_runtime::Controller` through the generic
//! `run_controller()` helper, which wires reconciliation, per-object
//! Fibonacci backoff on errors and graceful shutdown.

use crate::error::ControllerError;
use crate::marker::RemediationState;
use crate::reconciler::{Pass, Reconciler};
use crds::Configuration;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as RuntimeConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

fn object_key<K: Resource>(resource_name: &str, obj: &K) -> String {
    format!(
        "{}/{}/{}",
        resource_name,
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Drives a configured `Controller` until shutdown.
///
/// Successful passes reset the object's error streak. Failed passes requeue
/// with the object's next backoff delay, except conflicts which retry at once.
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(resource_name, obj.as_ref());
        if let ControllerError::Conflict(_) = error {
            warn!("Update conflict for {}, retrying now: {}", key, error);
            return Action::requeue(Duration::ZERO);
        }
        let (delay, attempts) = ctx.next_error_backoff(&key);
        error!(
            "Reconciliation error for {} (attempt {}), retrying in {}s: {}",
            key,
            attempts,
            delay.as_secs(),
            error
        );
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let key = object_key(resource_name, obj.as_ref());
            debug!("Reconciling {}", key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_error(&key);
            Ok(action)
        }
    };

    let runtime_config = RuntimeConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(3);

    controller
        .with_config(runtime_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                debug!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    info!("{} watcher stopped", resource_name);
    Ok(())
}

/// Configurations to re-run when a Deployment changes: every known
/// Configuration, but only while the Deployment is pending remediation.
fn configurations_for(store: &Store<Configuration>, deployment: &Deployment) -> Vec<ObjectRef<Configuration>> {
    let pending = matches!(
        RemediationState::read(deployment.metadata.annotations.as_ref()),
        Ok(RemediationState::Pending)
    );
    if !pending {
        return Vec::new();
    }

    store
        .state()
        .iter()
        .map(|configuration| ObjectRef::from_obj(configuration.as_ref()))
        .collect()
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    configuration_api: Api<Configuration>,
    deployment_api: Api<Deployment>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        configuration_api: Api<Configuration>,
        deployment_api: Api<Deployment>,
    ) -> Self {
        Self {
            reconciler,
            configuration_api,
            deployment_api,
        }
    }

    /// Runs Configuration passes on Configuration changes and on pending Deployments.
    pub async fn watch_configurations(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.configuration_api.clone(), watcher::Config::default());
        let store = controller.store();
        let controller = controller.watches(
            self.deployment_api.clone(),
            watcher::Config::default(),
            move |deployment: Deployment| configurations_for(&store, &deployment),
        );

        run_controller(
            controller,
            self.reconciler.clone(),
            |reconciler, configuration: Arc<Configuration>| {
                Box::pin(async move {
                    let namespace = configuration.namespace().unwrap_or_default();
                    let name = configuration.name_any();
                    let pass = Pass::start(reconciler.config.pass_timeout);
                    let (requeue, _) = reconciler.reconcile_configuration(&namespace, &name, &pass).await?;
                    Ok(requeue.into_action())
                })
            },
            "Configuration",
        )
        .await
    }

    /// Runs aging passes on Deployment changes.
    pub async fn watch_deployments(&self) -> Result<(), ControllerError> {
        run_controller(
            Controller::new(self.deployment_api.clone(), watcher::Config::default()),
            self.reconciler.clone(),
            |reconciler, deployment: Arc<Deployment>| {
                Box::pin(async move {
                    let namespace = deployment.namespace().unwrap_or_default();
                    let name = deployment.name_any();
                    let pass = Pass::start(reconciler.config.pass_timeout);
                    let (requeue, _) = reconciler.reconcile_aging(&namespace, &name, &pass).await?;
                    Ok(requeue.into_action())
                })
            },
            "Deployment",
        )
        .await
    }
}
