//! Configuration pass: apply a Configuration to pending, healthy Deployments.

use super::{Pass, Reconciler, Requeue};
use crate::error::ControllerError;
use crate::marker::RemediationState;
use crate::workload::{Health, apply_configuration, workload_health};
use cluster_client::ClusterError;
use crds::ConfigurationSpec;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What happened to each Deployment considered by one pass, as `namespace/name`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassReport {
    /// Remediated and marked applied
    pub applied: Vec<String>,
    /// Pending but unhealthy, or no longer pending on refetch
    pub skipped: Vec<String>,
    /// Cannot be remediated until corrected externally, including updates
    /// the API server rejects
    pub malformed: Vec<String>,
    /// Vanished or lost a race; retried on the next pass
    pub retry: Vec<String>,
}

impl PassReport {
    fn requeue(&self, success_interval: std::time::Duration) -> Requeue {
        if self.retry.is_empty() {
            Requeue::After(success_interval)
        } else {
            Requeue::Now
        }
    }
}

enum ItemOutcome {
    Applied(Vec<&'static str>),
    Skipped(String),
    Malformed(String),
    Retry(String),
}

impl ItemOutcome {
    /// Classifies a failed refetch or replace of one Deployment.
    ///
    /// A vanished object or a lost race is retried at once. A rejected request
    /// would fail again, so it is held back like malformed state. Transient
    /// server failures fail the whole pass and go through error backoff.
    fn from_cluster_error(error: ClusterError) -> Result<Self, ControllerError> {
        match error {
            ClusterError::NotFound(_) | ClusterError::Conflict(_) => Ok(Self::Retry(error.to_string())),
            e if e.is_transient() => Err(e.into()),
            e => Ok(Self::Malformed(e.to_string())),
        }
    }
}

impl Reconciler {
    /// Runs one Configuration pass for `namespace/name`.
    ///
    /// Every pending Deployment in the controller's watch scope is considered,
    /// whatever its namespace. Failing to read the Configuration, to list
    /// Deployments, or a transient server failure on any Deployment fails the
    /// pass as a whole. Other per-Deployment problems are collected in the report.
    pub async fn reconcile_configuration(
        &self,
        namespace: &str,
        name: &str,
        pass: &Pass,
    ) -> Result<(Requeue, PassReport), ControllerError> {
        let mut report = PassReport::default();

        let configuration = match pass
            .bounded("get configuration", self.client.get_configuration(namespace, name))
            .await?
        {
            Ok(configuration) => configuration,
            Err(ClusterError::NotFound(_)) => {
                debug!("Configuration {}/{} not found, nothing to apply", namespace, name);
                return Ok((Requeue::AwaitChange, report));
            }
            Err(e) => return Err(e.into()),
        };

        if configuration.metadata.deletion_timestamp.is_some() {
            debug!("Configuration {}/{} is being deleted, skipping", namespace, name);
            return Ok((Requeue::AwaitChange, report));
        }

        if let Err(errors) = configuration.spec.validate() {
            for error in &errors {
                warn!("Configuration {}/{} is invalid: {}", namespace, name, error);
            }
            return Ok((Requeue::After(self.config.success_interval), report));
        }
        if configuration.spec.is_empty() {
            debug!(
                "Configuration {}/{} sets no fields, pending deployments are only marked applied",
                namespace, name
            );
        }

        let deployments = pass
            .bounded("list deployments", self.client.list_deployments(self.config.namespace.as_deref()))
            .await??;

        let pending: Vec<(String, String)> = deployments
            .iter()
            .filter(|d| {
                matches!(
                    RemediationState::read(d.metadata.annotations.as_ref()),
                    Ok(RemediationState::Pending)
                )
            })
            .filter_map(|d| Some((d.metadata.namespace.clone()?, d.metadata.name.clone()?)))
            .collect();

        debug!(
            "Configuration {}/{}: {} of {} deployments pending remediation",
            namespace,
            name,
            pending.len(),
            deployments.len()
        );

        for (deployment_namespace, deployment_name) in pending {
            let deployment_key = format!("{}/{}", deployment_namespace, deployment_name);
            match self
                .remediate(&configuration.spec, &deployment_namespace, &deployment_name, pass)
                .await?
            {
                ItemOutcome::Applied(changed) => {
                    info!(
                        "Applied Configuration {}/{} to deployment {} (changed: {:?})",
                        namespace, name, deployment_key, changed
                    );
                    report.applied.push(deployment_key);
                }
                ItemOutcome::Skipped(reason) => {
                    debug!("Skipping deployment {}: {}", deployment_key, reason);
                    report.skipped.push(deployment_key);
                }
                ItemOutcome::Malformed(reason) => {
                    warn!("Cannot remediate deployment {}: {}", deployment_key, reason);
                    report.malformed.push(deployment_key);
                }
                ItemOutcome::Retry(reason) => {
                    warn!("Will retry deployment {}: {}", deployment_key, reason);
                    report.retry.push(deployment_key);
                }
            }
        }

        if !report.applied.is_empty() || !report.retry.is_empty() {
            info!(
                "Configuration {}/{} pass done: {} applied, {} skipped, {} malformed, {} to retry",
                namespace,
                name,
                report.applied.len(),
                report.skipped.len(),
                report.malformed.len(),
                report.retry.len()
            );
        }

        Ok((report.requeue(self.config.success_interval), report))
    }

    /// Refetches one Deployment, applies `spec` and submits it as a single update.
    ///
    /// Returns `Err` when the pass deadline has passed or the API server is
    /// unavailable.
    async fn remediate(
        &self,
        spec: &ConfigurationSpec,
        namespace: &str,
        name: &str,
        pass: &Pass,
    ) -> Result<ItemOutcome, ControllerError> {
        pass.ensure_time_left("refetch deployment")?;
        let mut deployment = match pass
            .bounded("get deployment", self.client.get_deployment(namespace, name))
            .await?
        {
            Ok(deployment) => deployment,
            Err(e) => return ItemOutcome::from_cluster_error(e),
        };

        // The list snapshot may be stale; another pass could have applied it already.
        match RemediationState::read(deployment.metadata.annotations.as_ref()) {
            Ok(RemediationState::Pending) => {}
            Ok(state) => return Ok(ItemOutcome::Skipped(format!("no longer pending ({:?})", state))),
            Err(e) => return Ok(ItemOutcome::Malformed(e.to_string())),
        }

        match workload_health(&deployment, &self.config.healthy_condition) {
            Health::Healthy => {}
            Health::Unhealthy { status } => {
                return Ok(ItemOutcome::Skipped(format!(
                    "{} is {}",
                    self.config.healthy_condition, status
                )));
            }
            Health::Unknown => {
                return Ok(ItemOutcome::Skipped(format!(
                    "{} condition unknown",
                    self.config.healthy_condition
                )));
            }
        }

        let changed = match apply_configuration(&mut deployment, spec) {
            Ok(changed) => changed,
            Err(e) => return Ok(ItemOutcome::Malformed(e.to_string())),
        };

        RemediationState::Applied { last_updated: pass.now }.write(
            deployment.metadata.annotations.get_or_insert_with(BTreeMap::new),
            pass.now,
        );

        pass.ensure_time_left("replace deployment")?;
        match pass
            .bounded("replace deployment", self.client.replace_deployment(&deployment))
            .await?
        {
            Ok(_) => Ok(ItemOutcome::Applied(changed)),
            Err(e) => ItemOutcome::from_cluster_error(e),
        }
    }
}
