//! Aging pass: re-arm a remediated Deployment once its cooldown has elapsed.

use super::{Pass, Reconciler, Requeue};
use crate::error::ControllerError;
use crate::marker::{MalformedState, Phase, RemediationState};
use cluster_client::ClusterError;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one aging pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgingOutcome {
    /// Deployment no longer exists
    Gone,
    /// No marker, nothing to age
    Untracked,
    /// Already waiting for the Configuration pass
    Pending,
    /// Annotations cannot be interpreted; left untouched
    Malformed(MalformedState),
    /// Applied, not yet due; checked again after `remaining`
    Cooling { remaining: Duration },
    /// Threshold reached, marker set back to pending
    Rearmed,
}

impl Reconciler {
    /// Runs one aging pass for Deployment `namespace/name`.
    ///
    /// Only the annotations are written; the container spec is never touched.
    pub async fn reconcile_aging(
        &self,
        namespace: &str,
        name: &str,
        pass: &Pass,
    ) -> Result<(Requeue, AgingOutcome), ControllerError> {
        let mut deployment = match pass
            .bounded("get deployment", self.client.get_deployment(namespace, name))
            .await?
        {
            Ok(deployment) => deployment,
            Err(ClusterError::NotFound(_)) => return Ok((Requeue::AwaitChange, AgingOutcome::Gone)),
            Err(e) => return Err(e.into()),
        };

        let state = match RemediationState::read(deployment.metadata.annotations.as_ref()) {
            Ok(state) => state,
            Err(e) => {
                warn!("Deployment {}/{} has malformed remediation state: {}", namespace, name, e);
                return Ok((Requeue::AwaitChange, AgingOutcome::Malformed(e)));
            }
        };

        match state.phase(pass.now, self.config.aging_threshold) {
            Phase::Untracked => return Ok((Requeue::AwaitChange, AgingOutcome::Untracked)),
            Phase::Pending => return Ok((Requeue::AwaitChange, AgingOutcome::Pending)),
            Phase::Cooling { remaining } => {
                debug!(
                    "Deployment {}/{} cooling down, re-arm in {}s",
                    namespace,
                    name,
                    remaining.as_secs()
                );
                return Ok((Requeue::After(remaining), AgingOutcome::Cooling { remaining }));
            }
            Phase::Due => {}
        }

        RemediationState::Pending.write(
            deployment.metadata.annotations.get_or_insert_with(BTreeMap::new),
            pass.now,
        );

        pass.ensure_time_left("re-arm deployment")?;
        match pass
            .bounded("replace deployment", self.client.replace_deployment(&deployment))
            .await?
        {
            Ok(_) => {
                info!("Re-armed deployment {}/{} for remediation", namespace, name);
                Ok((Requeue::AwaitChange, AgingOutcome::Rearmed))
            }
            Err(ClusterError::Conflict(message)) => Err(ControllerError::Conflict(message)),
            Err(ClusterError::NotFound(_)) => Ok((Requeue::AwaitChange, AgingOutcome::Gone)),
            Err(e) => Err(e.into()),
        }
    }
}
