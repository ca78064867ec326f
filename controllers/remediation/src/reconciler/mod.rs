//! Reconciliation logic for the remediation protocol.
//!
//! - `configuration`: applies a Configuration to every pending, healthy Deployment
//! - `aging`: re-arms remediated Deployments once the cooldown has elapsed

pub mod aging;
pub mod configuration;

#[cfg(test)]
mod configuration_test;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use chrono::{DateTime, Utc};
use cluster_client::{ClusterClientTrait, ClusterError};
use kube_runtime::controller::Action;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

pub use aging::AgingOutcome;
pub use configuration::PassReport;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min, max),
            error_count: 0,
        }
    }
}

/// When the next pass for a key should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Zero-delay retry
    Now,
    /// Next pass after the given delay
    After(Duration),
    /// Only a watch event triggers the next pass
    AwaitChange,
}

impl Requeue {
    pub fn into_action(self) -> Action {
        match self {
            Self::Now => Action::requeue(Duration::ZERO),
            Self::After(delay) => Action::requeue(delay),
            Self::AwaitChange => Action::await_change(),
        }
    }
}

/// Clock reading and deadline shared by every step of one pass.
#[derive(Debug, Clone, Copy)]
pub struct Pass {
    pub now: DateTime<Utc>,
    pub deadline: Instant,
}

impl Pass {
    pub fn new(now: DateTime<Utc>, deadline: Instant) -> Self {
        Self { now, deadline }
    }

    /// Starts a pass at the current wall-clock time.
    pub fn start(timeout: Duration) -> Self {
        Self::new(Utc::now(), Instant::now() + timeout)
    }

    /// Fails once the deadline has passed. Checked before every mutation.
    pub fn ensure_time_left(&self, step: &str) -> Result<(), ControllerError> {
        if Instant::now() >= self.deadline {
            return Err(ControllerError::DeadlineExceeded(format!("before {}", step)));
        }
        Ok(())
    }

    /// Runs a store call bounded by the deadline.
    pub async fn bounded<T>(
        &self,
        step: &str,
        call: impl Future<Output = Result<T, ClusterError>>,
    ) -> Result<Result<T, ClusterError>, ControllerError> {
        tokio::time::timeout_at(self.deadline, call)
            .await
            .map_err(|_| ControllerError::DeadlineExceeded(format!("during {}", step)))
    }
}

/// Reconciles Configurations and Deployments.
pub struct Reconciler {
    pub(crate) client: Box<dyn ClusterClientTrait>,
    pub(crate) config: ControllerConfig,
    /// Error count tracking per resource (kind/namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler.
    pub fn new(client: impl ClusterClientTrait + 'static, config: ControllerConfig) -> Self {
        Self {
            client: Box::new(client),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Records a failed pass for `key` and returns the delay before the next attempt
    /// together with the number of consecutive failures.
    pub fn next_error_backoff(&self, key: &str) -> (Duration, u32) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(key.to_string())
            .or_insert_with(|| BackoffState::new(self.config.error_backoff_min, self.config.error_backoff_max));
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Clears the failure streak for `key` after a successful pass.
    pub fn reset_error(&self, key: &str) {
        let mut states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        states.remove(key);
    }

    /// Consecutive failures currently recorded for `key`
    #[cfg(test)]
    pub fn error_count(&self, key: &str) -> u32 {
        let states = self.backoff_states.lock().unwrap_or_else(PoisonError::into_inner);
        states.get(key).map_or(0, |s| s.error_count)
    }
}
