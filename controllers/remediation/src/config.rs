//! Controller configuration loaded from environment variables.

use crate::error::ControllerError;
use std::env;
use std::time::Duration;

/// Default dwell time before a remediated workload is re-armed
pub const DEFAULT_AGING_THRESHOLD: Duration = Duration::from_secs(5 * 60);
/// Default delay between Configuration passes that finished cleanly
pub const DEFAULT_SUCCESS_INTERVAL: Duration = Duration::from_secs(120);
/// Default deadline for a single reconciliation pass
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(30);
/// Default Deployment condition that gates remediation
pub const DEFAULT_HEALTHY_CONDITION: &str = "Available";

/// Runtime settings for both reconcilers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Minimum age of a remediation before the workload is re-armed
    pub aging_threshold: Duration,
    /// Requeue delay after a Configuration pass with no retryable items
    pub success_interval: Duration,
    /// Deadline for each reconciliation pass
    pub pass_timeout: Duration,
    /// Deployment condition type that must be `"True"` before remediation
    pub healthy_condition: String,
    /// First retry delay after a failed pass
    pub error_backoff_min: Duration,
    /// Largest retry delay after repeated failures
    pub error_backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            aging_threshold: DEFAULT_AGING_THRESHOLD,
            success_interval: DEFAULT_SUCCESS_INTERVAL,
            pass_timeout: DEFAULT_PASS_TIMEOUT,
            healthy_condition: DEFAULT_HEALTHY_CONDITION.to_string(),
            error_backoff_min: Duration::from_secs(10),
            error_backoff_max: Duration::from_secs(300),
        }
    }
}

impl ControllerConfig {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let defaults = Self::default();

        let config = Self {
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty()),
            aging_threshold: seconds(&lookup, "AGING_THRESHOLD_SECS", defaults.aging_threshold)?,
            success_interval: seconds(&lookup, "SUCCESS_REQUEUE_SECS", defaults.success_interval)?,
            pass_timeout: seconds(&lookup, "PASS_TIMEOUT_SECS", defaults.pass_timeout)?,
            healthy_condition: lookup("HEALTHY_CONDITION")
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(defaults.healthy_condition),
            error_backoff_min: seconds(&lookup, "ERROR_BACKOFF_MIN_SECS", defaults.error_backoff_min)?,
            error_backoff_max: seconds(&lookup, "ERROR_BACKOFF_MAX_SECS", defaults.error_backoff_max)?,
        };

        if config.aging_threshold.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "AGING_THRESHOLD_SECS must be greater than zero".to_string(),
            ));
        }
        if config.pass_timeout.is_zero() {
            return Err(ControllerError::InvalidConfig(
                "PASS_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        if config.error_backoff_min > config.error_backoff_max {
            return Err(ControllerError::InvalidConfig(
                "ERROR_BACKOFF_MIN_SECS must not exceed ERROR_BACKOFF_MAX_SECS".to_string(),
            ));
        }

        Ok(config)
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ControllerError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ControllerError::InvalidConfig(format!("{}={:?}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ControllerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.aging_threshold, Duration::from_secs(300));
        assert_eq!(config.success_interval, Duration::from_secs(120));
        assert_eq!(config.healthy_condition, "Available");
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup_from(&[
            ("WATCH_NAMESPACE", "apps"),
            ("AGING_THRESHOLD_SECS", "600"),
            ("SUCCESS_REQUEUE_SECS", " 60 "),
            ("HEALTHY_CONDITION", "Progressing"),
        ]))
        .unwrap();
        assert_eq!(config.namespace.as_deref(), Some("apps"));
        assert_eq!(config.aging_threshold, Duration::from_secs(600));
        assert_eq!(config.success_interval, Duration::from_secs(60));
        assert_eq!(config.healthy_condition, "Progressing");
    }

    #[test]
    fn test_blank_namespace_means_all() {
        let config = ControllerConfig::from_lookup(lookup_from(&[("WATCH_NAMESPACE", "")])).unwrap();
        assert_eq!(config.namespace, None);
    }

    #[test]
    fn test_rejects_bad_numbers() {
        let err = ControllerConfig::from_lookup(lookup_from(&[("PASS_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(msg) if msg.contains("PASS_TIMEOUT_SECS")));
    }

    #[test]
    fn test_rejects_zero_threshold_and_inverted_backoff() {
        assert!(ControllerConfig::from_lookup(lookup_from(&[("AGING_THRESHOLD_SECS", "0")])).is_err());
        assert!(
            ControllerConfig::from_lookup(lookup_from(&[
                ("ERROR_BACKOFF_MIN_SECS", "60"),
                ("ERROR_BACKOFF_MAX_SECS", "30"),
            ]))
            .is_err()
        );
    }
}
