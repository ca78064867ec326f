//! Remediation state carried in workload annotations.
//!
//! A workload moves `Untracked -> Pending -> Applied -> Pending -> ...`.
//! The Configuration reconciler performs `Pending -> Applied`, the Aging
//! reconciler performs `Applied -> Pending` once the cooldown has elapsed.
//! Both transitions rewrite the timestamp annotation.

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use crds::{LAST_UPDATED_ANNOTATION, MARKER_APPLIED, MARKER_PENDING, MISCONFIGURATION_ANNOTATION};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Parsed remediation marker of a workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationState {
    /// No marker annotation
    Untracked,
    /// Waiting for the Configuration reconciler
    Pending,
    /// Remediated at `last_updated`
    Applied { last_updated: DateTime<Utc> },
}

/// Annotations that cannot be interpreted as a remediation state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedState {
    /// Misconfiguration annotation is neither "true" nor "false"
    #[error("marker annotation has unknown value {0:?}")]
    UnknownMarker(String),

    /// Applied marker without a last-updated annotation
    #[error("marker is applied but the timestamp annotation is missing")]
    MissingTimestamp,

    /// Last-updated annotation that does not parse
    #[error("timestamp annotation {value:?} is not RFC 3339: {reason}")]
    InvalidTimestamp {
        /// Raw annotation value
        value: String,
        /// Parser error
        reason: String,
    },
}

/// Where a workload stands relative to the aging threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No marker, never enrolled
    Untracked,
    /// Flagged, waiting for a Configuration pass
    Pending,
    /// Applied, re-arm is due after `remaining`
    Cooling { remaining: Duration },
    /// Applied for at least the threshold
    Due,
}

impl RemediationState {
    /// Reads the state from an object's annotations.
    pub fn read(annotations: Option<&BTreeMap<String, String>>) -> Result<Self, MalformedState> {
        let Some(annotations) = annotations else {
            return Ok(Self::Untracked);
        };

        match annotations.get(MISCONFIGURATION_ANNOTATION).map(String::as_str) {
            None => Ok(Self::Untracked),
            Some(MARKER_PENDING) => Ok(Self::Pending),
            Some(MARKER_APPLIED) => {
                let raw = annotations
                    .get(LAST_UPDATED_ANNOTATION)
                    .ok_or(MalformedState::MissingTimestamp)?;
                Ok(Self::Applied {
                    last_updated: parse_timestamp(raw)?,
                })
            }
            Some(other) => Err(MalformedState::UnknownMarker(other.to_string())),
        }
    }

    /// Writes this state into `annotations`, leaving unrelated keys alone.
    ///
    /// `Pending` is stamped with `now`; `Applied` with its own timestamp.
    pub fn write(&self, annotations: &mut BTreeMap<String, String>, now: DateTime<Utc>) {
        match self {
            Self::Untracked => {
                annotations.remove(MISCONFIGURATION_ANNOTATION);
            }
            Self::Pending => {
                annotations.insert(MISCONFIGURATION_ANNOTATION.to_string(), MARKER_PENDING.to_string());
                annotations.insert(LAST_UPDATED_ANNOTATION.to_string(), format_timestamp(now));
            }
            Self::Applied { last_updated } => {
                annotations.insert(MISCONFIGURATION_ANNOTATION.to_string(), MARKER_APPLIED.to_string());
                annotations.insert(LAST_UPDATED_ANNOTATION.to_string(), format_timestamp(*last_updated));
            }
        }
    }

    /// Compares an applied remediation's age against `threshold`.
    ///
    /// The boundary counts as due. A timestamp in the future cools for at
    /// most one full threshold.
    pub fn phase(&self, now: DateTime<Utc>, threshold: Duration) -> Phase {
        match self {
            Self::Untracked => Phase::Untracked,
            Self::Pending => Phase::Pending,
            Self::Applied { last_updated } => {
                let elapsed = now.signed_duration_since(*last_updated);
                let limit = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
                if elapsed >= limit {
                    Phase::Due
                } else {
                    let remaining = (limit - elapsed).to_std().unwrap_or(threshold);
                    Phase::Cooling {
                        remaining: remaining.min(threshold),
                    }
                }
            }
        }
    }
}

/// RFC 3339 in UTC with second precision, e.g. `2024-05-01T12:00:00Z`.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, MalformedState> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| MalformedState::InvalidTimestamp {
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
