//! Test utilities for unit testing reconcilers
//!
//! This module provides helpers for creating test data and setting up test scenarios.

#[cfg(test)]
use crate::config::ControllerConfig;
#[cfg(test)]
use crate::reconciler::{Pass, Reconciler};
#[cfg(test)]
use chrono::{DateTime, TimeZone, Utc};
#[cfg(test)]
use cluster_client::MockClusterClient;
#[cfg(test)]
use crds::{Configuration, ConfigurationSpec, LAST_UPDATED_ANNOTATION, MISCONFIGURATION_ANNOTATION};
#[cfg(test)]
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentSpec, DeploymentStatus};
#[cfg(test)]
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::time::Duration;

/// Fixed reference instant for deterministic timestamps
#[cfg(test)]
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Pass starting at `now` with a generous deadline
#[cfg(test)]
pub fn test_pass(now: DateTime<Utc>) -> Pass {
    Pass::new(now, tokio::time::Instant::now() + Duration::from_secs(30))
}

/// Reconciler with default settings backed by `mock`
#[cfg(test)]
pub fn create_test_reconciler(mock: &MockClusterClient) -> Reconciler {
    Reconciler::new(mock.clone(), ControllerConfig::default())
}

/// Helper to create a healthy single-container Deployment with port 8080
#[cfg(test)]
pub fn create_test_deployment(namespace: &str, name: &str, image: &str) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some(image.to_string()),
                        ports: Some(vec![ContainerPort {
                            name: Some("http".to_string()),
                            container_port: 8080,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            conditions: Some(vec![DeploymentCondition {
                type_: "Available".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// Helper to create a Deployment carrying the remediation annotations
#[cfg(test)]
pub fn create_marked_deployment(
    namespace: &str,
    name: &str,
    image: &str,
    marker: &str,
    last_updated: Option<&str>,
) -> Deployment {
    let mut deployment = create_test_deployment(namespace, name, image);
    let annotations = deployment.metadata.annotations.get_or_insert_with(BTreeMap::new);
    annotations.insert(MISCONFIGURATION_ANNOTATION.to_string(), marker.to_string());
    if let Some(at) = last_updated {
        annotations.insert(LAST_UPDATED_ANNOTATION.to_string(), at.to_string());
    }
    deployment
}

/// Replace the pod template containers with `(name, image)` pairs
#[cfg(test)]
pub fn set_containers(deployment: &mut Deployment, containers: &[(&str, &str)]) {
    if let Some(pod) = deployment.spec.as_mut().and_then(|s| s.template.spec.as_mut()) {
        pod.containers = containers
            .iter()
            .map(|(name, image)| Container {
                name: name.to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            })
            .collect();
    }
}

/// Set (or add) a status condition
#[cfg(test)]
pub fn set_condition(deployment: &mut Deployment, type_: &str, status: &str) {
    let conditions = deployment
        .status
        .get_or_insert_with(Default::default)
        .conditions
        .get_or_insert_with(Vec::new);
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(c) => c.status = status.to_string(),
        None => conditions.push(DeploymentCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }),
    }
}

/// Helper to create a Configuration CR
#[cfg(test)]
pub fn create_test_configuration(namespace: &str, name: &str, spec: ConfigurationSpec) -> Configuration {
    let mut configuration = Configuration::new(name, spec);
    configuration.metadata.namespace = Some(namespace.to_string());
    configuration
}

/// Annotation value of a stored Deployment
#[cfg(test)]
pub fn annotation(mock: &MockClusterClient, namespace: &str, name: &str, key: &str) -> Option<String> {
    mock.deployment(namespace, name)
        .and_then(|d| d.metadata.annotations)
        .and_then(|a| a.get(key).cloned())
}

/// Image of the first container of a stored Deployment
#[cfg(test)]
pub fn image(mock: &MockClusterClient, namespace: &str, name: &str) -> Option<String> {
    mock.deployment(namespace, name)
        .and_then(|d| d.spec)
        .and_then(|s| s.template.spec)
        .and_then(|p| p.containers.into_iter().next())
        .and_then(|c| c.image)
}
