//! Container-level view of a Deployment: managed-container selection,
//! applying a `ConfigurationSpec`, and the health gate.

use crds::{ConfigurationSpec, ManagedContainer};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, ResourceRequirements, SecurityContext};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a `ConfigurationSpec` cannot be applied to a Deployment.
///
/// All variants are malformed state for that workload: nothing is written
/// and the workload stays pending until corrected externally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainerSelectionError {
    #[error("deployment has no pod template spec")]
    MissingPodSpec,

    #[error("pod template has no containers")]
    NoContainers,

    #[error("no container named {0:?}")]
    UnknownContainer(String),

    #[error("container index {index} out of range, pod has {len} containers")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("pod has {0} containers and no managedContainer selector")]
    Ambiguous(usize),

    #[error("container {container:?} has no port named {port:?}")]
    UnknownPort { container: String, port: String },

    #[error("container {0:?} has no image to retag")]
    MissingImage(String),
}

/// Result of the health gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// Condition present with a status other than `"True"`
    Unhealthy { status: String },
    /// No status or no matching condition
    Unknown,
}

/// Looks up the `condition_type` condition of a Deployment.
pub fn workload_health(deployment: &Deployment, condition_type: &str) -> Health {
    let condition = deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == condition_type));

    match condition {
        None => Health::Unknown,
        Some(c) if c.status == "True" => Health::Healthy,
        Some(c) => Health::Unhealthy {
            status: c.status.clone(),
        },
    }
}

/// Resolves the managed container of a Deployment's pod template.
pub fn managed_container<'a>(
    deployment: &'a mut Deployment,
    selector: Option<&ManagedContainer>,
) -> Result<&'a mut Container, ContainerSelectionError> {
    let containers = &mut deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .ok_or(ContainerSelectionError::MissingPodSpec)?
        .containers;

    if containers.is_empty() {
        return Err(ContainerSelectionError::NoContainers);
    }

    let len = containers.len();
    match (
        selector.and_then(|s| s.name.as_deref()),
        selector.and_then(|s| s.index),
    ) {
        (Some(name), _) => containers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| ContainerSelectionError::UnknownContainer(name.to_string())),
        (None, Some(index)) => containers
            .get_mut(index as usize)
            .ok_or(ContainerSelectionError::IndexOutOfRange { index, len }),
        (None, None) if len == 1 => Ok(&mut containers[0]),
        (None, None) => Err(ContainerSelectionError::Ambiguous(len)),
    }
}

/// Copies every set field of `spec` onto the managed container.
///
/// Returns the names of the fields that actually changed. Unset fields are
/// left alone, so a spec with no set fields changes nothing.
pub fn apply_configuration(
    deployment: &mut Deployment,
    spec: &ConfigurationSpec,
) -> Result<Vec<&'static str>, ContainerSelectionError> {
    let selector = spec.managed_container.as_ref();
    let container = managed_container(deployment, selector)?;
    let mut changed = Vec::new();

    // Resolve everything that can fail before touching the container.
    let new_image = match &spec.image_tag {
        Some(tag) => {
            let image = container
                .image
                .as_deref()
                .ok_or_else(|| ContainerSelectionError::MissingImage(container.name.clone()))?;
            Some(with_tag(image, tag))
        }
        None => None,
    };
    let port_index = match (spec.container_port, selector.and_then(|s| s.port_name.as_deref())) {
        (Some(_), Some(port_name)) => Some(Some(
            container
                .ports
                .iter()
                .flatten()
                .position(|p| p.name.as_deref() == Some(port_name))
                .ok_or_else(|| ContainerSelectionError::UnknownPort {
                    container: container.name.clone(),
                    port: port_name.to_string(),
                })?,
        )),
        (Some(_), None) => Some(None),
        (None, _) => None,
    };

    if let Some(image) = new_image {
        if container.image.as_deref() != Some(image.as_str()) {
            container.image = Some(image);
            changed.push("image");
        }
    }

    if let (Some(port), Some(index)) = (spec.container_port, port_index) {
        let ports = container.ports.get_or_insert_with(Vec::new);
        let target = match index {
            Some(i) => ports.get_mut(i),
            None => ports.first_mut(),
        };
        match target {
            Some(existing) if existing.container_port == port => {}
            Some(existing) => {
                existing.container_port = port;
                changed.push("containerPort");
            }
            None => {
                ports.push(ContainerPort {
                    container_port: port,
                    ..ContainerPort::default()
                });
                changed.push("containerPort");
            }
        }
    }

    let flags: [(&'static str, Option<bool>, fn(&mut SecurityContext) -> &mut Option<bool>); 3] = [
        ("allowPrivilegeEscalation", spec.allow_privilege_escalation, |s| {
            &mut s.allow_privilege_escalation
        }),
        ("readOnlyRootFilesystem", spec.read_only_root_filesystem, |s| {
            &mut s.read_only_root_filesystem
        }),
        ("runAsNonRoot", spec.run_as_non_root, |s| &mut s.run_as_non_root),
    ];
    for (field, value, slot) in flags {
        let Some(value) = value else { continue };
        let security = container.security_context.get_or_insert_with(SecurityContext::default);
        let current = slot(security);
        if *current != Some(value) {
            *current = Some(value);
            changed.push(field);
        }
    }

    let quantities = [
        ("cpuRequest", Slot::Requests, "cpu", &spec.cpu_request),
        ("cpuLimit", Slot::Limits, "cpu", &spec.cpu_limit),
        ("memoryRequest", Slot::Requests, "memory", &spec.memory_request),
        ("memoryLimit", Slot::Limits, "memory", &spec.memory_limit),
    ];
    for (field, slot, resource, value) in quantities {
        let Some(value) = value else { continue };
        let resources = container.resources.get_or_insert_with(ResourceRequirements::default);
        let map = match slot {
            Slot::Requests => &mut resources.requests,
            Slot::Limits => &mut resources.limits,
        }
        .get_or_insert_with(BTreeMap::new);
        let quantity = Quantity(value.clone());
        if map.get(resource) != Some(&quantity) {
            map.insert(resource.to_string(), quantity);
            changed.push(field);
        }
    }

    Ok(changed)
}

#[derive(Clone, Copy)]
enum Slot {
    Requests,
    Limits,
}

/// Replaces the tag of an image reference, dropping any digest.
///
/// The registry host may carry a port, so only a colon after the last `/`
/// starts a tag.
pub fn with_tag(image: &str, tag: &str) -> String {
    let without_digest = image.split_once('@').map_or(image, |(name, _)| name);
    let name_start = without_digest.rfind('/').map_or(0, |i| i + 1);
    let repository = match without_digest[name_start..].find(':') {
        Some(colon) => &without_digest[..name_start + colon],
        None => without_digest,
    };
    format!("{}:{}", repository, tag)
}
