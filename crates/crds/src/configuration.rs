//! Configuration CRD
//!
//! Desired container settings applied to Deployments flagged for remediation.
//! Every field is optional: an absent field leaves the matching container
//! field untouched, so "unset" is never confused with zero or `false`.

use crate::quantity::{self, QuantityError};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_TAG_LEN: usize = 128;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "api.core.anaisurl.com",
    version = "v1alpha1",
    kind = "Configuration",
    namespaced,
    status = "ConfigurationStatus"
)]
#[serde(rename_all = "camelCase")]
#[schemars(transform = legacy_quantity_keys)]
pub struct ConfigurationSpec {
    /// Container image tag, e.g. `v2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,

    /// Container port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<i32>,

    /// securityContext.allowPrivilegeEscalation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,

    /// securityContext.readOnlyRootFilesystem
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_only_root_filesystem: Option<bool>,

    /// securityContext.runAsNonRoot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_non_root: Option<bool>,

    /// CPU request quantity
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "requests")]
    pub cpu_request: Option<String>,

    /// CPU limit quantity
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "limits")]
    pub cpu_limit: Option<String>,

    /// Memory request quantity
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "memoryrequests")]
    pub memory_request: Option<String>,

    /// Memory limit quantity
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "memorylimits")]
    pub memory_limit: Option<String>,

    /// Which container (and port) of a Deployment is managed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_container: Option<ManagedContainer>,
}

/// Adds the legacy quantity keys (`requests`, `limits`, `memoryrequests`,
/// `memorylimits`) to the schema. Fields missing from the schema are pruned by
/// the API server before the serde aliases can read them.
fn legacy_quantity_keys(schema: &mut schemars::Schema) {
    const LEGACY_KEYS: [(&str, &str); 4] = [
        ("requests", "cpuRequest"),
        ("limits", "cpuLimit"),
        ("memoryrequests", "memoryRequest"),
        ("memorylimits", "memoryLimit"),
    ];

    let Some(properties) = schema.get_mut("properties").and_then(|p| p.as_object_mut()) else {
        return;
    };
    for (legacy, current) in LEGACY_KEYS {
        let description = format!("Deprecated spelling of {}", current);
        properties.insert(
            legacy.to_string(),
            schemars::json_schema!({
                "type": "string",
                "nullable": true,
                "description": description,
            })
            .into(),
        );
    }
}

/// Selects the managed container of a Deployment's pod template.
///
/// `name` wins over `index`. With neither set, the pod must have exactly
/// one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedContainer {
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Container index in the pod template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Name of the port to rewrite (defaults to the first port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_name: Option<String>,
}

/// Status is not reported; the subresource exists for forward compatibility.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConfigurationStatus {}

/// A problem found in a `ConfigurationSpec`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Image tag violates the OCI tag grammar
    #[error("invalid imageTag {0:?}")]
    ImageTag(String),

    /// Port outside 1..=65535
    #[error("containerPort {0} is out of range")]
    ContainerPort(i32),

    /// Malformed or negative quantity
    #[error("{field}: {source}")]
    Quantity {
        /// Spec field name
        field: &'static str,
        /// Underlying parse failure
        #[source]
        source: QuantityError,
    },
}

impl ConfigurationSpec {
    /// Checks every set field, returning all problems found.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Some(tag) = &self.image_tag {
            if !is_valid_tag(tag) {
                errors.push(ValidationError::ImageTag(tag.clone()));
            }
        }

        if let Some(port) = self.container_port {
            if !(1..=65535).contains(&port) {
                errors.push(ValidationError::ContainerPort(port));
            }
        }

        let quantities = [
            ("cpuRequest", &self.cpu_request),
            ("cpuLimit", &self.cpu_limit),
            ("memoryRequest", &self.memory_request),
            ("memoryLimit", &self.memory_limit),
        ];
        for (field, value) in quantities {
            if let Some(value) = value {
                if let Err(source) = quantity::validate(value) {
                    errors.push(ValidationError::Quantity { field, source });
                }
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// True when the spec would not change any container field.
    pub fn is_empty(&self) -> bool {
        self.image_tag.is_none()
            && self.container_port.is_none()
            && self.allow_privilege_escalation.is_none()
            && self.read_only_root_filesystem.is_none()
            && self.run_as_non_root.is_none()
            && self.cpu_request.is_none()
            && self.cpu_limit.is_none()
            && self.memory_request.is_none()
            && self.memory_limit.is_none()
    }
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.len() <= MAX_TAG_LEN
        && !tag.starts_with('.')
        && !tag.starts_with('-')
        && tag
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_missing_fields_are_unset() {
        let spec: ConfigurationSpec = serde_json::from_str(r#"{"imageTag": "v2"}"#).unwrap();
        assert_eq!(spec.image_tag.as_deref(), Some("v2"));
        assert_eq!(spec.container_port, None);
        assert_eq!(spec.run_as_non_root, None);
        assert_eq!(spec.cpu_limit, None);
    }

    #[test]
    fn test_explicit_false_is_distinct_from_unset() {
        let spec: ConfigurationSpec =
            serde_json::from_str(r#"{"allowPrivilegeEscalation": false}"#).unwrap();
        assert_eq!(spec.allow_privilege_escalation, Some(false));
        assert!(!spec.is_empty());
    }

    #[test]
    fn test_accepts_legacy_quantity_names() {
        let spec: ConfigurationSpec = serde_json::from_str(
            r#"{"requests": "100m", "limits": "500m", "memoryrequests": "64Mi", "memorylimits": "128Mi"}"#,
        )
        .unwrap();
        assert_eq!(spec.cpu_request.as_deref(), Some("100m"));
        assert_eq!(spec.cpu_limit.as_deref(), Some("500m"));
        assert_eq!(spec.memory_request.as_deref(), Some("64Mi"));
        assert_eq!(spec.memory_limit.as_deref(), Some("128Mi"));
    }

    #[test]
    fn test_serializes_camel_case_without_unset_fields() {
        let spec = ConfigurationSpec {
            container_port: Some(9090),
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json, serde_json::json!({"containerPort": 9090}));
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let spec = ConfigurationSpec {
            image_tag: Some("-bad".to_string()),
            container_port: Some(70000),
            cpu_limit: Some("-1".to_string()),
            memory_request: Some("12XB".to_string()),
            ..Default::default()
        };
        let errors = spec.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
        assert!(errors.contains(&ValidationError::ContainerPort(70000)));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::Quantity { field: "cpuLimit", .. })));
    }

    #[test]
    fn test_validate_accepts_sane_spec() {
        let spec = ConfigurationSpec {
            image_tag: Some("v2.1.0-rc_1".to_string()),
            container_port: Some(8080),
            run_as_non_root: Some(true),
            cpu_request: Some("250m".to_string()),
            memory_limit: Some("1Gi".to_string()),
            ..Default::default()
        };
        assert_eq!(spec.validate(), Ok(()));
    }

    #[test]
    fn test_empty_spec() {
        assert!(ConfigurationSpec::default().is_empty());
    }

    #[test]
    fn test_crd_schema_keeps_legacy_quantity_keys() {
        let crd = serde_json::to_value(Configuration::crd()).unwrap();
        let properties = crd
            .pointer("/spec/versions/0/schema/openAPIV3Schema/properties/spec/properties")
            .and_then(|p| p.as_object())
            .unwrap();

        for key in ["requests", "limits", "memoryrequests", "memorylimits", "cpuRequest", "memoryLimit"] {
            assert_eq!(properties[key]["type"], "string", "{} should be a string property", key);
        }
    }
}
