//! Installation units ("components")
//!
//! A [`Components`] is everything needed to install one provider release:
//! the Kubernetes objects to apply, the images they pull and the inventory
//! record describing the resulting provider instance.
//!
//! [`Components::from_yaml`] builds one from a raw components YAML:
//! variables are substituted, objects are moved into the target namespace,
//! the controller is scoped to the watched namespace and every object gets
//! the clusterctl labels.

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodSpec;
use serde_json::Value;
use tracing::debug;

use capictl_common::yaml::parse_yaml_multi;
use capictl_common::{Error, Result, CLUSTERCTL_LABEL, PROVIDER_LABEL};

use crate::config::Variables;
use crate::provider::{Provider, ProviderType};

/// Kinds that are never namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "APIService",
    "PriorityClass",
    "StorageClass",
    "ClusterIssuer",
];

/// Container receiving the `--namespace` flag when watching is scoped
const MANAGER_CONTAINER: &str = "manager";

/// Identity of the provider release being turned into components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentsOptions {
    /// Provider name
    pub name: String,
    /// Provider type
    pub provider_type: ProviderType,
    /// Release version
    pub version: String,
    /// Namespace to install into
    pub target_namespace: String,
    /// Namespace to watch; empty watches all namespaces
    pub watching_namespace: String,
}

/// One provider release ready to be installed
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    provider: Provider,
    images: Vec<String>,
    objects: Vec<Value>,
}

impl Components {
    /// Assemble components from already prepared parts
    pub fn new(provider: Provider, images: Vec<String>, objects: Vec<Value>) -> Self {
        Self {
            provider,
            images,
            objects,
        }
    }

    /// Build components from a raw components YAML stream
    pub fn from_yaml(options: ComponentsOptions, raw: &str, variables: &Variables) -> Result<Self> {
        let label = crate::provider::manifest_label(&options.name, options.provider_type);
        let substituted = substitute_vars(raw, variables).map_err(|missing| {
            Error::repository(
                &label,
                format!("value for variables [{}] is not set", missing.join(", ")),
            )
        })?;

        let mut objects = parse_yaml_multi(&substituted)?;
        for obj in &mut objects {
            fix_target_namespace(obj, &options.target_namespace);
            if !options.watching_namespace.is_empty() {
                set_watching_namespace(obj, &options.watching_namespace);
            }
            add_labels(obj, &label);
        }
        let images = collect_images(&objects)?;

        debug!(
            provider = %label,
            version = %options.version,
            objects = objects.len(),
            images = images.len(),
            "built provider components"
        );

        let provider = Provider::new(
            options.name,
            options.provider_type,
            options.target_namespace,
            options.version,
        )
        .watching(options.watching_namespace);
        Ok(Self::new(provider, images, objects))
    }

    /// Provider name
    pub fn name(&self) -> &str {
        &self.provider.name
    }

    /// Release version
    pub fn version(&self) -> &str {
        &self.provider.version
    }

    /// Provider type
    pub fn provider_type(&self) -> ProviderType {
        self.provider.provider_type
    }

    /// Container images referenced by the objects
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Objects to apply
    pub fn manifests(&self) -> &[Value] {
        &self.objects
    }

    /// Provider instance this install will produce
    pub fn inventory_object(&self) -> Provider {
        self.provider.clone()
    }
}

/// Substitute `${VAR}` expressions.
///
/// Supports `${VAR}`, `${VAR:=default}`, `${VAR:-default}`,
/// `${VAR="default"}` and `${VAR/#pattern/replacement}` (resolved to the
/// value or empty). Returns the names of plain `${VAR}` references that
/// have no value.
fn substitute_vars(yaml: &str, vars: &Variables) -> std::result::Result<String, Vec<String>> {
    let mut result = String::with_capacity(yaml.len());
    let mut missing = BTreeSet::new();
    let mut remaining = yaml;

    while let Some(start) = remaining.find("${") {
        result.push_str(&remaining[..start]);
        let after_start = &remaining[start + 2..];
        let Some(end) = after_start.find('}') else {
            result.push_str("${");
            remaining = after_start;
            continue;
        };

        let expr = &after_start[..end];
        match resolve_var_expr(expr, vars) {
            Some(value) => result.push_str(&value),
            None => {
                missing.insert(expr.to_string());
            }
        }
        remaining = &after_start[end + 1..];
    }
    result.push_str(remaining);

    if missing.is_empty() {
        Ok(result)
    } else {
        Err(missing.into_iter().collect())
    }
}

/// Value for one `${...}` expression, or None when a required variable is unset
fn resolve_var_expr(expr: &str, vars: &Variables) -> Option<String> {
    if let Some(pos) = expr.find("/#") {
        return Some(vars.get(&expr[..pos]).unwrap_or_default());
    }
    if let Some(pos) = expr.find(":=").or_else(|| expr.find(":-")) {
        let default = &expr[pos + 2..];
        return Some(vars.get(&expr[..pos]).unwrap_or_else(|| default.to_string()));
    }
    if let Some(pos) = expr.find('=') {
        let default = expr[pos + 1..].trim_matches('"');
        return Some(vars.get(&expr[..pos]).unwrap_or_else(|| default.to_string()));
    }
    vars.get(expr)
}

fn fix_target_namespace(obj: &mut Value, target_namespace: &str) {
    let kind = capictl_common::kube_utils::extract_kind(obj).to_string();
    let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };

    if kind == "Namespace" {
        metadata.insert("name".to_string(), Value::from(target_namespace));
    } else if !CLUSTER_SCOPED_KINDS.contains(&kind.as_str()) {
        metadata.insert("namespace".to_string(), Value::from(target_namespace));
    }

    if kind == "ClusterRoleBinding" || kind == "RoleBinding" {
        if let Some(subjects) = obj.get_mut("subjects").and_then(Value::as_array_mut) {
            for subject in subjects {
                if subject.get("kind").and_then(Value::as_str) == Some("ServiceAccount") {
                    subject["namespace"] = Value::from(target_namespace);
                }
            }
        }
    }
}

/// Point the manager container of a Deployment at a single namespace
fn set_watching_namespace(obj: &mut Value, watching_namespace: &str) {
    if capictl_common::kube_utils::extract_kind(obj) != "Deployment" {
        return;
    }
    let Some(containers) = obj
        .pointer_mut("/spec/template/spec/containers")
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    let flag = format!("--namespace={}", watching_namespace);
    for container in containers {
        if container.get("name").and_then(Value::as_str) != Some(MANAGER_CONTAINER) {
            continue;
        }
        let args = container
            .as_object_mut()
            .map(|c| c.entry("args").or_insert_with(|| Value::Array(Vec::new())));
        if let Some(Value::Array(args)) = args {
            args.retain(|a| !a.as_str().is_some_and(|s| s.starts_with("--namespace=")));
            args.push(Value::from(flag.clone()));
        }
    }
}

fn add_labels(obj: &mut Value, manifest_label: &str) {
    let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) else {
        return;
    };
    let labels = metadata
        .entry("labels")
        .or_insert_with(|| Value::Object(Default::default()));
    if let Value::Object(labels) = labels {
        labels.insert(CLUSTERCTL_LABEL.to_string(), Value::from(""));
        labels.insert(PROVIDER_LABEL.to_string(), Value::from(manifest_label));
    }
}

fn pod_spec_images(spec: Option<&PodSpec>, images: &mut BTreeSet<String>) {
    let Some(spec) = spec else {
        return;
    };
    let init = spec.init_containers.iter().flatten();
    for container in spec.containers.iter().chain(init) {
        if let Some(image) = &container.image {
            images.insert(image.clone());
        }
    }
}

/// Sorted, de-duplicated images of all workload objects
fn collect_images(objects: &[Value]) -> Result<Vec<String>> {
    let mut images = BTreeSet::new();
    for obj in objects {
        let kind = capictl_common::kube_utils::extract_kind(obj);
        let bad = |e: serde_json::Error| Error::serialization_for_kind(kind, e.to_string());
        let pod_spec = match kind {
            "Deployment" => serde_json::from_value::<Deployment>(obj.clone())
                .map_err(bad)?
                .spec
                .and_then(|s| s.template.spec),
            "DaemonSet" => serde_json::from_value::<DaemonSet>(obj.clone())
                .map_err(bad)?
                .spec
                .and_then(|s| s.template.spec),
            "StatefulSet" => serde_json::from_value::<StatefulSet>(obj.clone())
                .map_err(bad)?
                .spec
                .and_then(|s| s.template.spec),
            _ => continue,
        };
        pod_spec_images(pod_spec.as_ref(), &mut images);
    }
    Ok(images.into_iter().collect())
}
