//! Kubernetes helpers built on kube-rs
//!
//! Applies provider objects with server-side apply, resolving each object's
//! API resource through discovery so CRDs shipped by the same provider work.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
use serde_json::Value;
use tracing::{debug, trace};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "capictl";

/// Irregular plurals for kinds that show up in provider components
const KIND_PLURALS: &[(&str, &str)] = &[
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("clusterclass", "clusterclasses"),
    ("endpoints", "endpoints"),
];

/// Split an apiVersion into (group, version).
///
/// Core types have no group: `v1` becomes `("", "v1")`.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Build an ApiResource from an explicit apiVersion and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Kind of an object, or "" when absent
pub fn extract_kind(obj: &Value) -> &str {
    obj.get("kind").and_then(Value::as_str).unwrap_or("")
}

/// Apply order for a kind (lower applies first)
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "Service" => 6,
        "Certificate" | "Issuer" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        "ValidatingWebhookConfiguration" | "MutatingWebhookConfiguration" => 9,
        _ => 10,
    }
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Ensure a namespace exists (idempotent, server-side apply)
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), kube::Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Run API discovery, retrying while freshly registered API groups settle
async fn run_discovery(client: &Client) -> Result<Discovery, Error> {
    retry_with_backoff(&RetryConfig::for_discovery(), "api-discovery", || {
        let client = client.clone();
        async move {
            Discovery::new(client)
                .run()
                .await
                .map_err(|e| Error::internal_with_context("api-discovery", e.to_string()))
        }
    })
    .await
}

/// Apply one object, resolving its resource type through `discovery`
async fn apply_object(client: &Client, discovery: &Discovery, obj: &Value) -> Result<(), Error> {
    let kind = extract_kind(obj);
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization_for_kind(kind, "missing apiVersion"))?;
    let name = obj
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization_for_kind(kind, "missing metadata.name"))?;
    let namespace = obj.pointer("/metadata/namespace").and_then(Value::as_str);

    let (group, version) = parse_api_version(api_version);
    let gvk = GroupVersionKind {
        group,
        version,
        kind: kind.to_string(),
    };
    let Some((api_resource, _)) = discovery.resolve_gvk(&gvk) else {
        return Err(Error::internal_with_context(
            "apply",
            format!("unknown resource type: {}/{}", api_version, kind),
        ));
    };

    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &api_resource),
        None => Api::all_with(client.clone(), &api_resource),
    };
    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(obj))
        .await
        .map_err(|e| {
            Error::internal_with_context("apply", format!("failed to apply {}/{}: {}", kind, name, e))
        })?;

    trace!(kind = %kind, name = %name, namespace = ?namespace, "applied object");
    Ok(())
}

/// Apply objects in dependency order, stopping at the first failure.
///
/// Namespaces and CRDs go first; discovery is re-run after CRDs so the
/// custom resources that follow resolve. Remaining objects are sorted by
/// [`kind_priority`].
pub async fn apply_manifests_with_discovery(client: &Client, objects: &[Value]) -> Result<(), Error> {
    if objects.is_empty() {
        return Ok(());
    }

    let (mut foundational, mut rest): (Vec<&Value>, Vec<&Value>) =
        objects.iter().partition(|obj| {
            matches!(extract_kind(obj), "Namespace" | "CustomResourceDefinition")
        });
    foundational.sort_by_key(|obj| kind_priority(extract_kind(obj)));
    rest.sort_by_key(|obj| kind_priority(extract_kind(obj)));

    let mut discovery = run_discovery(client).await?;
    for obj in &foundational {
        apply_object(client, &discovery, obj).await?;
    }

    let has_crds = foundational
        .iter()
        .any(|obj| extract_kind(obj) == "CustomResourceDefinition");
    if has_crds && !rest.is_empty() {
        debug!("re-running discovery after applying CRDs");
        discovery = run_discovery(client).await?;
    }

    for obj in &rest {
        apply_object(client, &discovery, obj).await?;
    }
    Ok(())
}
