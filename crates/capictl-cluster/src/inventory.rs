//! Provider inventory
//!
//! The inventory records which provider instances are installed. Records
//! are `clusterctl.cluster.x-k8s.io/v1alpha3` `Provider` objects stored in
//! each provider's namespace:
//!
//! ```yaml
//! apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3
//! kind: Provider
//! metadata:
//!   name: infrastructure-docker
//!   namespace: capd-system
//! providerName: docker
//! type: InfrastructureProvider
//! version: v0.3.0
//! watchedNamespace: ""
//! ```

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use serde_json::Value;
use tracing::{debug, info};

use capictl_common::kube_utils::{build_api_resource, ensure_namespace, is_not_found};
use capictl_common::{Error, Result, CLUSTERCTL_LABEL, PROVIDER_LABEL};

use crate::provider::{Provider, ProviderList, ProviderType};

/// apiVersion of inventory records
pub const INVENTORY_API_VERSION: &str = "clusterctl.cluster.x-k8s.io/v1alpha3";

/// Kind of inventory records
pub const INVENTORY_KIND: &str = "Provider";

/// Reads and writes provider inventory records
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// All provider instances currently installed
    async fn list(&self) -> Result<ProviderList>;

    /// Record a newly installed provider instance
    async fn create(&self, provider: &Provider) -> Result<()>;
}

fn inventory_resource() -> ApiResource {
    build_api_resource(INVENTORY_API_VERSION, INVENTORY_KIND)
}

/// Inventory record for a provider
fn provider_to_object(provider: &Provider) -> Value {
    let label = provider.manifest_label();
    serde_json::json!({
        "apiVersion": INVENTORY_API_VERSION,
        "kind": INVENTORY_KIND,
        "metadata": {
            "name": label,
            "namespace": provider.namespace,
            "labels": {
                CLUSTERCTL_LABEL: "",
                PROVIDER_LABEL: label,
            },
        },
        "providerName": provider.name,
        "type": provider.provider_type,
        "version": provider.version,
        "watchedNamespace": provider.watched_namespace,
    })
}

/// Provider described by an inventory record
fn provider_from_object(obj: &DynamicObject) -> Result<Provider> {
    let name = obj.metadata.name.as_deref().unwrap_or_default();
    let field = |key: &str| -> Result<String> {
        obj.data
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::serialization_for_kind(
                    INVENTORY_KIND,
                    format!("inventory record {:?} is missing {}", name, key),
                )
            })
    };

    let provider_type: ProviderType = serde_json::from_value(
        obj.data.get("type").cloned().unwrap_or(Value::Null),
    )
    .map_err(|e| {
        Error::serialization_for_kind(
            INVENTORY_KIND,
            format!("inventory record {:?} has invalid type: {}", name, e),
        )
    })?;

    Ok(Provider {
        name: field("providerName")?,
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        version: field("version")?,
        provider_type,
        watched_namespace: obj
            .data
            .get("watchedNamespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

/// Inventory stored as `Provider` objects in the cluster
pub struct KubeInventoryClient {
    client: Client,
}

impl KubeInventoryClient {
    /// Create an inventory client for the given cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InventoryClient for KubeInventoryClient {
    async fn list(&self) -> Result<ProviderList> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &inventory_resource());
        let objects = match api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(e) if is_not_found(&e) => {
                debug!("provider inventory CRD not installed, treating inventory as empty");
                return Ok(ProviderList::default());
            }
            Err(e) => return Err(e.into()),
        };

        let providers = objects
            .iter()
            .map(provider_from_object)
            .collect::<Result<ProviderList>>()?;
        debug!(providers = providers.len(), "read provider inventory");
        Ok(providers)
    }

    async fn create(&self, provider: &Provider) -> Result<()> {
        ensure_namespace(&self.client, &provider.namespace).await?;

        let obj: DynamicObject = serde_json::from_value(provider_to_object(provider))
            .map_err(|e| Error::serialization_for_kind(INVENTORY_KIND, e.to_string()))?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &provider.namespace, &inventory_resource());
        api.create(&PostParams::default(), &obj).await?;

        info!(
            provider = %provider.instance_name(),
            version = %provider.version,
            "recorded provider in inventory"
        );
        Ok(())
    }
}
