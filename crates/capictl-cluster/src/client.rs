//! Applying components to a cluster
//!
//! Provides a trait-based abstraction so the installer can be tested with
//! mocks while production code applies objects through kube-rs.

use async_trait::async_trait;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use capictl_common::kube_utils::apply_manifests_with_discovery;
use capictl_common::Result;

use crate::components::Components;

/// Creates the objects of a provider release in the cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ComponentsClient: Send + Sync {
    /// Apply every object of `components`
    async fn create(&self, components: &Components) -> Result<()>;
}

/// Applies components with server-side apply
pub struct KubeComponentsClient {
    client: Client,
}

impl KubeComponentsClient {
    /// Create a components client for the given cluster
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ComponentsClient for KubeComponentsClient {
    async fn create(&self, components: &Components) -> Result<()> {
        let provider = components.inventory_object();
        info!(
            provider = %provider.manifest_label(),
            version = %provider.version,
            namespace = %provider.namespace,
            objects = components.manifests().len(),
            "applying provider components"
        );
        apply_manifests_with_discovery(&self.client, components.manifests()).await
    }
}
