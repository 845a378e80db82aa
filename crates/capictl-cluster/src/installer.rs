//! Provider installation with consistency checks
//!
//! Installs are deferred: components are queued with `add`, the resulting
//! management cluster is checked with `validate`, and only then applied
//! with `install`. Validation simulates the queue on top of the current
//! inventory and checks that:
//! - there is only one instance of a provider per namespace
//! - instances of the same provider do not watch overlapping namespaces
//! - every provider belongs to exactly one management group
//! - every provider supports the contract of its management group
//!
//! Validate-then-install is not atomic against other writers: callers must
//! serialize installs targeting the same cluster.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use capictl_common::{Error, Result};

use crate::client::{ComponentsClient, KubeComponentsClient};
use crate::components::Components;
use crate::config::ConfigClient;
use crate::contract::{ContractCache, ContractResolver};
use crate::inventory::{InventoryClient, KubeInventoryClient};
use crate::management_group::derive_management_groups;
use crate::provider::ProviderList;
use crate::repository::RepositoryClientFactory;

/// Queue, validate and install providers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProviderInstaller: Send + Sync {
    /// Queue components for install. No checks are performed.
    fn add(&mut self, components: Components);

    /// Install queued components in order.
    ///
    /// Stops at the first failure without rolling back what was already
    /// installed; on failure no partial list is returned.
    async fn install(&self) -> Result<Vec<Components>>;

    /// Check that installing the queue leaves a working management cluster
    async fn validate(&self) -> Result<()>;

    /// Sorted, de-duplicated images needed by the queue
    fn images(&self) -> Vec<String>;
}

/// Default [`ProviderInstaller`]
pub struct Installer {
    contracts: ContractResolver,
    components_client: Arc<dyn ComponentsClient>,
    inventory: Arc<dyn InventoryClient>,
    queue: Vec<Components>,
}

impl Installer {
    /// Create an installer over explicit collaborators
    pub fn new(
        config: Arc<dyn ConfigClient>,
        repositories: RepositoryClientFactory,
        components_client: Arc<dyn ComponentsClient>,
        inventory: Arc<dyn InventoryClient>,
    ) -> Self {
        Self {
            contracts: ContractResolver::new(config, repositories),
            components_client,
            inventory,
            queue: Vec::new(),
        }
    }

    /// Create an installer that applies to and records in `client`'s cluster
    pub fn for_cluster(
        client: Client,
        config: Arc<dyn ConfigClient>,
        repositories: RepositoryClientFactory,
    ) -> Self {
        Self::new(
            config,
            repositories,
            Arc::new(KubeComponentsClient::new(client.clone())),
            Arc::new(KubeInventoryClient::new(client)),
        )
    }

    /// Components queued for install, in install order
    pub fn queue(&self) -> &[Components] {
        &self.queue
    }

    /// Simulate the queue over the inventory and check the result
    async fn check_queue(&self) -> Result<()> {
        let mut providers = self.inventory.list().await?;
        debug!(
            installed = providers.len(),
            queued = self.queue.len(),
            "validating install queue"
        );

        for components in &self.queue {
            simulate_install(&mut providers, components)?;
        }

        let groups = derive_management_groups(&providers)?;

        let mut cache = ContractCache::new();
        for components in &self.queue {
            let provider = components.inventory_object();
            let instance = provider.instance_name();
            let group = groups
                .find_by_provider_instance_name(&instance)
                .ok_or_else(|| {
                    Error::management_group(format!(
                        "the {} provider does not belong to any management group",
                        instance
                    ))
                })?;

            let group_contract = self
                .contracts
                .resolve(&mut cache, &group.core_provider)
                .await?;
            let provider_contract = self.contracts.resolve(&mut cache, &provider).await?;
            if provider_contract != group_contract {
                return Err(Error::ContractMismatch {
                    components: components.name().to_string(),
                    provider_contract,
                    group_contract,
                });
            }
        }

        Ok(())
    }
}

/// Add a provider to `providers` as if it were installed.
///
/// Only instances of the same provider are compared: two instances must
/// not share a namespace, and must not watch overlapping namespaces.
fn simulate_install(providers: &mut ProviderList, components: &Components) -> Result<()> {
    let provider = components.inventory_object();
    let existing = providers.filter_by_name(&provider.name);

    if existing.iter().any(|p| p.namespace == provider.namespace) {
        return Err(Error::NamespaceCollision {
            components: components.name().to_string(),
            provider: provider.name,
            namespace: provider.namespace,
        });
    }

    if existing.iter().any(|p| p.has_watching_overlap_with(&provider)) {
        return Err(Error::WatchOverlap {
            components: components.name().to_string(),
            provider: provider.name,
            watched_namespace: provider.watched_namespace,
        });
    }

    providers.push(provider);
    Ok(())
}

#[async_trait]
impl ProviderInstaller for Installer {
    fn add(&mut self, components: Components) {
        self.queue.push(components);
    }

    async fn install(&self) -> Result<Vec<Components>> {
        let mut installed: Vec<Components> = Vec::with_capacity(self.queue.len());
        for components in &self.queue {
            let provider = components.inventory_object();
            let result = match self.components_client.create(components).await {
                Ok(()) => self.inventory.create(&provider).await,
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                if !installed.is_empty() {
                    let committed: Vec<String> = installed
                        .iter()
                        .map(|c| c.inventory_object().instance_name())
                        .collect();
                    warn!(
                        provider = %provider.instance_name(),
                        committed = ?committed,
                        error = %e,
                        "install stopped, earlier providers remain installed"
                    );
                }
                return Err(e);
            }

            info!(
                provider = %provider.instance_name(),
                version = %provider.version,
                "installed provider"
            );
            installed.push(components.clone());
        }
        Ok(installed)
    }

    async fn validate(&self) -> Result<()> {
        if let Err(e) = self.check_queue().await {
            warn!(
                conflict = e.is_conflict(),
                context = ?e.context(),
                error = %e,
                "install queue rejected"
            );
            return Err(e);
        }
        info!(queued = self.queue.len(), "install queue is valid");
        Ok(())
    }

    fn images(&self) -> Vec<String> {
        self.queue
            .iter()
            .flat_map(|c| c.images().iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use mockall::Sequence;

    use crate::client::MockComponentsClient;
    use crate::contract::tests::{fake_repositories, permissive_config};
    use crate::inventory::MockInventoryClient;
    use crate::provider::{Provider, ProviderType};

    fn components(
        name: &str,
        provider_type: ProviderType,
        namespace: &str,
        watching: &str,
        images: &[&str],
    ) -> Components {
        let provider = Provider::new(name, provider_type, namespace, "v1.0.0").watching(watching);
        Components::new(
            provider,
            images.iter().map(|i| i.to_string()).collect(),
            Vec::new(),
        )
    }

    fn infra(name: &str, namespace: &str) -> Components {
        components(name, ProviderType::Infrastructure, namespace, "", &[])
    }

    fn core(namespace: &str) -> Components {
        components("core-X", ProviderType::Core, namespace, "", &[])
    }

    fn inventory_with(providers: Vec<Provider>) -> MockInventoryClient {
        let mut inventory = MockInventoryClient::new();
        inventory
            .expect_list()
            .times(1)
            .returning(move || Ok(ProviderList::new(providers.clone())));
        inventory
    }

    fn installer_with(
        inventory: MockInventoryClient,
        contracts: &[(&str, &str)],
        fetches: Arc<AtomicUsize>,
    ) -> Installer {
        Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(contracts, fetches),
            Arc::new(MockComponentsClient::new()),
            Arc::new(inventory),
        )
    }

    // =========================================================================
    // validate
    // =========================================================================

    #[tokio::test]
    async fn namespace_collision_with_installed_instance() {
        let installed = vec![
            Provider::new("core-X", ProviderType::Core, "capi-system", "v1.0.0"),
            Provider::new("infra-A", ProviderType::Infrastructure, "ns1", "v1.0.0"),
        ];
        let mut installer = installer_with(
            inventory_with(installed),
            &[("core-X", "v1alpha3"), ("infra-A", "v1alpha3")],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(infra("infra-A", "ns1"));
        installer.add(components("infra-B", ProviderType::Infrastructure, "ns1", "ns2", &[]));

        let err = installer.validate().await.unwrap_err();
        match &err {
            Error::NamespaceCollision {
                components,
                provider,
                namespace,
            } => {
                assert_eq!(components, "infra-A");
                assert_eq!(provider, "infra-A");
                assert_eq!(namespace, "ns1");
            }
            other => panic!("expected namespace collision, got {other}"),
        }
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn namespace_collision_regardless_of_queue_order() {
        let installed = vec![
            Provider::new("core-X", ProviderType::Core, "capi-system", "v1.0.0"),
            Provider::new("infra-A", ProviderType::Infrastructure, "ns1", "v1.0.0"),
        ];
        let mut installer = installer_with(
            inventory_with(installed),
            &[],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(components("infra-B", ProviderType::Infrastructure, "ns3", "ns3", &[]));
        installer.add(infra("infra-A", "ns1"));

        let err = installer.validate().await.unwrap_err();
        assert!(matches!(err, Error::NamespaceCollision { ref components, .. } if components == "infra-A"));
    }

    #[tokio::test]
    async fn namespace_collision_within_queue() {
        let mut installer = installer_with(
            inventory_with(vec![]),
            &[],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-A", "ns1"));
        installer.add(infra("infra-A", "ns1"));

        assert!(matches!(
            installer.validate().await.unwrap_err(),
            Error::NamespaceCollision { .. }
        ));
    }

    #[tokio::test]
    async fn watch_overlap_with_installed_instance() {
        let installed = vec![
            Provider::new("core-X", ProviderType::Core, "capi-system", "v1.0.0"),
            Provider::new("infra-A", ProviderType::Infrastructure, "ns1", "v1.0.0")
                .watching("team-a"),
        ];
        let mut installer = installer_with(
            inventory_with(installed),
            &[],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(components("infra-A", ProviderType::Infrastructure, "ns2", "team-a", &[]));

        let err = installer.validate().await.unwrap_err();
        match err {
            Error::WatchOverlap {
                watched_namespace, ..
            } => assert_eq!(watched_namespace, "team-a"),
            other => panic!("expected watch overlap, got {other}"),
        }
    }

    #[tokio::test]
    async fn watching_all_namespaces_overlaps_existing_instance() {
        let installed = vec![
            Provider::new("core-X", ProviderType::Core, "capi-system", "v1.0.0"),
            Provider::new("infra-A", ProviderType::Infrastructure, "ns1", "v1.0.0")
                .watching("team-a"),
        ];
        let mut installer = installer_with(
            inventory_with(installed),
            &[],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(infra("infra-A", "ns2"));

        assert!(matches!(
            installer.validate().await.unwrap_err(),
            Error::WatchOverlap { .. }
        ));
    }

    #[tokio::test]
    async fn disjoint_watched_namespaces_validate() {
        let installed = vec![
            Provider::new("core-X", ProviderType::Core, "capi-system", "v1.0.0"),
            Provider::new("infra-A", ProviderType::Infrastructure, "ns1", "v1.0.0")
                .watching("team-a"),
        ];
        let mut installer = installer_with(
            inventory_with(installed),
            &[("core-X", "v1alpha3"), ("infra-A", "v1alpha3")],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(components("infra-A", ProviderType::Infrastructure, "ns2", "team-b", &[]));

        installer.validate().await.unwrap();
    }

    #[tokio::test]
    async fn each_unit_is_checked_against_its_own_group_contract() {
        let contracts = [
            ("core-A", "v1alpha3"),
            ("infra-A", "v1alpha3"),
            ("core-B", "v1alpha4"),
            ("infra-B", "v1alpha4"),
        ];
        let queue = || {
            vec![
                components("core-A", ProviderType::Core, "capi-a", "team-a", &[]),
                components("core-B", ProviderType::Core, "capi-b", "team-b", &[]),
                components("infra-A", ProviderType::Infrastructure, "capa", "team-a", &[]),
                components("infra-B", ProviderType::Infrastructure, "capb", "team-b", &[]),
            ]
        };

        let mut installer = installer_with(
            inventory_with(vec![]),
            &contracts,
            Arc::new(AtomicUsize::new(0)),
        );
        for unit in queue() {
            installer.add(unit);
        }
        installer.validate().await.unwrap();

        // infra-B now disagrees with core-B even though it matches core-A
        let mut installer = installer_with(
            inventory_with(vec![]),
            &[
                ("core-A", "v1alpha3"),
                ("infra-A", "v1alpha3"),
                ("core-B", "v1alpha4"),
                ("infra-B", "v1alpha3"),
            ],
            Arc::new(AtomicUsize::new(0)),
        );
        for unit in queue() {
            installer.add(unit);
        }
        let err = installer.validate().await.unwrap_err();
        match err {
            Error::ContractMismatch {
                components,
                group_contract,
                ..
            } => {
                assert_eq!(components, "infra-B");
                assert_eq!(group_contract, "v1alpha4");
            }
            other => panic!("expected contract mismatch, got {other}"),
        }
    }

    #[tokio::test]
    async fn contract_mismatch_names_unit_and_contracts() {
        let mut installer = installer_with(
            inventory_with(vec![]),
            &[("core-X", "v1alpha3"), ("infra-Y", "v1alpha4")],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-Y", "infra-system"));

        let err = installer.validate().await.unwrap_err();
        match &err {
            Error::ContractMismatch {
                components,
                provider_contract,
                group_contract,
            } => {
                assert_eq!(components, "infra-Y");
                assert_eq!(provider_contract, "v1alpha4");
                assert_eq!(group_contract, "v1alpha3");
            }
            other => panic!("expected contract mismatch, got {other}"),
        }
        assert!(err.to_string().contains("v1alpha3"));
        assert!(err.to_string().contains("v1alpha4"));
    }

    #[tokio::test]
    async fn matching_contracts_validate() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let mut installer = installer_with(
            inventory_with(vec![]),
            &[("core-X", "v1alpha3"), ("infra-Y", "v1alpha3")],
            fetches.clone(),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-Y", "infra-system"));

        installer.validate().await.unwrap();
        // Core contract is resolved once and reused for every group member
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn queued_provider_joins_installed_management_group() {
        let installed = vec![Provider::new(
            "core-X",
            ProviderType::Core,
            "capi-system",
            "v1.0.0",
        )];
        let mut installer = installer_with(
            inventory_with(installed),
            &[("core-X", "v1alpha3"), ("infra-Y", "v1alpha4")],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(infra("infra-Y", "infra-system"));

        assert!(matches!(
            installer.validate().await.unwrap_err(),
            Error::ContractMismatch { .. }
        ));
    }

    #[tokio::test]
    async fn missing_core_provider_is_a_management_group_error() {
        let mut installer = installer_with(
            inventory_with(vec![]),
            &[("infra-Y", "v1alpha3")],
            Arc::new(AtomicUsize::new(0)),
        );
        installer.add(infra("infra-Y", "infra-system"));

        assert!(matches!(
            installer.validate().await.unwrap_err(),
            Error::ManagementGroup { .. }
        ));
    }

    #[tokio::test]
    async fn inventory_read_failure_aborts_validation() {
        let mut inventory = MockInventoryClient::new();
        inventory
            .expect_list()
            .returning(|| Err(Error::internal_with_context("inventory", "connection refused")));
        let mut installer = installer_with(inventory, &[], Arc::new(AtomicUsize::new(0)));
        installer.add(core("capi-system"));

        let err = installer.validate().await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_conflict());
        assert_eq!(err.context(), Some("inventory"));
    }

    #[tokio::test]
    async fn empty_queue_over_valid_inventory_validates() {
        let installed = vec![Provider::new(
            "core-X",
            ProviderType::Core,
            "capi-system",
            "v1.0.0",
        )];
        let fetches = Arc::new(AtomicUsize::new(0));
        let installer = installer_with(inventory_with(installed), &[], fetches.clone());

        installer.validate().await.unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // install
    // =========================================================================

    #[tokio::test]
    async fn install_empty_queue_returns_nothing() {
        let installer = Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(&[], Arc::new(AtomicUsize::new(0))),
            Arc::new(MockComponentsClient::new()),
            Arc::new(MockInventoryClient::new()),
        );
        assert!(installer.install().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validate_then_install_commits_in_queue_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut seq = Sequence::new();

        let mut components_client = MockComponentsClient::new();
        let mut inventory = MockInventoryClient::new();
        inventory
            .expect_list()
            .times(1)
            .returning(|| Ok(ProviderList::default()));

        for name in ["core-X", "infra-Y"] {
            let applied = order.clone();
            components_client
                .expect_create()
                .withf(move |c| c.name() == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |c| {
                    applied.lock().unwrap().push(format!("apply {}", c.name()));
                    Ok(())
                });
            let recorded = order.clone();
            inventory
                .expect_create()
                .withf(move |p| p.name == name)
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |p| {
                    recorded.lock().unwrap().push(format!("record {}", p.name));
                    Ok(())
                });
        }

        let mut installer = Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(
                &[("core-X", "v1alpha3"), ("infra-Y", "v1alpha3")],
                Arc::new(AtomicUsize::new(0)),
            ),
            Arc::new(components_client),
            Arc::new(inventory),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-Y", "infra-system"));

        installer.validate().await.unwrap();
        let installed = installer.install().await.unwrap();

        let names: Vec<&str> = installed.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["core-X", "infra-Y"]);
        assert_eq!(
            *order.lock().unwrap(),
            vec![
                "apply core-X",
                "record core-X",
                "apply infra-Y",
                "record infra-Y"
            ]
        );
    }

    #[tokio::test]
    async fn install_stops_at_first_apply_failure() {
        let mut components_client = MockComponentsClient::new();
        components_client
            .expect_create()
            .withf(|c| c.name() == "core-X")
            .times(1)
            .returning(|_| Ok(()));
        components_client
            .expect_create()
            .withf(|c| c.name() == "infra-Y")
            .times(1)
            .returning(|_| Err(Error::internal_with_context("apply", "webhook unavailable")));

        let mut inventory = MockInventoryClient::new();
        inventory
            .expect_create()
            .withf(|p| p.name == "core-X")
            .times(1)
            .returning(|_| Ok(()));

        let mut installer = Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(&[], Arc::new(AtomicUsize::new(0))),
            Arc::new(components_client),
            Arc::new(inventory),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-Y", "infra-system"));
        installer.add(infra("infra-Z", "infra-system"));

        let err = installer.install().await.unwrap_err();
        assert!(err.to_string().contains("webhook unavailable"));
        assert_eq!(installer.queue().len(), 3);
    }

    #[tokio::test]
    async fn install_stops_when_inventory_write_fails() {
        let mut components_client = MockComponentsClient::new();
        components_client
            .expect_create()
            .times(1)
            .returning(|_| Ok(()));
        let mut inventory = MockInventoryClient::new();
        inventory
            .expect_create()
            .times(1)
            .returning(|_| Err(Error::internal_with_context("inventory", "etcd timeout")));

        let mut installer = Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(&[], Arc::new(AtomicUsize::new(0))),
            Arc::new(components_client),
            Arc::new(inventory),
        );
        installer.add(core("capi-system"));
        installer.add(infra("infra-Y", "infra-system"));

        assert!(installer.install().await.is_err());
    }

    // =========================================================================
    // images
    // =========================================================================

    fn image_installer(units: Vec<Components>) -> Installer {
        let mut installer = Installer::new(
            Arc::new(permissive_config()),
            fake_repositories(&[], Arc::new(AtomicUsize::new(0))),
            Arc::new(MockComponentsClient::new()),
            Arc::new(MockInventoryClient::new()),
        );
        for unit in units {
            installer.add(unit);
        }
        installer
    }

    #[test]
    fn images_are_sorted_and_deduplicated() {
        let installer = image_installer(vec![
            components(
                "core-X",
                ProviderType::Core,
                "capi-system",
                "",
                &["registry/capi:v1", "registry/rbac-proxy:v0.4"],
            ),
            components(
                "infra-Y",
                ProviderType::Infrastructure,
                "infra-system",
                "",
                &["registry/rbac-proxy:v0.4", "docker.io/capd:v1"],
            ),
        ]);
        assert_eq!(
            installer.images(),
            vec![
                "docker.io/capd:v1",
                "registry/capi:v1",
                "registry/rbac-proxy:v0.4"
            ]
        );
    }

    #[test]
    fn images_ignore_queue_order() {
        let a = components("core-X", ProviderType::Core, "capi-system", "", &["b:1", "a:1"]);
        let b = components("infra-Y", ProviderType::Infrastructure, "ns", "", &["c:1", "a:1"]);

        let forward = image_installer(vec![a.clone(), b.clone()]).images();
        let backward = image_installer(vec![b, a]).images();
        assert_eq!(forward, backward);
        assert_eq!(forward, vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn images_of_empty_queue_is_empty() {
        assert!(image_installer(vec![]).images().is_empty());
    }

    #[tokio::test]
    async fn mock_installer_can_stand_in() {
        let mut installer = MockProviderInstaller::new();
        installer.expect_validate().returning(|| Ok(()));
        installer
            .expect_images()
            .returning(|| vec!["registry/capi:v1".to_string()]);

        assert!(installer.validate().await.is_ok());
        assert_eq!(installer.images(), vec!["registry/capi:v1"]);
    }
}
