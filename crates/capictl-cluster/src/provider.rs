//! Provider instances and provider lists
//!
//! A [`Provider`] is one deployed (or about to be deployed) provider
//! controller. The install engine reasons about lists of them: the current
//! inventory plus whatever is queued for install.

use serde::{Deserialize, Serialize};

/// Provider types supported by Cluster API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    /// Core provider (cluster-api); roots a management group
    #[serde(rename = "CoreProvider")]
    Core,
    /// Bootstrap provider (e.g. kubeadm)
    #[serde(rename = "BootstrapProvider")]
    Bootstrap,
    /// Control plane provider (e.g. kubeadm)
    #[serde(rename = "ControlPlaneProvider")]
    ControlPlane,
    /// Infrastructure provider (e.g. docker, aws)
    #[serde(rename = "InfrastructureProvider")]
    Infrastructure,
}

impl ProviderType {
    /// Prefix used in manifest labels and repository directory names
    fn label_prefix(self) -> &'static str {
        match self {
            ProviderType::Core => "",
            ProviderType::Bootstrap => "bootstrap-",
            ProviderType::ControlPlane => "control-plane-",
            ProviderType::Infrastructure => "infrastructure-",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Core => write!(f, "CoreProvider"),
            ProviderType::Bootstrap => write!(f, "BootstrapProvider"),
            ProviderType::ControlPlane => write!(f, "ControlPlaneProvider"),
            ProviderType::Infrastructure => write!(f, "InfrastructureProvider"),
        }
    }
}

/// Manifest label for a provider: its name prefixed by type
///
/// `("kubeadm", Bootstrap)` gives `bootstrap-kubeadm`; core providers keep
/// their bare name.
pub fn manifest_label(name: &str, provider_type: ProviderType) -> String {
    format!("{}{}", provider_type.label_prefix(), name)
}

/// One provider instance in a management cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    /// Provider name (e.g. "cluster-api", "docker")
    pub name: String,
    /// Namespace the provider controller is installed in
    pub namespace: String,
    /// Installed release (e.g. "v0.3.0")
    pub version: String,
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Namespace the controller watches; empty means all namespaces
    #[serde(default)]
    pub watched_namespace: String,
}

impl Provider {
    /// Create a provider watching all namespaces
    pub fn new(
        name: impl Into<String>,
        provider_type: ProviderType,
        namespace: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            version: version.into(),
            provider_type,
            watched_namespace: String::new(),
        }
    }

    /// Restrict the provider to a single watched namespace
    pub fn watching(mut self, namespace: impl Into<String>) -> Self {
        self.watched_namespace = namespace.into();
        self
    }

    /// Manifest label (see [`manifest_label`])
    pub fn manifest_label(&self) -> String {
        manifest_label(&self.name, self.provider_type)
    }

    /// Key uniquely identifying this instance: `{namespace}/{manifest label}`
    pub fn instance_name(&self) -> String {
        format!("{}/{}", self.namespace, self.manifest_label())
    }

    /// Whether this provider watches all namespaces
    pub fn watches_all_namespaces(&self) -> bool {
        self.watched_namespace.is_empty()
    }

    /// Whether two providers reconcile objects in a common namespace
    pub fn has_watching_overlap_with(&self, other: &Provider) -> bool {
        self.watches_all_namespaces()
            || other.watches_all_namespaces()
            || self.watched_namespace == other.watched_namespace
    }
}

/// Ordered collection of providers making up a management cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderList {
    /// Providers in inventory order
    pub items: Vec<Provider>,
}

impl ProviderList {
    /// Create a list from providers
    pub fn new(items: Vec<Provider>) -> Self {
        Self { items }
    }

    /// Instances of the provider with the given name
    pub fn filter_by_name(&self, name: &str) -> Vec<&Provider> {
        self.items.iter().filter(|p| p.name == name).collect()
    }

    /// Core provider instances
    pub fn filter_core(&self) -> Vec<&Provider> {
        self.items
            .iter()
            .filter(|p| p.provider_type == ProviderType::Core)
            .collect()
    }

    /// Append a provider
    pub fn push(&mut self, provider: Provider) {
        self.items.push(provider);
    }

    /// Iterate providers in order
    pub fn iter(&self) -> std::slice::Iter<'_, Provider> {
        self.items.iter()
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Provider> for ProviderList {
    fn from_iter<I: IntoIterator<Item = Provider>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_label_prefixes_by_type() {
        assert_eq!(manifest_label("cluster-api", ProviderType::Core), "cluster-api");
        assert_eq!(
            manifest_label("kubeadm", ProviderType::Bootstrap),
            "bootstrap-kubeadm"
        );
        assert_eq!(
            manifest_label("kubeadm", ProviderType::ControlPlane),
            "control-plane-kubeadm"
        );
        assert_eq!(
            manifest_label("docker", ProviderType::Infrastructure),
            "infrastructure-docker"
        );
    }

    #[test]
    fn instance_name_distinguishes_namespace_and_type() {
        let bootstrap = Provider::new("kubeadm", ProviderType::Bootstrap, "ns1", "v0.3.0");
        let control_plane =
            Provider::new("kubeadm", ProviderType::ControlPlane, "ns1", "v0.3.0");
        let other_ns = Provider::new("kubeadm", ProviderType::Bootstrap, "ns2", "v0.3.0");

        assert_eq!(bootstrap.instance_name(), "ns1/bootstrap-kubeadm");
        assert_ne!(bootstrap.instance_name(), control_plane.instance_name());
        assert_ne!(bootstrap.instance_name(), other_ns.instance_name());
    }

    #[test]
    fn watching_all_namespaces_overlaps_everything() {
        let all = Provider::new("docker", ProviderType::Infrastructure, "ns1", "v1.0.0");
        let scoped = Provider::new("docker", ProviderType::Infrastructure, "ns2", "v1.0.0")
            .watching("team-a");
        assert!(all.has_watching_overlap_with(&scoped));
        assert!(scoped.has_watching_overlap_with(&all));
    }

    #[test]
    fn distinct_watched_namespaces_do_not_overlap() {
        let a = Provider::new("docker", ProviderType::Infrastructure, "ns1", "v1.0.0")
            .watching("team-a");
        let b = Provider::new("docker", ProviderType::Infrastructure, "ns2", "v1.0.0")
            .watching("team-b");
        let c = Provider::new("docker", ProviderType::Infrastructure, "ns3", "v1.0.0")
            .watching("team-a");
        assert!(!a.has_watching_overlap_with(&b));
        assert!(a.has_watching_overlap_with(&c));
    }

    #[test]
    fn list_filters_by_name_and_core() {
        let list: ProviderList = vec![
            Provider::new("cluster-api", ProviderType::Core, "capi-system", "v0.3.0"),
            Provider::new("docker", ProviderType::Infrastructure, "ns1", "v0.3.0"),
            Provider::new("docker", ProviderType::Infrastructure, "ns2", "v0.3.0"),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 3);
        assert_eq!(list.filter_by_name("docker").len(), 2);
        assert!(list.filter_by_name("aws").is_empty());
        let core = list.filter_core();
        assert_eq!(core.len(), 1);
        assert_eq!(core[0].name, "cluster-api");
    }

    #[test]
    fn provider_type_uses_inventory_names() {
        let json = serde_json::to_value(ProviderType::ControlPlane).unwrap();
        assert_eq!(json, "ControlPlaneProvider");
        let parsed: ProviderType = serde_json::from_str("\"InfrastructureProvider\"").unwrap();
        assert_eq!(parsed, ProviderType::Infrastructure);
        assert_eq!(ProviderType::Core.to_string(), "CoreProvider");
    }
}
