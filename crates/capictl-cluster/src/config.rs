//! Provider configuration and substitution variables
//!
//! The config file is YAML with a `providers:` list and any number of
//! top-level string keys used as variables:
//!
//! ```yaml
//! providers:
//!   - name: docker
//!     url: /providers/infrastructure-docker
//!     type: InfrastructureProvider
//! DOCKER_POD_CIDRS: 192.168.0.0/16
//! ```
//!
//! Built-in providers are always available; a file entry with the same name
//! and type replaces the built-in one. Variables resolve from the process
//! environment first and the config file second.

use std::collections::BTreeMap;
use std::path::Path;

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::debug;

use capictl_common::{Error, Result};

use crate::provider::ProviderType;

/// Default root for local provider repositories
pub const DEFAULT_PROVIDERS_DIR: &str = "/providers";

/// Built-in (name, type) pairs, laid out under [`DEFAULT_PROVIDERS_DIR`]
const BUILTIN_PROVIDERS: &[(&str, ProviderType)] = &[
    ("cluster-api", ProviderType::Core),
    ("kubeadm", ProviderType::Bootstrap),
    ("kubeadm", ProviderType::ControlPlane),
    ("docker", ProviderType::Infrastructure),
    ("aws", ProviderType::Infrastructure),
    ("openstack", ProviderType::Infrastructure),
    ("proxmox", ProviderType::Infrastructure),
];

/// Where to find releases of one provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    /// Provider name
    pub name: String,
    /// Repository location (directory path or `file://` URL)
    pub url: String,
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
}

impl ProviderConfig {
    /// Manifest label of the configured provider
    pub fn manifest_label(&self) -> String {
        crate::provider::manifest_label(&self.name, self.provider_type)
    }
}

/// Substitution variables for provider manifests and repository clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Variables {
    values: BTreeMap<String, String>,
    use_env: bool,
}

impl Variables {
    /// Variables backed only by the given values
    pub fn from_values(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            use_env: false,
        }
    }

    /// Variables that consult the process environment before `values`
    pub fn with_env(values: BTreeMap<String, String>) -> Self {
        Self {
            values,
            use_env: true,
        }
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Option<String> {
        if self.use_env {
            if let Ok(value) = std::env::var(key) {
                return Some(value);
            }
        }
        self.values.get(key).cloned()
    }

    /// Set a file-level value (environment still wins when enabled)
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

/// Read access to provider configuration
#[cfg_attr(test, automock)]
pub trait ConfigClient: Send + Sync {
    /// Configuration for the provider with this name and type
    fn provider(&self, name: &str, provider_type: ProviderType) -> Result<ProviderConfig>;

    /// Global substitution variables
    fn variables(&self) -> Variables;
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    providers: Vec<ProviderConfig>,
    #[serde(flatten)]
    variables: BTreeMap<String, serde_yaml::Value>,
}

/// File-backed provider configuration
#[derive(Debug, Clone)]
pub struct ClusterctlConfig {
    providers: Vec<ProviderConfig>,
    variables: Variables,
}

impl Default for ClusterctlConfig {
    fn default() -> Self {
        Self::from_parts(Vec::new(), Variables::with_env(BTreeMap::new()))
    }
}

impl ClusterctlConfig {
    fn from_parts(user: Vec<ProviderConfig>, variables: Variables) -> Self {
        let mut providers: Vec<ProviderConfig> = BUILTIN_PROVIDERS
            .iter()
            .map(|(name, provider_type)| {
                let label = crate::provider::manifest_label(name, *provider_type);
                ProviderConfig {
                    name: name.to_string(),
                    url: format!("{}/{}", DEFAULT_PROVIDERS_DIR, label),
                    provider_type: *provider_type,
                }
            })
            .collect();

        for entry in user {
            match providers
                .iter_mut()
                .find(|p| p.name == entry.name && p.provider_type == entry.provider_type)
            {
                Some(existing) => *existing = entry,
                None => providers.push(entry),
            }
        }

        Self {
            providers,
            variables,
        }
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let raw: RawConfig = if yaml.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| Error::config(format!("invalid config: {}", e)))?
        };

        let mut values = BTreeMap::new();
        for (key, value) in raw.variables {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Bool(b) => b.to_string(),
                serde_yaml::Value::Number(n) => n.to_string(),
                _ => {
                    return Err(Error::config(format!(
                        "variable {:?} must be a scalar value",
                        key
                    )))
                }
            };
            values.insert(key, value);
        }

        debug!(
            providers = raw.providers.len(),
            variables = values.len(),
            "loaded provider configuration"
        );
        Ok(Self::from_parts(raw.providers, Variables::with_env(values)))
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&yaml)
    }

    /// All configured providers
    pub fn providers(&self) -> &[ProviderConfig] {
        &self.providers
    }
}

impl ConfigClient for ClusterctlConfig {
    fn provider(&self, name: &str, provider_type: ProviderType) -> Result<ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.name == name && p.provider_type == provider_type)
            .cloned()
            .ok_or_else(|| Error::unknown_provider(name))
    }

    fn variables(&self) -> Variables {
        self.variables.clone()
    }
}
