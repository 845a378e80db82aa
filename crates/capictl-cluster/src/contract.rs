//! Contract resolution
//!
//! The contract of a provider instance is the Cluster API version its
//! release implements, looked up from the release metadata in the
//! provider's repository.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use capictl_common::{Error, Result};

use crate::config::ConfigClient;
use crate::provider::Provider;
use crate::repository::{parse_semantic, RepositoryClientFactory};

/// Contracts resolved during one validation, keyed by instance name
pub type ContractCache = HashMap<String, String>;

/// Looks up provider contracts through their repositories
#[derive(Clone)]
pub struct ContractResolver {
    config: Arc<dyn ConfigClient>,
    repositories: RepositoryClientFactory,
}

impl ContractResolver {
    /// Create a resolver over the given configuration and repositories
    pub fn new(config: Arc<dyn ConfigClient>, repositories: RepositoryClientFactory) -> Self {
        Self {
            config,
            repositories,
        }
    }

    /// Contract implemented by `provider`'s release.
    ///
    /// Hits in `cache` return without I/O; misses fetch release metadata
    /// and store the result.
    pub async fn resolve(&self, cache: &mut ContractCache, provider: &Provider) -> Result<String> {
        let instance = provider.instance_name();
        if let Some(contract) = cache.get(&instance) {
            return Ok(contract.clone());
        }

        let provider_config = self
            .config
            .provider(&provider.name, provider.provider_type)?;
        let repository = (self.repositories)(&provider_config, &self.config.variables())?;
        let metadata = repository.metadata(&provider.version).await?;

        let version = parse_semantic(&provider.version).map_err(|e| Error::InvalidVersion {
            provider: instance.clone(),
            version: provider.version.clone(),
            message: e.to_string(),
        })?;
        let series = metadata
            .release_series_for(&version)
            .ok_or_else(|| Error::InvalidMetadata {
                provider: instance.clone(),
                version: provider.version.clone(),
            })?;

        debug!(
            provider = %instance,
            version = %provider.version,
            contract = %series.contract,
            "resolved provider contract"
        );
        cache.insert(instance, series.contract.clone());
        Ok(series.contract.clone())
    }
}
