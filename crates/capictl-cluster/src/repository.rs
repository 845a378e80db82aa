//! Provider repositories and release metadata
//!
//! A repository holds the releases of one provider. Each release carries a
//! `metadata.yaml` mapping release series (major.minor) to the Cluster API
//! contract they implement:
//!
//! ```yaml
//! apiVersion: clusterctl.cluster.x-k8s.io/v1alpha3
//! kind: Metadata
//! releaseSeries:
//!   - major: 0
//!     minor: 3
//!     contract: v1alpha3
//! ```
//!
//! Local repositories are directories laid out as
//! `<root>/<version>/<file>`, the same shape as a pre-downloaded providers
//! tree.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use tracing::debug;

use capictl_common::{Error, Result};

use crate::config::{ProviderConfig, Variables};

/// File name of release metadata inside a release directory
pub const METADATA_FILE: &str = "metadata.yaml";

/// One release series and the contract it implements
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseSeries {
    /// Major version of the series
    pub major: u64,
    /// Minor version of the series
    pub minor: u64,
    /// Cluster API contract (e.g. "v1alpha3")
    pub contract: String,
}

/// Release metadata of a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// Known release series
    #[serde(default)]
    pub release_series: Vec<ReleaseSeries>,
}

impl Metadata {
    /// Parse `metadata.yaml` contents
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("Metadata", e.to_string()))
    }

    /// Release series matching the major and minor of `version`
    pub fn release_series_for(&self, version: &Version) -> Option<&ReleaseSeries> {
        self.release_series
            .iter()
            .find(|s| s.major == version.major && s.minor == version.minor)
    }
}

/// Parse a provider version (`v0.3.1` or `0.3.1`) into a semantic version
pub fn parse_semantic(version: &str) -> std::result::Result<Version, semver::Error> {
    let trimmed = version.trim();
    Version::parse(trimmed.strip_prefix('v').unwrap_or(trimmed))
}

/// Client for one provider repository
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    /// Release metadata for `version`
    async fn metadata(&self, version: &str) -> Result<Metadata>;
}

/// Builds a repository client for a configured provider
pub type RepositoryClientFactory =
    Arc<dyn Fn(&ProviderConfig, &Variables) -> Result<Box<dyn RepositoryClient>> + Send + Sync>;

/// Repository backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalRepository {
    provider: String,
    root: PathBuf,
}

impl LocalRepository {
    /// Open the repository configured for `config`
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let path = config.url.strip_prefix("file://").unwrap_or(&config.url);
        if path.is_empty() {
            return Err(Error::repository(
                config.manifest_label(),
                "repository url is empty",
            ));
        }
        if path.contains("://") {
            return Err(Error::repository(
                config.manifest_label(),
                format!("unsupported repository url {:?}", config.url),
            ));
        }
        Ok(Self {
            provider: config.manifest_label(),
            root: PathBuf::from(path),
        })
    }

    /// Reject names that would leave the repository root
    fn segment<'a>(&self, value: &'a str) -> Result<&'a str> {
        let mut components = Path::new(value).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(value),
            _ => Err(Error::repository(
                &self.provider,
                format!("invalid repository path segment {:?}", value),
            )),
        }
    }

    fn read(&self, version: &str, file: &str) -> Result<String> {
        let path = self
            .root
            .join(self.segment(version)?)
            .join(self.segment(file)?);
        debug!(provider = %self.provider, path = %path.display(), "reading repository file");
        std::fs::read_to_string(&path).map_err(|e| {
            Error::repository(
                &self.provider,
                format!("failed to read {}: {}", path.display(), e),
            )
        })
    }

    /// Raw contents of a components file for `version`
    pub fn components(&self, version: &str, file: &str) -> Result<String> {
        self.read(version, file)
    }
}

#[async_trait]
impl RepositoryClient for LocalRepository {
    async fn metadata(&self, version: &str) -> Result<Metadata> {
        Metadata::from_yaml(&self.read(version, METADATA_FILE)?)
    }
}

/// Factory producing [`LocalRepository`] clients
pub fn local_repository_factory() -> RepositoryClientFactory {
    Arc::new(|config: &ProviderConfig, _variables: &Variables| {
        let repo: Box<dyn RepositoryClient> = Box::new(LocalRepository::new(config)?);
        Ok(repo)
    })
}
