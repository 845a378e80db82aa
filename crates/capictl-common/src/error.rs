//! Error types for capictl
//!
//! Errors are structured with fields so an operator can act on them directly:
//! every validation failure names the components being installed, the
//! provider involved and the namespaces or contracts that conflict.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for capictl operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Two instances of the same provider targeting one namespace
    #[error(
        "installing provider {components:?} can lead to a non functioning management cluster: \
         there is already an instance of the {provider:?} provider installed in the {namespace:?} namespace"
    )]
    NamespaceCollision {
        /// Name of the components being installed
        components: String,
        /// Provider name
        provider: String,
        /// Namespace already holding an instance
        namespace: String,
    },

    /// Two instances of the same provider watching overlapping namespaces
    #[error(
        "installing provider {components:?} can lead to a non functioning management cluster: \
         the new instance of the {provider:?} provider is going to watch for objects in the namespace \
         {watched_namespace:?} that is already controlled by other providers"
    )]
    WatchOverlap {
        /// Name of the components being installed
        components: String,
        /// Provider name
        provider: String,
        /// Namespace watched by the new instance (empty means all namespaces)
        watched_namespace: String,
    },

    /// Providers do not combine into valid management groups
    #[error("invalid management cluster: {message}")]
    ManagementGroup {
        /// Description of the structural problem
        message: String,
    },

    /// A provider supports a different contract than its management group
    #[error(
        "installing provider {components:?} can lead to a non functioning management cluster: \
         the target version for the provider supports the {provider_contract} API Version of \
         Cluster API (contract), while the management group is using {group_contract}"
    )]
    ContractMismatch {
        /// Name of the components being installed
        components: String,
        /// Contract supported by the provider release
        provider_contract: String,
        /// Contract of the management group core provider
        group_contract: String,
    },

    /// Provider has no configuration entry
    #[error("failed to get configuration for the {name:?} provider")]
    UnknownProvider {
        /// Provider name that was looked up
        name: String,
    },

    /// Provider version is not a semantic version
    #[error("failed to parse version {version:?} for the {provider} provider: {message}")]
    InvalidVersion {
        /// Provider instance name
        provider: String,
        /// The unparseable version string
        version: String,
        /// Parser message
        message: String,
    },

    /// Release metadata has no series for the provider version
    #[error(
        "invalid provider metadata: version {version} for the provider {provider} \
         does not match any release series"
    )]
    InvalidMetadata {
        /// Provider instance name
        provider: String,
        /// Version that had no matching series
        version: String,
    },

    /// Provider repository could not be read
    #[error("repository error [{provider}]: {message}")]
    Repository {
        /// Provider whose repository failed
        provider: String,
        /// Description of what failed
        message: String,
    },

    /// Configuration file could not be read or parsed
    #[error("config error: {message}")]
    Config {
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "api-discovery", "inventory")
        context: String,
    },
}

impl Error {
    /// Create a management group error with the given message
    pub fn management_group(msg: impl Into<String>) -> Self {
        Self::ManagementGroup {
            message: msg.into(),
        }
    }

    /// Create an unknown provider error
    pub fn unknown_provider(name: impl Into<String>) -> Self {
        Self::UnknownProvider { name: name.into() }
    }

    /// Create a repository error for a provider
    pub fn repository(provider: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Repository {
            provider: provider.into(),
            message: msg.into(),
        }
    }

    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error for a specific resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with default context
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is a consistency conflict found during validation.
    ///
    /// Conflicts need the install queue or the cluster changed before a
    /// re-run can succeed; everything else is a lookup or I/O failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::NamespaceCollision { .. }
                | Error::WatchOverlap { .. }
                | Error::ManagementGroup { .. }
                | Error::ContractMismatch { .. }
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Repository { provider, .. } => Some(provider),
            _ => None,
        }
    }
}
