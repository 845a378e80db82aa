//! Cluster API provider installation
//!
//! This crate provides:
//! - Provider and inventory types describing what is installed in a management cluster
//! - Components loading and variable substitution for provider releases
//! - Contract resolution from provider release metadata
//! - Installer that queues, validates and installs providers, refusing
//!   installs that would leave the management cluster inconsistent

pub mod client;
pub mod components;
pub mod config;
pub mod contract;
pub mod installer;
pub mod inventory;
pub mod management_group;
pub mod provider;
pub mod repository;

// Re-export client types
pub use client::{ComponentsClient, KubeComponentsClient};

#[cfg(test)]
pub use client::MockComponentsClient;

pub use components::{Components, ComponentsOptions};

pub use config::{ClusterctlConfig, ConfigClient, ProviderConfig, Variables};

#[cfg(test)]
pub use config::MockConfigClient;

pub use contract::{ContractCache, ContractResolver};

// Re-export installer types
pub use installer::{Installer, ProviderInstaller};

#[cfg(test)]
pub use installer::MockProviderInstaller;

pub use inventory::{InventoryClient, KubeInventoryClient};

#[cfg(test)]
pub use inventory::MockInventoryClient;

pub use management_group::{derive_management_groups, ManagementGroup, ManagementGroupList};
pub use provider::{manifest_label, Provider, ProviderList, ProviderType};
pub use repository::{
    local_repository_factory, LocalRepository, Metadata, ReleaseSeries, RepositoryClient,
    RepositoryClientFactory,
};
