//! Management groups
//!
//! A management group is a core provider plus every provider whose watch
//! scope overlaps it. Groups are derived fresh from a provider list each
//! time they are needed and never stored.

use capictl_common::{Error, Result};

use crate::provider::{Provider, ProviderList};

/// Providers rooted at one core provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagementGroup {
    /// The core provider of the group
    pub core_provider: Provider,
    /// All members, including the core provider
    pub providers: Vec<Provider>,
}

impl ManagementGroup {
    /// Whether the group contains the given instance
    pub fn contains(&self, provider: &Provider) -> bool {
        let instance = provider.instance_name();
        self.providers.iter().any(|p| p.instance_name() == instance)
    }
}

/// Partition of a provider list into management groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagementGroupList {
    groups: Vec<ManagementGroup>,
}

impl ManagementGroupList {
    /// Group containing the provider instance with this instance name
    pub fn find_by_provider_instance_name(&self, instance_name: &str) -> Option<&ManagementGroup> {
        self.groups.iter().find(|group| {
            group
                .providers
                .iter()
                .any(|p| p.instance_name() == instance_name)
        })
    }

    /// Iterate groups in core provider order
    pub fn iter(&self) -> std::slice::Iter<'_, ManagementGroup> {
        self.groups.iter()
    }

    /// Number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there are no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Derive management groups from a provider list.
///
/// Every provider must be watched by exactly one core provider. Fails when
/// the list has no core provider, or when a provider falls into zero or
/// several groups.
pub fn derive_management_groups(providers: &ProviderList) -> Result<ManagementGroupList> {
    let cores = providers.filter_core();
    if cores.is_empty() {
        return Err(Error::management_group(
            "there should be a core provider, found 0",
        ));
    }

    let groups: Vec<ManagementGroup> = cores
        .into_iter()
        .map(|core| ManagementGroup {
            core_provider: core.clone(),
            providers: providers
                .iter()
                .filter(|p| core.has_watching_overlap_with(p))
                .cloned()
                .collect(),
        })
        .collect();

    for provider in providers.iter() {
        let matches: Vec<&ManagementGroup> =
            groups.iter().filter(|g| g.contains(provider)).collect();
        match matches.len() {
            0 => {
                return Err(Error::management_group(format!(
                    "there are no core providers watching for the {} provider",
                    provider.instance_name()
                )))
            }
            1 => {}
            _ => {
                let cores: Vec<String> = matches
                    .iter()
                    .map(|g| g.core_provider.instance_name())
                    .collect();
                return Err(Error::management_group(format!(
                    "the {} provider is watched by more than one core provider: {}",
                    provider.instance_name(),
                    cores.join(", ")
                )));
            }
        }
    }

    Ok(ManagementGroupList { groups })
}
