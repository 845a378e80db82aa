//! Common types for capictl: errors, retry and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod retry;
pub mod yaml;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label marking every object installed by capictl
pub const CLUSTERCTL_LABEL: &str = "clusterctl.cluster.x-k8s.io";

/// Label carrying the provider manifest label on installed objects
pub const PROVIDER_LABEL: &str = "cluster.x-k8s.io/provider";
