use std::path::PathBuf;

use super::selector::NamespaceSelector;
use super::ConfigError;

/// Which pods a session may touch
///
/// The three name filters are comma-separated substring lists. An empty
/// string means "no restriction" for every filter; see the resolver for
/// how that falls out of the include filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetConfig {
    pub namespaces: NamespaceSelector,
    pub included_pod_names: String,
    pub included_node_names: String,
    pub excluded_pod_names: String,
}

impl TargetConfig {
    /// Build a target from raw request fields. Selector syntax errors and
    /// operators that cannot scope namespaces are rejected here, before any
    /// cycle runs.
    pub fn new(
        namespaces: &str,
        included_pod_names: impl Into<String>,
        included_node_names: impl Into<String>,
        excluded_pod_names: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let namespaces = NamespaceSelector::parse(namespaces)?;
        namespaces.ensure_supported()?;

        Ok(Self {
            namespaces,
            included_pod_names: included_pod_names.into(),
            included_node_names: included_node_names.into(),
            excluded_pod_names: excluded_pod_names.into(),
        })
    }
}

/// Connection parameters handed to the gateway factory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterConfig {
    /// Kubeconfig file; `None` means in-cluster or default discovery
    pub kubeconfig: Option<PathBuf>,
    /// API server URL overriding the one in the kubeconfig
    pub master: Option<String>,
    /// Health endpoint reported alongside the session
    pub healthcheck: String,
}

impl ClusterConfig {
    pub fn new(
        kubeconfig: Option<&str>,
        master: Option<&str>,
        healthcheck: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let kubeconfig = match kubeconfig.map(str::trim).filter(|s| !s.is_empty()) {
            Some(path) => {
                let expanded = shellexpand::full(path)
                    .map_err(|e| ConfigError::KubeconfigPath(path.to_string(), e.to_string()))?;
                Some(PathBuf::from(expanded.into_owned()))
            }
            None => None,
        };

        Ok(Self {
            kubeconfig,
            master: master
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
            healthcheck: healthcheck.into(),
        })
    }
}
