use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ClusterConfig;

/// Annotation carrying the pod deletion cost hint
pub const DELETION_COST_ANNOTATION: &str = "controller.kubernetes.io/pod-deletion-cost";

/// Errors surfaced by the cluster gateway
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("failed to connect to cluster: {0}")]
    Connect(String),

    #[error("failed to list pods: {0}")]
    List(String),

    #[error("failed to delete pod {pod}: {message}")]
    Delete { pod: String, message: String },

    #[error("eviction of pod {pod} refused: {message}")]
    Evict { pod: String, message: String },

    #[error("failed to record event for pod {pod}: {message}")]
    Event { pod: String, message: String },
}

/// Controller that owns a pod, as listed in its owner references
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    pub kind: String,
    pub name: String,
}

/// Read-only view of a pod, enough to decide its fate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub node_name: String,
    pub uid: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    /// Set once the pod is already terminating
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub annotations: BTreeMap<String, String>,
    pub owner: Option<OwnerRef>,
}

impl PodInfo {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            node_name: String::new(),
            uid: None,
            start_time: None,
            deletion_timestamp: None,
            annotations: BTreeMap::new(),
            owner: None,
        }
    }

    pub fn with_node(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }

    pub fn with_start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn terminating_since(mut self, at: DateTime<Utc>) -> Self {
        self.deletion_timestamp = Some(at);
        self
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    /// Deletion cost from the annotation; absent or unparsable is 0.
    pub fn deletion_cost(&self) -> i32 {
        self.annotations
            .get(DELETION_COST_ANNOTATION)
            .and_then(|v| v.trim().parse::<i32>().ok())
            .unwrap_or(0)
    }

    /// `namespace/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for PodInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Event type as understood by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// An event to attach to a pod
#[derive(Debug, Clone, PartialEq)]
pub struct PodEvent {
    pub kind: EventKind,
    pub reason: String,
    pub message: String,
}

impl PodEvent {
    /// The event recorded after a successful termination
    pub fn killed() -> Self {
        Self {
            kind: EventKind::Normal,
            reason: "killing".to_string(),
            message: "pod was killed by cascade.".to_string(),
        }
    }
}

// ============================================================================
// SBIO: Traits for abstraction (allows mocking in tests)
// ============================================================================

/// Authenticated access to the pod operations chaos needs
#[async_trait]
pub trait ClusterGateway: Send + Sync {
    /// List pods in `namespace`, or across all namespaces when `None`.
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, GatewayError>;

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError>;

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError>;

    async fn record_event(&self, pod: &PodInfo, event: &PodEvent) -> Result<(), GatewayError>;
}

/// Builds a gateway for the cluster a session targets
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    async fn connect(&self, config: &ClusterConfig)
        -> Result<Arc<dyn ClusterGateway>, GatewayError>;
}
