//! Cluster gateway backed by the Kubernetes API

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::api::{DeleteParams, EvictParams, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Api, Client, Config, ResourceExt};
use tracing::debug;

use super::gateway::{
    ClusterGateway, EventKind, GatewayError, GatewayFactory, OwnerRef, PodEvent, PodInfo,
};
use crate::config::ClusterConfig;

/// Component name events are reported under
pub const EVENT_REPORTER: &str = "cascade";

#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    reporter: Reporter,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: EVENT_REPORTER.to_string(),
                instance: None,
            },
        }
    }

    /// Build a client from the session's cluster parameters.
    ///
    /// An explicit kubeconfig wins; otherwise the usual discovery applies
    /// (`$KUBECONFIG`, `~/.kube/config`, then in-cluster service account).
    pub async fn connect(config: &ClusterConfig) -> Result<Self, GatewayError> {
        let mut kube_config = match &config.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    GatewayError::Connect(format!("reading {}: {}", path.display(), e))
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| GatewayError::Connect(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| GatewayError::Connect(e.to_string()))?,
        };

        if let Some(master) = &config.master {
            match master.parse() {
                Ok(uri) => kube_config.cluster_url = uri,
                Err(e) => {
                    return Err(GatewayError::Connect(format!(
                        "invalid master url '{}': {}",
                        master, e
                    )))
                }
            }
        }

        debug!("Connecting to cluster at {}", kube_config.cluster_url);
        let client =
            Client::try_from(kube_config).map_err(|e| GatewayError::Connect(e.to_string()))?;
        Ok(Self::new(client))
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Project a Kubernetes pod onto the fields chaos decisions use
pub fn pod_info(pod: &Pod) -> PodInfo {
    let meta = &pod.metadata;
    PodInfo {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        node_name: pod
            .spec
            .as_ref()
            .and_then(|s| s.node_name.clone())
            .unwrap_or_default(),
        uid: meta.uid.clone(),
        start_time: pod
            .status
            .as_ref()
            .and_then(|s| s.start_time.as_ref())
            .map(|t| t.0),
        deletion_timestamp: meta.deletion_timestamp.as_ref().map(|t| t.0),
        annotations: meta.annotations.clone().unwrap_or_default(),
        owner: meta
            .owner_references
            .as_ref()
            .and_then(|refs| refs.first())
            .map(|o| OwnerRef {
                kind: o.kind.clone(),
                name: o.name.clone(),
            }),
    }
}

/// Resolve the object reference an event is attached to. A pod without a
/// uid (stale or hand-built) cannot be referenced.
pub fn pod_reference(pod: &PodInfo) -> Result<ObjectReference, GatewayError> {
    let uid = pod.uid.clone().ok_or_else(|| GatewayError::Event {
        pod: pod.qualified_name(),
        message: "cannot resolve object reference: pod has no uid".to_string(),
    })?;

    Ok(ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Pod".to_string()),
        name: Some(pod.name.clone()),
        namespace: Some(pod.namespace.clone()),
        uid: Some(uid),
        ..ObjectReference::default()
    })
}

fn delete_params(grace_seconds: i64) -> DeleteParams {
    DeleteParams {
        grace_period_seconds: Some(grace_seconds.clamp(0, u32::MAX as i64) as u32),
        ..DeleteParams::default()
    }
}

#[async_trait]
impl ClusterGateway for KubeGateway {
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, GatewayError> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };

        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }

        let list = api
            .list(&params)
            .await
            .map_err(|e| GatewayError::List(e.to_string()))?;
        Ok(list.items.iter().map(pod_info).collect())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError> {
        self.pods(namespace)
            .delete(name, &delete_params(grace_seconds))
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Delete {
                pod: format!("{}/{}", namespace, name),
                message: e.to_string(),
            })
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError> {
        let params = EvictParams {
            delete_options: Some(delete_params(grace_seconds)),
            ..EvictParams::default()
        };

        self.pods(namespace)
            .evict(name, &params)
            .await
            .map(|_| ())
            .map_err(|e| GatewayError::Evict {
                pod: format!("{}/{}", namespace, name),
                message: e.to_string(),
            })
    }

    async fn record_event(&self, pod: &PodInfo, event: &PodEvent) -> Result<(), GatewayError> {
        let reference = pod_reference(pod)?;
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), reference);

        recorder
            .publish(Event {
                type_: match event.kind {
                    EventKind::Normal => EventType::Normal,
                    EventKind::Warning => EventType::Warning,
                },
                reason: event.reason.clone(),
                note: Some(event.message.clone()),
                action: "Terminate".to_string(),
                secondary: None,
            })
            .await
            .map_err(|e| GatewayError::Event {
                pod: pod.qualified_name(),
                message: e.to_string(),
            })
    }
}

/// Connects a [`KubeGateway`] per session
#[derive(Debug, Clone, Copy, Default)]
pub struct KubeGatewayFactory;

#[async_trait]
impl GatewayFactory for KubeGatewayFactory {
    async fn connect(
        &self,
        config: &ClusterConfig,
    ) -> Result<Arc<dyn ClusterGateway>, GatewayError> {
        let gateway = KubeGateway::connect(config).await?;
        Ok(Arc::new(gateway))
    }
}
