//! In-memory gateway that records every call (for tests and local demos)

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::gateway::{ClusterGateway, GatewayError, GatewayFactory, PodEvent, PodInfo};
use crate::config::ClusterConfig;

/// A call observed by [`MockGateway`]
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    List {
        namespace: Option<String>,
        label_selector: String,
    },
    Delete {
        pod: String,
        grace_seconds: i64,
    },
    Evict {
        pod: String,
        grace_seconds: i64,
    },
    Event {
        pod: String,
        reason: String,
    },
}

impl GatewayCall {
    /// True for calls that change cluster state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, GatewayCall::List { .. })
    }
}

/// Fake cluster: pods live in a vector, terminated pods disappear from it.
#[derive(Default)]
pub struct MockGateway {
    pods: Mutex<Vec<PodInfo>>,
    calls: Mutex<Vec<GatewayCall>>,
    failing_pods: Mutex<HashSet<String>>,
    fail_list: AtomicBool,
    fail_events: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockGateway {
    pub fn new(pods: Vec<PodInfo>) -> Self {
        Self {
            pods: Mutex::new(pods),
            ..Self::default()
        }
    }

    /// Termination calls against `namespace/name` will fail
    pub fn fail_pod(&self, qualified_name: &str) {
        lock(&self.failing_pods).insert(qualified_name.to_string());
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_events(&self, fail: bool) {
        self.fail_events.store(fail, Ordering::SeqCst);
    }

    pub fn set_pods(&self, pods: Vec<PodInfo>) {
        *lock(&self.pods) = pods;
    }

    pub fn pods(&self) -> Vec<PodInfo> {
        lock(&self.pods).clone()
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        lock(&self.calls).clone()
    }

    /// Number of delete, evict and event calls seen so far
    pub fn mutation_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| c.is_mutation()).count()
    }

    fn record(&self, call: GatewayCall) {
        lock(&self.calls).push(call);
    }

    fn terminate(&self, pod: &str) -> bool {
        if lock(&self.failing_pods).contains(pod) {
            return false;
        }
        lock(&self.pods).retain(|p| p.qualified_name() != pod);
        true
    }
}

#[async_trait]
impl ClusterGateway for MockGateway {
    async fn list_pods(
        &self,
        namespace: Option<&str>,
        label_selector: &str,
    ) -> Result<Vec<PodInfo>, GatewayError> {
        self.record(GatewayCall::List {
            namespace: namespace.map(String::from),
            label_selector: label_selector.to_string(),
        });

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(GatewayError::List("connection refused".to_string()));
        }

        Ok(lock(&self.pods)
            .iter()
            .filter(|p| namespace.map_or(true, |ns| p.namespace == ns))
            .cloned()
            .collect())
    }

    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError> {
        let pod = format!("{}/{}", namespace, name);
        self.record(GatewayCall::Delete {
            pod: pod.clone(),
            grace_seconds,
        });

        if self.terminate(&pod) {
            Ok(())
        } else {
            Err(GatewayError::Delete {
                pod,
                message: "forbidden".to_string(),
            })
        }
    }

    async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_seconds: i64,
    ) -> Result<(), GatewayError> {
        let pod = format!("{}/{}", namespace, name);
        self.record(GatewayCall::Evict {
            pod: pod.clone(),
            grace_seconds,
        });

        if self.terminate(&pod) {
            Ok(())
        } else {
            Err(GatewayError::Evict {
                pod,
                message: "Cannot evict pod as it would violate the pod's disruption budget"
                    .to_string(),
            })
        }
    }

    async fn record_event(&self, pod: &PodInfo, event: &PodEvent) -> Result<(), GatewayError> {
        self.record(GatewayCall::Event {
            pod: pod.qualified_name(),
            reason: event.reason.clone(),
        });

        if self.fail_events.load(Ordering::SeqCst) {
            return Err(GatewayError::Event {
                pod: pod.qualified_name(),
                message: "cannot resolve object reference".to_string(),
            });
        }
        Ok(())
    }
}

/// Hands out the same [`MockGateway`] for every session
#[derive(Clone)]
pub struct MockGatewayFactory {
    gateway: Arc<MockGateway>,
    refuse: bool,
}

impl MockGatewayFactory {
    pub fn new(gateway: Arc<MockGateway>) -> Self {
        Self {
            gateway,
            refuse: false,
        }
    }

    /// A factory whose every connection attempt fails
    pub fn refusing(gateway: Arc<MockGateway>) -> Self {
        Self {
            gateway,
            refuse: true,
        }
    }
}

#[async_trait]
impl GatewayFactory for MockGatewayFactory {
    async fn connect(
        &self,
        _config: &ClusterConfig,
    ) -> Result<Arc<dyn ClusterGateway>, GatewayError> {
        if self.refuse {
            return Err(GatewayError::Connect("no route to host".to_string()));
        }
        Ok(self.gateway.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_lists_by_namespace() {
        let gateway = MockGateway::new(vec![
            PodInfo::new("a", "p1"),
            PodInfo::new("b", "p2"),
        ]);

        let all = gateway.list_pods(None, "").await.unwrap();
        assert_eq!(all.len(), 2);

        let only_a = gateway.list_pods(Some("a"), "").await.unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].name, "p1");
    }

    #[tokio::test]
    async fn test_mock_delete_removes_pod() {
        let gateway = MockGateway::new(vec![PodInfo::new("a", "p1")]);
        gateway.delete_pod("a", "p1", 0).await.unwrap();
        assert!(gateway.pods().is_empty());
        assert_eq!(gateway.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_failures() {
        let gateway = MockGateway::new(vec![PodInfo::new("a", "p1")]);
        gateway.fail_pod("a/p1");
        assert!(gateway.evict_pod("a", "p1", 0).await.is_err());
        assert_eq!(gateway.pods().len(), 1);

        gateway.set_fail_list(true);
        assert!(gateway.list_pods(None, "").await.is_err());
    }
}
