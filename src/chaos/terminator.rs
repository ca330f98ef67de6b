use std::sync::Arc;

use super::{BatchFailure, ChaosError, TerminationError};
use crate::cluster::{ClusterGateway, PodEvent, PodInfo};
use crate::config::{ExecutionMode, RuntimeConfig};
use crate::logbridge::LogSink;

/// Applies the execution mode to each pod of a kill-set
#[derive(Clone)]
pub struct Terminator {
    gateway: Arc<dyn ClusterGateway>,
}

impl Terminator {
    pub fn new(gateway: Arc<dyn ClusterGateway>) -> Self {
        Self { gateway }
    }

    /// Terminate one pod and record a `killing` event against it.
    ///
    /// Mode and grace period come from `runtime`. Dry runs make no cluster
    /// call and wait out the grace period instead.
    pub async fn terminate(
        &self,
        pod: &PodInfo,
        runtime: &RuntimeConfig,
        sink: &LogSink,
    ) -> Result<(), TerminationError> {
        let grace_seconds = runtime.grace;
        let outcome = match runtime.mode {
            ExecutionMode::DryRun => {
                sink.info(format!("Terminating {} as per Dry Run Strategy", pod));
                tokio::time::sleep(runtime.grace_period()).await;
                return Ok(());
            }
            ExecutionMode::Evict => {
                sink.info(format!("Terminating {} as per Eviction Strategy", pod));
                self.gateway
                    .evict_pod(&pod.namespace, &pod.name, grace_seconds)
                    .await
            }
            ExecutionMode::Delete => {
                sink.info(format!("Terminating {} as per Deletion Strategy", pod));
                self.gateway
                    .delete_pod(&pod.namespace, &pod.name, grace_seconds)
                    .await
            }
        };

        outcome.map_err(|source| TerminationError::Refused {
            pod: pod.qualified_name(),
            source,
        })?;

        self.gateway
            .record_event(pod, &PodEvent::killed())
            .await
            .map_err(|source| TerminationError::EventNotRecorded {
                pod: pod.qualified_name(),
                source,
            })
    }

    /// Terminate the kill-set in order.
    ///
    /// A failure never stops the batch: it is logged and collected, and the
    /// collected failures come back as [`ChaosError::PartialFailure`].
    /// Returns the number of pods terminated.
    pub async fn execute_cycle(
        &self,
        pods: &[PodInfo],
        runtime: &RuntimeConfig,
        sink: &LogSink,
    ) -> Result<usize, ChaosError> {
        let mut failures = Vec::new();

        for pod in pods {
            if let Err(e) = self.terminate(pod, runtime, sink).await {
                sink.error(format!("failed to delete pod {}: {}", pod.name, e));
                failures.push(e);
            }
        }

        if failures.is_empty() {
            return Ok(pods.len());
        }
        Err(ChaosError::PartialFailure(BatchFailure {
            attempted: pods.len(),
            failures,
        }))
    }
}
