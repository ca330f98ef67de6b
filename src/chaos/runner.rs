use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::ordering::reorder;
use super::resolver::select_candidate_pods;
use super::sampler::sample;
use super::terminator::Terminator;
use super::ChaosError;
use crate::cluster::ClusterGateway;
use crate::config::{RuntimeConfig, TargetConfig};
use crate::logbridge::LogSink;

/// What one cycle did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub candidates: usize,
    pub selected: usize,
    pub terminated: usize,
}

/// A unit of chaos run once per scheduler tick
#[async_trait]
pub trait CycleRunner: Send + Sync {
    /// Run one cycle, writing progress to `sink`.
    ///
    /// `cancel` is the session token. The scheduler never starts a cycle
    /// after it fires; a cycle already running may finish.
    async fn run_cycle(
        &self,
        cancel: &CancellationToken,
        sink: &LogSink,
    ) -> Result<CycleReport, ChaosError>;
}

/// Pod-killing cycle: resolve, sample, reorder, terminate
pub struct ChaosRunner {
    gateway: Arc<dyn ClusterGateway>,
    terminator: Terminator,
    target: TargetConfig,
    runtime: RuntimeConfig,
    scenario: String,
}

impl ChaosRunner {
    pub fn new(
        gateway: Arc<dyn ClusterGateway>,
        target: TargetConfig,
        runtime: RuntimeConfig,
        scenario: impl Into<String>,
    ) -> Self {
        Self {
            terminator: Terminator::new(gateway.clone()),
            gateway,
            target,
            runtime,
            scenario: scenario.into(),
        }
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }
}

#[async_trait]
impl CycleRunner for ChaosRunner {
    async fn run_cycle(
        &self,
        _cancel: &CancellationToken,
        sink: &LogSink,
    ) -> Result<CycleReport, ChaosError> {
        sink.info(format!("Chaos Session Triggered (session {})", sink.session()));
        sink.info(format!("Chaos Scenario: {}", self.scenario));

        sink.info("Preparing Candidate Pods");
        let candidates = match select_candidate_pods(self.gateway.as_ref(), &self.target).await {
            Ok(pods) => pods,
            Err(ChaosError::NoCandidates) => return Err(ChaosError::NoCandidates),
            Err(e) => {
                sink.error("Error occured while preparing Candidate Pods");
                return Err(e);
            }
        };
        sink.info(format!("Filtering down to {} Candidates", candidates.len()));
        let candidate_count = candidates.len();

        sink.info("Sampling from a list of candidate pods");
        let mut victims = sample(candidates, self.runtime.ratio);

        sink.info("Reordering the Pods");
        reorder(&mut victims, self.runtime.order);

        let terminated = self
            .terminator
            .execute_cycle(&victims, &self.runtime, sink)
            .await?;

        Ok(CycleReport {
            candidates: candidate_count,
            selected: victims.len(),
            terminated,
        })
    }
}
