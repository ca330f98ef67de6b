//! # Chaos pipeline
//!
//! One cycle is a straight line through four stages:
//!
//! ```text
//! resolver (candidates) -> sampler (kill-set) -> ordering -> terminator
//! ```
//!
//! [`ChaosRunner`] wires the stages together behind the [`CycleRunner`]
//! trait so the session scheduler never needs to know what a cycle does.

pub mod ordering;
pub mod resolver;
pub mod runner;
pub mod sampler;
pub mod terminator;

pub use ordering::{reorder, reorder_with};
pub use resolver::select_candidate_pods;
pub use runner::{ChaosRunner, CycleReport, CycleRunner};
pub use sampler::{kill_count, sample, sample_with};
pub use terminator::Terminator;

use std::fmt;

use thiserror::Error;

use crate::cluster::GatewayError;
use crate::config::SelectorError;

/// Failure to terminate a single pod
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TerminationError {
    #[error("failed to terminate pod {pod}: {source}")]
    Refused {
        pod: String,
        #[source]
        source: GatewayError,
    },

    #[error("pod {pod} was terminated but the event could not be recorded: {source}")]
    EventNotRecorded {
        pod: String,
        #[source]
        source: GatewayError,
    },
}

impl TerminationError {
    /// `namespace/name` of the pod that failed
    pub fn pod(&self) -> &str {
        match self {
            TerminationError::Refused { pod, .. } => pod,
            TerminationError::EventNotRecorded { pod, .. } => pod,
        }
    }
}

/// Every per-pod failure of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct BatchFailure {
    /// Pods the cycle tried to terminate
    pub attempted: usize,
    pub failures: Vec<TerminationError>,
}

impl BatchFailure {
    pub fn failed_pods(&self) -> Vec<&str> {
        self.failures.iter().map(TerminationError::pod).collect()
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} pods could not be terminated",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure)?;
        }
        Ok(())
    }
}

/// Errors that end a cycle early or summarize its failures
#[derive(Error, Debug)]
pub enum ChaosError {
    #[error("{0}")]
    Selector(#[from] SelectorError),

    #[error("{0}")]
    Gateway(#[from] GatewayError),

    /// Nothing matched the target; the scheduler just waits for the next tick
    #[error("pod not found")]
    NoCandidates,

    #[error("{0}")]
    PartialFailure(BatchFailure),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_failure_lists_every_pod() {
        let failure = BatchFailure {
            attempted: 3,
            failures: vec![
                TerminationError::Refused {
                    pod: "shop/web-1".to_string(),
                    source: GatewayError::Delete {
                        pod: "shop/web-1".to_string(),
                        message: "forbidden".to_string(),
                    },
                },
                TerminationError::EventNotRecorded {
                    pod: "shop/web-2".to_string(),
                    source: GatewayError::Event {
                        pod: "shop/web-2".to_string(),
                        message: "stale".to_string(),
                    },
                },
            ],
        };

        assert_eq!(failure.failed_pods(), vec!["shop/web-1", "shop/web-2"]);
        let text = ChaosError::PartialFailure(failure).to_string();
        assert!(text.starts_with("2 of 3 pods could not be terminated"));
        assert!(text.contains("shop/web-1"));
        assert!(text.contains("shop/web-2"));
    }

    #[test]
    fn test_no_candidates_message() {
        assert_eq!(ChaosError::NoCandidates.to_string(), "pod not found");
    }
}
