pub mod runtime;
pub mod scenario;
pub mod selector;
pub mod target;

pub use runtime::{ExecutionMode, Ordering, RuntimeConfig, RuntimeDefaults};
pub use scenario::{
    plan_scenario, ClusterSpec, RuntimeSpec, ScenarioDocument, ScenarioMeta, ScenarioPlan,
    TargetSpec,
};
pub use selector::{NamespaceSelector, Operator, Requirement, SelectorError};
pub use target::{ClusterConfig, TargetConfig};

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors raised while turning raw scenario fields into typed configs
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Selector(#[from] SelectorError),

    #[error("invalid interval '{value}': {reason}")]
    InvalidInterval { value: String, reason: String },

    #[error("invalid grace '{value}': {reason}")]
    InvalidGrace { value: String, reason: String },

    #[error("invalid ratio '{value}': {reason}")]
    InvalidRatio { value: String, reason: String },

    #[error("invalid kubeconfig path '{0}': {1}")]
    KubeconfigPath(String, String),

    #[error("scenario document #{0} has no id")]
    MissingScenarioId(usize),
}

// ============================================================================
// SBIO: Pure parsing plus a thin I/O wrapper
// ============================================================================

/// Parse one or more `---`-separated scenario documents.
pub fn parse_scenario_documents(content: &str) -> Result<Vec<ScenarioDocument>, ConfigError> {
    let mut documents = Vec::new();
    for (index, de) in serde_yaml::Deserializer::from_str(content).enumerate() {
        let value = serde_yaml::Value::deserialize(de)?;
        if value.is_null() {
            continue;
        }
        let doc: ScenarioDocument = serde_yaml::from_value(value)?;
        if doc.scenario.id.trim().is_empty() {
            return Err(ConfigError::MissingScenarioId(index + 1));
        }
        documents.push(doc);
    }
    Ok(documents)
}

/// Load scenario documents from disk.
pub fn load_scenario_file(path: &Path) -> Result<Vec<ScenarioDocument>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_scenario_documents(&content)
}
