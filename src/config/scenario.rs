//! Raw scenario fields as they arrive from requests and YAML documents,
//! and their conversion into typed configs.

use serde::{Deserialize, Deserializer, Serialize};

use super::runtime::{
    parse_grace, parse_interval, parse_ratio, ExecutionMode, Ordering, RuntimeConfig,
    RuntimeDefaults,
};
use super::target::{ClusterConfig, TargetConfig};
use super::ConfigError;

/// Target section of a scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TargetSpec {
    pub namespaces: String,
    pub included_pod_names: String,
    pub included_node_names: String,
    pub excluded_pod_names: String,
}

/// Runtime section of a scenario; every field is optional text
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSpec {
    #[serde(deserialize_with = "scalar_string")]
    pub interval: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub grace: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    pub ratio: Option<String>,
    pub mode: Option<String>,
    pub ordering: Option<String>,
}

/// Cluster connection section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterSpec {
    pub kubeconfig: Option<String>,
    pub master: Option<String>,
    pub healthcheck: Option<String>,
}

/// Identity of an authored scenario
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioMeta {
    pub id: String,
    pub description: String,
}

/// A scenario document as authored in YAML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioDocument {
    pub scenario: ScenarioMeta,
    pub target: TargetSpec,
    pub runtime: RuntimeSpec,
    pub cluster: ClusterSpec,
}

/// Typed configuration for one session plus non-fatal parse notes
#[derive(Debug, Clone)]
pub struct ScenarioPlan {
    pub target: TargetConfig,
    pub runtime: RuntimeConfig,
    pub cluster: ClusterConfig,
    /// Unknown mode/ordering names that fell back to a default
    pub warnings: Vec<String>,
}

impl TargetSpec {
    pub fn build(&self) -> Result<TargetConfig, ConfigError> {
        TargetConfig::new(
            &self.namespaces,
            self.included_pod_names.clone(),
            self.included_node_names.clone(),
            self.excluded_pod_names.clone(),
        )
    }
}

impl RuntimeSpec {
    /// Resolve the runtime section, filling blanks from `defaults`.
    ///
    /// Unknown mode or ordering names do not fail the request: they fall
    /// back to `delete` / `random` and a warning is returned so the session
    /// can surface it to the client.
    pub fn build(
        &self,
        defaults: &RuntimeDefaults,
    ) -> Result<(RuntimeConfig, Vec<String>), ConfigError> {
        let interval = parse_interval(or_default(&self.interval, &defaults.interval))?;
        let grace = parse_grace(or_default(&self.grace, &defaults.grace))?;
        let ratio = parse_ratio(or_default(&self.ratio, &defaults.ratio))?;

        let mut warnings = Vec::new();

        let mode_name = or_default(&self.mode, &defaults.mode);
        let mode = ExecutionMode::from_name(mode_name).unwrap_or_else(|| {
            warnings.push(format!(
                "unknown execution mode '{}', falling back to {}",
                mode_name,
                ExecutionMode::Delete
            ));
            ExecutionMode::Delete
        });

        let order_name = or_default(&self.ordering, &defaults.ordering);
        let order = Ordering::from_name(order_name).unwrap_or_else(|| {
            warnings.push(format!(
                "unknown ordering '{}', falling back to {}",
                order_name,
                Ordering::Random
            ));
            Ordering::Random
        });

        Ok((
            RuntimeConfig {
                interval,
                grace,
                ratio,
                mode,
                order,
            },
            warnings,
        ))
    }
}

impl ClusterSpec {
    pub fn build(&self, defaults: &RuntimeDefaults) -> Result<ClusterConfig, ConfigError> {
        ClusterConfig::new(
            self.kubeconfig.as_deref(),
            self.master.as_deref(),
            or_default(&self.healthcheck, &defaults.healthcheck),
        )
    }
}

/// Build every typed config for a session in one step.
pub fn plan_scenario(
    target: &TargetSpec,
    runtime: &RuntimeSpec,
    cluster: &ClusterSpec,
    defaults: &RuntimeDefaults,
) -> Result<ScenarioPlan, ConfigError> {
    let target = target.build()?;
    let (runtime, warnings) = runtime.build(defaults)?;
    let cluster = cluster.build(defaults)?;

    Ok(ScenarioPlan {
        target,
        runtime,
        cluster,
        warnings,
    })
}

fn or_default<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

/// Accept `ratio: 0.5` as readily as `ratio: "0.5"`.
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<RawScalar>::deserialize(deserializer)?;
    Ok(raw.map(|r| match r {
        RawScalar::Text(s) => s,
        RawScalar::Integer(i) => i.to_string(),
        RawScalar::Float(f) => f.to_string(),
    }))
}
