use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::{plan_scenario, RuntimeDefaults, ScenarioDocument};

#[derive(Parser, Debug)]
#[command(name = "cascade")]
#[command(about = "Run pod-killing chaos sessions against Kubernetes and stream their logs")]
#[command(version)]
pub struct Args {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Address to bind the HTTP server to
    #[arg(long, value_name = "ADDR", env = "CASCADE_BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Port for the HTTP server
    #[arg(short, long, value_name = "PORT", env = "CASCADE_PORT", default_value = "8080")]
    pub port: u16,

    /// Path to a .env file with runtime defaults
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// YAML file of scenarios to register at startup (multi-document)
    #[arg(long, value_name = "FILE", env = "CASCADE_SCENARIOS")]
    pub scenarios: Option<PathBuf>,

    /// Log entries buffered per session before new ones are dropped
    #[arg(long, value_name = "N", default_value = "100")]
    pub log_buffer: usize,

    /// Validate the scenarios file, print what it would run, and exit
    #[arg(long, requires = "scenarios")]
    pub dry_run: bool,
}

impl Args {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

/// Describe each scenario as it would be planned with the given defaults.
/// Documents that fail to plan are listed with their error instead.
pub fn format_scenarios(documents: &[ScenarioDocument], defaults: &RuntimeDefaults) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "cascade v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Scenarios ({}):\n", documents.len()));

    for doc in documents {
        output.push_str(&format!("\n  [{}]", doc.scenario.id));
        if !doc.scenario.description.is_empty() {
            output.push_str(&format!(" {}", doc.scenario.description));
        }
        output.push('\n');

        let plan = match plan_scenario(&doc.target, &doc.runtime, &doc.cluster, defaults) {
            Ok(plan) => plan,
            Err(e) => {
                output.push_str(&format!("    INVALID: {}\n", e));
                continue;
            }
        };

        let namespaces = if doc.target.namespaces.trim().is_empty() {
            "(all)"
        } else {
            doc.target.namespaces.trim()
        };
        output.push_str(&format!("    Namespaces: {}\n", namespaces));
        if !doc.target.included_pod_names.is_empty() {
            output.push_str(&format!("    Pods: {}\n", doc.target.included_pod_names));
        }
        if !doc.target.included_node_names.is_empty() {
            output.push_str(&format!("    Nodes: {}\n", doc.target.included_node_names));
        }
        if !doc.target.excluded_pod_names.is_empty() {
            output.push_str(&format!("    Excluding: {}\n", doc.target.excluded_pod_names));
        }

        let runtime = &plan.runtime;
        output.push_str(&format!(
            "    Every {} kill {:.0}% ({}, {} first, grace {}s)\n",
            humantime::format_duration(runtime.interval),
            runtime.ratio * 100.0,
            runtime.mode,
            runtime.order,
            runtime.grace
        ));

        for warning in &plan.warnings {
            output.push_str(&format!("    Warning: {}\n", warning));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_scenario_documents;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["cascade"]);
        assert_eq!(args.port, 8080);
        assert_eq!(args.log_buffer, 100);
        assert_eq!(args.listen_addr(), "0.0.0.0:8080");
        assert!(!args.dry_run);
    }

    #[test]
    fn test_dry_run_requires_scenarios() {
        assert!(Args::try_parse_from(["cascade", "--dry-run"]).is_err());
        let args =
            Args::try_parse_from(["cascade", "--dry-run", "--scenarios", "s.yaml", "-vv"]).unwrap();
        assert!(args.dry_run);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_format_scenarios() {
        let docs = parse_scenario_documents(
            r#"
scenario:
  id: checkout
  description: kill half the shop
target:
  namespaces: shop
  excludedPodNames: db
runtime:
  interval: 30s
  ratio: 0.5
  mode: dry-run
  ordering: sideways
---
scenario:
  id: broken
runtime:
  ratio: lots
"#,
        )
        .unwrap();

        let output = format_scenarios(&docs, &RuntimeDefaults::default());
        assert!(output.contains("Scenarios (2):"));
        assert!(output.contains("[checkout] kill half the shop"));
        assert!(output.contains("Namespaces: shop"));
        assert!(output.contains("Excluding: db"));
        assert!(output.contains("Every 30s kill 50%"));
        assert!(output.contains("Warning:"));
        assert!(output.contains("[broken]"));
        assert!(output.contains("INVALID: invalid ratio 'lots'"));
    }
}
