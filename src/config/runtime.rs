use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Environment variables consulted for runtime defaults
pub mod env {
    pub const RUNTIME_INTERVAL: &str = "RUNTIME_INTERVAL";
    pub const RATIO: &str = "RATIO";
    pub const MODE: &str = "MODE";
    pub const GRACE: &str = "GRACE";
    pub const ORDERING: &str = "ORDERING";
    pub const HEALTH_CHECK_PORT: &str = "HEALTH_CHECK_PORT";
}

pub const DEFAULT_INTERVAL: &str = "10m";
pub const DEFAULT_RATIO: &str = "0.5";
pub const DEFAULT_MODE: &str = "delete";
pub const DEFAULT_GRACE: &str = "60";
pub const DEFAULT_ORDERING: &str = "random";
pub const DEFAULT_HEALTH_CHECK: &str = ":8080";

/// How a selected pod is terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Direct deletion with the configured grace period
    #[default]
    Delete,
    /// No cluster call; the grace period is waited out instead
    DryRun,
    /// Eviction API, subject to disruption budgets
    Evict,
}

impl ExecutionMode {
    /// Look up a mode by its wire name (`delete`, `dry-run`, `evict`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "delete" => Some(ExecutionMode::Delete),
            "dry-run" | "dryrun" => Some(ExecutionMode::DryRun),
            "evict" => Some(ExecutionMode::Evict),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionMode::Delete => "delete",
            ExecutionMode::DryRun => "dry-run",
            ExecutionMode::Evict => "evict",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Termination priority applied to the sampled kill-set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ordering {
    #[default]
    Random,
    Default,
    Cost,
    Youngest,
    Oldest,
}

impl Ordering {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "random" => Some(Ordering::Random),
            "default" => Some(Ordering::Default),
            "cost" => Some(Ordering::Cost),
            "youngest" => Some(Ordering::Youngest),
            "oldest" => Some(Ordering::Oldest),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ordering::Random => "random",
            Ordering::Default => "default",
            Ordering::Cost => "cost",
            Ordering::Youngest => "youngest",
            Ordering::Oldest => "oldest",
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution policy for one session
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Time between the start of consecutive cycles
    pub interval: Duration,
    /// Seconds a pod is given before hard termination
    pub grace: i64,
    /// Fraction of candidates killed per cycle, expected in `[0, 1]`
    pub ratio: f64,
    pub mode: ExecutionMode,
    pub order: Ordering,
}

impl RuntimeConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace.max(0) as u64)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(600),
            grace: 60,
            ratio: 0.5,
            mode: ExecutionMode::Delete,
            order: Ordering::Random,
        }
    }
}

/// Fallback values for runtime fields left empty by a request
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeDefaults {
    pub interval: String,
    pub ratio: String,
    pub mode: String,
    pub grace: String,
    pub ordering: String,
    pub healthcheck: String,
}

impl Default for RuntimeDefaults {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL.to_string(),
            ratio: DEFAULT_RATIO.to_string(),
            mode: DEFAULT_MODE.to_string(),
            grace: DEFAULT_GRACE.to_string(),
            ordering: DEFAULT_ORDERING.to_string(),
            healthcheck: DEFAULT_HEALTH_CHECK.to_string(),
        }
    }
}

impl RuntimeDefaults {
    /// Read defaults from the process environment, falling back to the
    /// built-in values for unset or empty variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeDefaults::from_env`] with an injectable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let builtin = Self::default();
        let pick = |key: &str, fallback: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
        };

        Self {
            interval: pick(env::RUNTIME_INTERVAL, builtin.interval),
            ratio: pick(env::RATIO, builtin.ratio),
            mode: pick(env::MODE, builtin.mode),
            grace: pick(env::GRACE, builtin.grace),
            ordering: pick(env::ORDERING, builtin.ordering),
            healthcheck: pick(env::HEALTH_CHECK_PORT, builtin.healthcheck),
        }
    }
}

// ============================================================================
// SBIO: Pure field parsers
// ============================================================================

/// Parse a cycle interval such as `90s`, `10m` or `1h 30m`. Zero is rejected.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let interval =
        humantime::parse_duration(value.trim()).map_err(|e| ConfigError::InvalidInterval {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            value: value.to_string(),
            reason: "interval must be greater than zero".to_string(),
        });
    }
    Ok(interval)
}

/// Parse a grace period given either as whole seconds or as a duration.
pub fn parse_grace(value: &str) -> Result<i64, ConfigError> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        if seconds < 0 {
            return Err(ConfigError::InvalidGrace {
                value: value.to_string(),
                reason: "grace period cannot be negative".to_string(),
            });
        }
        return Ok(seconds);
    }

    let grace = humantime::parse_duration(value).map_err(|e| ConfigError::InvalidGrace {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    i64::try_from(grace.as_secs()).map_err(|_| ConfigError::InvalidGrace {
        value: value.to_string(),
        reason: "grace period is too long".to_string(),
    })
}

/// Parse a kill ratio. Out-of-range values are kept and clamped by the
/// sampler; non-numbers and non-finite values are rejected.
pub fn parse_ratio(value: &str) -> Result<f64, ConfigError> {
    let ratio = value
        .trim()
        .parse::<f64>()
        .map_err(|e| ConfigError::InvalidRatio {
            value: value.to_string(),
            reason: e.to_string(),
        })?;
    if !ratio.is_finite() {
        return Err(ConfigError::InvalidRatio {
            value: value.to_string(),
            reason: "ratio must be a finite number".to_string(),
        });
    }
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(ExecutionMode::from_name("delete"), Some(ExecutionMode::Delete));
        assert_eq!(ExecutionMode::from_name("dry-run"), Some(ExecutionMode::DryRun));
        assert_eq!(ExecutionMode::from_name("EVICT"), Some(ExecutionMode::Evict));
        assert_eq!(ExecutionMode::from_name("nuke"), None);
        assert_eq!(ExecutionMode::DryRun.to_string(), "dry-run");
    }

    #[test]
    fn test_ordering_names() {
        for ordering in [
            Ordering::Random,
            Ordering::Default,
            Ordering::Cost,
            Ordering::Youngest,
            Ordering::Oldest,
        ] {
            assert_eq!(Ordering::from_name(ordering.name()), Some(ordering));
        }
        assert_eq!(Ordering::from_name("alphabetical"), None);
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_interval("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_interval("1h 30m").unwrap(), Duration::from_secs(5400));
        assert!(matches!(
            parse_interval("soon"),
            Err(ConfigError::InvalidInterval { .. })
        ));
        assert!(matches!(
            parse_interval("0s"),
            Err(ConfigError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn test_parse_grace() {
        assert_eq!(parse_grace("30").unwrap(), 30);
        assert_eq!(parse_grace("1m").unwrap(), 60);
        assert_eq!(parse_grace("0").unwrap(), 0);
        assert!(matches!(parse_grace("-5"), Err(ConfigError::InvalidGrace { .. })));
        assert!(matches!(parse_grace("later"), Err(ConfigError::InvalidGrace { .. })));
    }

    #[test]
    fn test_parse_grace_rejects_overflowing_duration() {
        let err = parse_grace("300000000000y").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidGrace { .. }));
        assert!(err.to_string().contains("too long"));
    }

    #[test]
    fn test_parse_ratio() {
        assert_eq!(parse_ratio("0.25").unwrap(), 0.25);
        assert_eq!(parse_ratio(" 1 ").unwrap(), 1.0);
        assert!(matches!(parse_ratio("half"), Err(ConfigError::InvalidRatio { .. })));
        assert!(matches!(parse_ratio("NaN"), Err(ConfigError::InvalidRatio { .. })));
    }

    #[test]
    fn test_defaults_from_lookup() {
        let defaults = RuntimeDefaults::from_lookup(|key| match key {
            env::RATIO => Some("0.1".to_string()),
            env::MODE => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(defaults.ratio, "0.1");
        assert_eq!(defaults.mode, DEFAULT_MODE);
        assert_eq!(defaults.interval, DEFAULT_INTERVAL);
    }

    #[test]
    fn test_grace_period_duration() {
        let config = RuntimeConfig {
            grace: 5,
            ..Default::default()
        };
        assert_eq!(config.grace_period(), Duration::from_secs(5));
    }
}
