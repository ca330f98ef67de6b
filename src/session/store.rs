//! Persistence for scenarios and session records

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{RuntimeSpec, TargetSpec};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("scenario '{0}' not found")]
    ScenarioNotFound(String),

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("session {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("scenario id must not be empty")]
    EmptyScenarioId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// Allowed moves: queued -> running -> completed|failed, and a queued
    /// session may end without ever running.
    pub fn can_become(&self, next: SessionStatus) -> bool {
        match (self, next) {
            (SessionStatus::Queued, SessionStatus::Running) => true,
            (SessionStatus::Queued | SessionStatus::Running, to) => to.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Queued => "queued",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub scenario_id: String,
    pub version: i64,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One version of a registered scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRecord {
    pub id: String,
    pub version: i64,
    pub description: String,
    pub target: TargetSpec,
    pub runtime: RuntimeSpec,
    pub created_at: DateTime<Utc>,
}

/// One stored scenario version without its content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub id: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl From<&ScenarioRecord> for ScenarioSummary {
    fn from(record: &ScenarioRecord) -> Self {
        Self {
            id: record.id.clone(),
            version: record.version,
            created_at: record.created_at,
        }
    }
}

/// Session counts by status for one scenario version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub scenario_id: String,
    pub version: i64,
    pub completed_count: usize,
    pub terminated_count: usize,
    pub in_progress_count: usize,
    pub queued_count: usize,
}

impl SessionMetrics {
    fn count(&mut self, status: SessionStatus) {
        match status {
            SessionStatus::Completed => self.completed_count += 1,
            SessionStatus::Failed => self.terminated_count += 1,
            SessionStatus::Running => self.in_progress_count += 1,
            SessionStatus::Queued => self.queued_count += 1,
        }
    }
}

/// Scenario content submitted for registration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewScenario {
    pub id: String,
    pub description: String,
    pub target: TargetSpec,
    pub runtime: RuntimeSpec,
}

/// Resolve a requested version against the latest one.
///
/// Zero, negative and too-large versions all mean "latest".
pub fn clamp_version(requested: i64, latest: i64) -> i64 {
    if requested <= 0 || requested > latest {
        latest
    } else {
        requested
    }
}

// ============================================================================
// SBIO: Trait for abstraction (allows a database-backed store elsewhere)
// ============================================================================

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a scenario as a new version (1 for a new id).
    async fn put_scenario(&self, scenario: NewScenario) -> Result<ScenarioRecord, StoreError>;

    /// Fetch a scenario version, clamped with [`clamp_version`].
    async fn get_scenario(&self, id: &str, version: i64) -> Result<ScenarioRecord, StoreError>;

    /// Open a queued session against a scenario version.
    async fn create_session(
        &self,
        scenario_id: &str,
        version: i64,
    ) -> Result<SessionRecord, StoreError>;

    async fn mark_running(&self, session_id: Uuid) -> Result<(), StoreError>;

    async fn end_session(&self, session_id: Uuid, status: SessionStatus)
        -> Result<(), StoreError>;

    async fn get_session(&self, session_id: Uuid) -> Result<SessionRecord, StoreError>;

    /// Sessions of a scenario, oldest first
    async fn list_sessions(&self, scenario_id: &str) -> Result<Vec<SessionRecord>, StoreError>;

    /// Every stored version of every scenario, by id then version
    async fn list_scenarios(&self) -> Result<Vec<ScenarioSummary>, StoreError>;

    /// Stored versions of one scenario, oldest first
    async fn list_versions(&self, scenario_id: &str) -> Result<Vec<ScenarioSummary>, StoreError>;

    /// Session counts per scenario version. `None` covers every scenario.
    async fn session_metrics(
        &self,
        scenario_id: Option<&str>,
    ) -> Result<Vec<SessionMetrics>, StoreError>;
}

/// Process-local store; contents are lost on restart
#[derive(Default)]
pub struct InMemorySessionStore {
    scenarios: DashMap<String, Vec<ScenarioRecord>>,
    sessions: DashMap<Uuid, SessionRecord>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self, session_id: Uuid, to: SessionStatus) -> Result<(), StoreError> {
        let mut record = self
            .sessions
            .get_mut(&session_id)
            .ok_or(StoreError::SessionNotFound(session_id))?;

        if !record.status.can_become(to) {
            return Err(StoreError::InvalidTransition {
                id: session_id,
                from: record.status,
                to,
            });
        }

        record.status = to;
        if to.is_terminal() {
            record.end_time = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn put_scenario(&self, scenario: NewScenario) -> Result<ScenarioRecord, StoreError> {
        let id = scenario.id.trim().to_string();
        if id.is_empty() {
            return Err(StoreError::EmptyScenarioId);
        }

        let mut versions = self.scenarios.entry(id.clone()).or_default();
        let record = ScenarioRecord {
            id,
            version: versions.len() as i64 + 1,
            description: scenario.description,
            target: scenario.target,
            runtime: scenario.runtime,
            created_at: Utc::now(),
        };
        versions.push(record.clone());
        Ok(record)
    }

    async fn get_scenario(&self, id: &str, version: i64) -> Result<ScenarioRecord, StoreError> {
        let versions = self
            .scenarios
            .get(id)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::ScenarioNotFound(id.to_string()))?;

        let version = clamp_version(version, versions.len() as i64);
        versions
            .get((version - 1) as usize)
            .cloned()
            .ok_or_else(|| StoreError::ScenarioNotFound(id.to_string()))
    }

    async fn create_session(
        &self,
        scenario_id: &str,
        version: i64,
    ) -> Result<SessionRecord, StoreError> {
        let scenario = self.get_scenario(scenario_id, version).await?;
        let record = SessionRecord {
            id: Uuid::new_v4(),
            scenario_id: scenario.id,
            version: scenario.version,
            status: SessionStatus::Queued,
            start_time: Utc::now(),
            end_time: None,
        };
        self.sessions.insert(record.id, record.clone());
        Ok(record)
    }

    async fn mark_running(&self, session_id: Uuid) -> Result<(), StoreError> {
        self.transition(session_id, SessionStatus::Running)
    }

    async fn end_session(
        &self,
        session_id: Uuid,
        status: SessionStatus,
    ) -> Result<(), StoreError> {
        self.transition(session_id, status)
    }

    async fn get_session(&self, session_id: Uuid) -> Result<SessionRecord, StoreError> {
        self.sessions
            .get(&session_id)
            .map(|r| r.clone())
            .ok_or(StoreError::SessionNotFound(session_id))
    }

    async fn list_sessions(&self, scenario_id: &str) -> Result<Vec<SessionRecord>, StoreError> {
        if !self.scenarios.contains_key(scenario_id) {
            return Err(StoreError::ScenarioNotFound(scenario_id.to_string()));
        }

        let mut sessions: Vec<SessionRecord> = self
            .sessions
            .iter()
            .filter(|r| r.scenario_id == scenario_id)
            .map(|r| r.clone())
            .collect();
        sessions.sort_by_key(|r| r.start_time);
        Ok(sessions)
    }

    async fn list_scenarios(&self) -> Result<Vec<ScenarioSummary>, StoreError> {
        let mut summaries: Vec<ScenarioSummary> = self
            .scenarios
            .iter()
            .flat_map(|versions| versions.iter().map(ScenarioSummary::from).collect::<Vec<_>>())
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id).then(a.version.cmp(&b.version)));
        Ok(summaries)
    }

    async fn list_versions(&self, scenario_id: &str) -> Result<Vec<ScenarioSummary>, StoreError> {
        self.scenarios
            .get(scenario_id)
            .filter(|v| !v.is_empty())
            .map(|versions| versions.iter().map(ScenarioSummary::from).collect())
            .ok_or_else(|| StoreError::ScenarioNotFound(scenario_id.to_string()))
    }

    async fn session_metrics(
        &self,
        scenario_id: Option<&str>,
    ) -> Result<Vec<SessionMetrics>, StoreError> {
        if let Some(id) = scenario_id {
            if !self.scenarios.contains_key(id) {
                return Err(StoreError::ScenarioNotFound(id.to_string()));
            }
        }

        let mut grouped: BTreeMap<(String, i64), SessionMetrics> = BTreeMap::new();
        for record in self.sessions.iter() {
            if scenario_id.is_some_and(|id| id != record.scenario_id) {
                continue;
            }
            grouped
                .entry((record.scenario_id.clone(), record.version))
                .or_insert_with(|| SessionMetrics {
                    scenario_id: record.scenario_id.clone(),
                    version: record.version,
                    ..SessionMetrics::default()
                })
                .count(record.status);
        }
        Ok(grouped.into_values().collect())
    }
}
