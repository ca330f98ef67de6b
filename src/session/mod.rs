//! # Sessions
//!
//! A session is one client's chaos run: a cycle loop on a background task
//! ([`run_session`]), supervised so that its end always reaches the
//! [`SessionStore`], and registered so it can be stopped by id.

pub mod registry;
pub mod scheduler;
pub mod store;

pub use registry::SessionRegistry;
pub use scheduler::{run_session, SessionHandle, SessionOutcome, SessionState, SessionSupervisor};
pub use store::{
    clamp_version, InMemorySessionStore, NewScenario, ScenarioRecord, ScenarioSummary,
    SessionMetrics, SessionRecord, SessionStatus, SessionStore, StoreError,
};
