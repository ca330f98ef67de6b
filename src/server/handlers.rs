use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chaos::ChaosRunner;
use crate::config::{plan_scenario, ClusterSpec, RuntimeSpec, ScenarioPlan, TargetSpec};
use crate::logbridge::{event_stream, single_frame, LogEntry};
use crate::server::state::AppState;
use crate::session::{NewScenario, SessionStatus, StoreError};

/// Scenario label used for sessions started without a stored scenario
pub const QUICKSTART_SCENARIO: &str = "quickstart";

/// Everything a quickstart session needs, as one flat JSON object
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct QuickstartRequest {
    #[serde(flatten)]
    pub target: TargetSpec,
    #[serde(flatten)]
    pub runtime: RuntimeSpec,
    #[serde(flatten)]
    pub cluster: ClusterSpec,
}

/// Outcome of a non-streaming operation
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationStatus {
    pub success: bool,
    pub message: String,
}

impl OperationStatus {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Optional filter for `GET /metric`
#[derive(Debug, Default, Deserialize)]
pub struct MetricQuery {
    pub scenario: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerStatus {
    live_sessions: usize,
    idle_loggers: usize,
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ServerStatus {
        live_sessions: state.live_session_count(),
        idle_loggers: state.loggers.idle_count(),
    })
}

/// Run an ad-hoc session described entirely by the request body
pub async fn quickstart(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QuickstartRequest>,
) -> Response {
    let session_id = request_id(&headers);

    let plan = match plan_scenario(
        &request.target,
        &request.runtime,
        &request.cluster,
        &state.defaults,
    ) {
        Ok(plan) => plan,
        Err(e) => return rejected(e.to_string()),
    };

    launch(state, session_id, QUICKSTART_SCENARIO, plan, false).await
}

/// Run a stored scenario; the optional body carries cluster parameters
pub async fn create_session(
    State(state): State<AppState>,
    Path((scenario_id, version)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let Ok(version) = version.parse::<i64>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(OperationStatus::failure(format!(
                "version must be an integer, got '{}'",
                version
            ))),
        )
            .into_response();
    };

    let cluster: ClusterSpec = if body.is_empty() {
        ClusterSpec::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(cluster) => cluster,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(OperationStatus::failure(format!("invalid request body: {}", e))),
                )
                    .into_response()
            }
        }
    };

    let scenario = match state.store.get_scenario(&scenario_id, version).await {
        Ok(scenario) => scenario,
        Err(e) => return store_error(e),
    };

    let plan = match plan_scenario(
        &scenario.target,
        &scenario.runtime,
        &cluster,
        &state.defaults,
    ) {
        Ok(plan) => plan,
        Err(e) => return rejected(e.to_string()),
    };

    let session = match state.store.create_session(&scenario.id, scenario.version).await {
        Ok(session) => session,
        Err(e) => return store_error(e),
    };

    let label = format!("{} (version {})", scenario.id, scenario.version);
    launch(state, session.id, &label, plan, true).await
}

/// Stop a running session by id
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> impl IntoResponse {
    if state.sessions.registry().stop(&session_id) {
        info!(session = %session_id, "Stop requested");
        (
            StatusCode::ACCEPTED,
            Json(OperationStatus::success("Session stopping")),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(OperationStatus::failure("Session not running")),
        )
    }
}

/// Register a scenario, or a new version of an existing one
pub async fn put_scenario(
    State(state): State<AppState>,
    Json(scenario): Json<NewScenario>,
) -> Response {
    if let Err(e) = plan_scenario(
        &scenario.target,
        &scenario.runtime,
        &ClusterSpec::default(),
        &state.defaults,
    ) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(OperationStatus::failure(e.to_string())),
        )
            .into_response();
    }

    match state.store.put_scenario(scenario).await {
        Ok(record) => {
            info!("Registered scenario {} version {}", record.id, record.version);
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => store_error(e),
    }
}

/// Latest version of a scenario
pub async fn get_scenario(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> Response {
    match state.store.get_scenario(&scenario_id, 0).await {
        Ok(record) => Json(record).into_response(),
        Err(StoreError::ScenarioNotFound(id)) => not_found(id),
        Err(e) => store_error(e),
    }
}

/// Every stored scenario version
pub async fn list_scenarios(State(state): State<AppState>) -> Response {
    match state.store.list_scenarios().await {
        Ok(scenarios) => Json(scenarios).into_response(),
        Err(e) => store_error(e),
    }
}

pub async fn list_versions(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> Response {
    match state.store.list_versions(&scenario_id).await {
        Ok(versions) => Json(versions).into_response(),
        Err(StoreError::ScenarioNotFound(id)) => not_found(id),
        Err(e) => store_error(e),
    }
}

/// Session counts per scenario version, optionally for one scenario
pub async fn session_metrics(
    State(state): State<AppState>,
    Query(query): Query<MetricQuery>,
) -> Response {
    let scenario = query.scenario.as_deref().filter(|s| !s.is_empty());
    match state.store.session_metrics(scenario).await {
        Ok(metrics) => Json(metrics).into_response(),
        Err(StoreError::ScenarioNotFound(id)) => not_found(id),
        Err(e) => store_error(e),
    }
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Path(scenario_id): Path<String>,
) -> Response {
    match state.store.list_sessions(&scenario_id).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(StoreError::ScenarioNotFound(id)) => not_found(id),
        Err(e) => store_error(e),
    }
}

/// Connect to the cluster, start the cycle loop and stream its log.
async fn launch(
    state: AppState,
    session_id: Uuid,
    scenario: &str,
    plan: ScenarioPlan,
    tracked: bool,
) -> Response {
    let gateway = match state.gateways.connect(&plan.cluster).await {
        Ok(gateway) => gateway,
        Err(e) => {
            warn!(session = %session_id, "Cluster connection failed: {}", e);
            if tracked {
                if let Err(e) = state.store.end_session(session_id, SessionStatus::Failed).await {
                    warn!(session = %session_id, "Could not record session end: {}", e);
                }
            }
            return rejected(e.to_string());
        }
    };

    let lease = state.loggers.acquire(session_id.to_string());
    let sink = lease.sink();
    for warning in &plan.warnings {
        sink.warn(warning.clone());
    }

    let cancel = state.shutdown.child_token();
    let runner = Arc::new(ChaosRunner::new(gateway, plan.target, plan.runtime, scenario));
    let interval = runner.runtime().interval;
    info!(
        session = %session_id,
        "Starting session for {} (mode {}, ordering {}, every {:?})",
        scenario,
        runner.runtime().mode,
        runner.runtime().order,
        interval
    );

    if tracked {
        state
            .sessions
            .spawn(session_id, runner, interval, cancel.clone(), sink);
    } else {
        state
            .sessions
            .spawn_untracked(session_id, runner, interval, cancel.clone(), sink);
    }

    event_stream_response(Body::from_stream(event_stream(lease, cancel)))
}

/// A stream holding a single error frame, for sessions that never start
fn rejected(message: String) -> Response {
    warn!("Rejecting session: {}", message);
    event_stream_response(Body::from_stream(single_frame(LogEntry::error(message))))
}

fn event_stream_response(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

fn not_found(id: String) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(OperationStatus::failure(format!("scenario '{}' not found", id))),
    )
        .into_response()
}

fn store_error(e: StoreError) -> Response {
    let code = match e {
        StoreError::ScenarioNotFound(_) | StoreError::EmptyScenarioId => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        StoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::InvalidTransition { .. } => StatusCode::CONFLICT,
    };
    (code, Json(OperationStatus::failure(e.to_string()))).into_response()
}

/// Session id from `x-request-id` when it is a UUID, otherwise a fresh one
fn request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Create the Axum router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/quickstart", post(quickstart))
        .route("/session/{scenario}/{version}", post(create_session))
        .route("/session/{id}", delete(stop_session))
        .route("/scenario", post(put_scenario).get(list_scenarios))
        .route("/scenario/{id}", get(get_scenario))
        .route("/scenario/{id}/versions", get(list_versions))
        .route("/scenario/{id}/sessions", get(list_sessions))
        .route("/metric", get(session_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
