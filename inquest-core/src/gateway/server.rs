//! HTTP gateway server built on axum.

use super::GatewayConfig;
use crate::error::{ConfigError, FailureKind, InquestError};
use crate::service::{InvocationOutcome, ResearchRequest, ResearchService};
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

/// Lifecycle of a background research run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        artifact_key: String,
    },
    Failed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: String,
        kind: FailureKind,
    },
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running { .. })
    }

    fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            RunStatus::Running { .. } => None,
            RunStatus::Completed { finished_at, .. } | RunStatus::Failed { finished_at, .. } => {
                Some(*finished_at)
            }
        }
    }

    fn started_at(&self) -> DateTime<Utc> {
        match self {
            RunStatus::Running { started_at }
            | RunStatus::Completed { started_at, .. }
            | RunStatus::Failed { started_at, .. } => *started_at,
        }
    }
}

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct GatewayState {
    service: Arc<ResearchService>,
    runs: Arc<RwLock<HashMap<String, RunStatus>>>,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
    retention: chrono::Duration,
}

impl GatewayState {
    /// Background runs are cancelled when `shutdown` fires.
    pub fn new(service: Arc<ResearchService>, shutdown: CancellationToken) -> Self {
        Self {
            service,
            runs: Arc::new(RwLock::new(HashMap::new())),
            shutdown,
            started_at: Utc::now(),
            retention: chrono::Duration::hours(1),
        }
    }

    /// Keep finished runs queryable for `retention` after they finish.
    pub fn with_retention(mut self, retention: std::time::Duration) -> Self {
        self.retention = chrono::Duration::from_std(retention).unwrap_or(chrono::TimeDelta::MAX);
        self
    }

    pub async fn status(&self, research_id: &str) -> Option<RunStatus> {
        self.runs.read().await.get(research_id).cloned()
    }

    pub async fn running_count(&self) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|s| s.is_running())
            .count()
    }

    /// Record `request` as running and start it in the background. Returns
    /// false if a run with the same id is still in flight.
    async fn spawn_run(&self, request: ResearchRequest) -> bool {
        let started_at = Utc::now();
        {
            let mut runs = self.runs.write().await;
            if runs
                .get(&request.research_id)
                .is_some_and(RunStatus::is_running)
            {
                return false;
            }
            let cutoff = started_at
                .checked_sub_signed(self.retention)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            prune_finished(&mut runs, cutoff);
            runs.insert(request.research_id.clone(), RunStatus::Running { started_at });
        }

        let state = self.clone();
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let result = state.service.process(&request, cancel).await;
            let finished_at = Utc::now();
            let status = match result {
                Ok(_) => {
                    info!(research_id = request.research_id.as_str(), "Background research complete");
                    RunStatus::Completed {
                        started_at,
                        finished_at,
                        artifact_key: request.artifact_key(),
                    }
                }
                Err(e) => {
                    error!(
                        research_id = request.research_id.as_str(),
                        kind = %e.kind(),
                        error = %e,
                        "Background research failed"
                    );
                    RunStatus::Failed {
                        started_at,
                        finished_at,
                        error: e.to_string(),
                        kind: e.kind(),
                    }
                }
            };
            state
                .runs
                .write()
                .await
                .insert(request.research_id.clone(), status);
        });
        true
    }
}

/// Drop finished runs that finished before `cutoff`.
fn prune_finished(runs: &mut HashMap<String, RunStatus>, cutoff: DateTime<Utc>) {
    let before = runs.len();
    runs.retain(|_, status| status.finished_at().is_none_or(|at| at >= cutoff));
    let pruned = before - runs.len();
    if pruned > 0 {
        debug!(pruned, "Evicted finished research runs");
    }
}

/// Build the axum Router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/research/create", post(create_handler))
        .route("/research/{id}", get(status_handler))
        .route("/invocations", post(invocations_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Welcome to the Inquest research API."
    }))
}

async fn health_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let uptime = (Utc::now() - state.started_at).num_seconds().max(0);
    Json(serde_json::json!({
        "status": "ok",
        "running": state.running_count().await,
        "uptime_secs": uptime,
    }))
}

fn error_body(status: StatusCode, error: String, kind: FailureKind) -> axum::response::Response {
    (
        status,
        Json(serde_json::json!({ "error": error, "kind": kind })),
    )
        .into_response()
}

/// A body axum could not read as the expected JSON.
fn malformed_request(rejection: &JsonRejection) -> InquestError {
    ConfigError::Invalid {
        message: format!("malformed request: {}", rejection.body_text()),
    }
    .into()
}

/// Validate, start the run in the background and acknowledge at once.
async fn create_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<ResearchRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(status = %rejection.status(), "Rejected research request body");
            return error_body(
                StatusCode::BAD_REQUEST,
                malformed_request(&rejection).to_string(),
                FailureKind::ConfigurationError,
            );
        }
    };
    if let Err(e) = request.validate() {
        return error_body(
            StatusCode::BAD_REQUEST,
            e.to_string(),
            FailureKind::ConfigurationError,
        );
    }

    info!(research_id = request.research_id.as_str(), "Received research request");
    let research_id = request.research_id.clone();
    if !state.spawn_run(request).await {
        return error_body(
            StatusCode::CONFLICT,
            format!("Research {research_id} is already running"),
            FailureKind::ConfigurationError,
        );
    }

    Json(serde_json::json!({
        "message": format!("Research started for investigation: {research_id}")
    }))
    .into_response()
}

/// Run synchronously and answer with the invocation envelope.
async fn invocations_handler(
    State(state): State<GatewayState>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> axum::response::Response {
    let outcome = match payload {
        Ok(Json(payload)) => {
            state
                .service
                .invoke(payload, state.shutdown.child_token())
                .await
        }
        Err(rejection) => {
            warn!(status = %rejection.status(), "Rejected invocation body");
            InvocationOutcome::failure(&malformed_request(&rejection))
        }
    };
    let status =
        StatusCode::from_u16(outcome.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome)).into_response()
}

async fn status_handler(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> axum::response::Response {
    match state.status(&id).await {
        Some(status) => {
            let mut body = serde_json::to_value(&status).unwrap_or_default();
            body["research_id"] = serde_json::Value::String(id);
            body["age_secs"] = serde_json::json!((Utc::now() - status.started_at()).num_seconds());
            Json(body).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("No research with id {id}") })),
        )
            .into_response(),
    }
}

/// Bind `config.host:config.port` and serve until `state`'s shutdown token fires.
pub async fn run_gateway(config: &GatewayConfig, state: GatewayState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = addr.as_str(), "Gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_serialization() {
        let now = Utc::now();
        let running = serde_json::to_value(RunStatus::Running { started_at: now }).unwrap();
        assert_eq!(running["status"], "running");

        let failed = serde_json::to_value(RunStatus::Failed {
            started_at: now,
            finished_at: now,
            error: "boom".into(),
            kind: FailureKind::NoEvidence,
        })
        .unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["kind"], "no_evidence");
    }

    #[test]
    fn test_prune_finished_keeps_running_and_recent() {
        let now = Utc::now();
        let old = now - chrono::Duration::hours(2);
        let mut runs = HashMap::from([
            ("running".to_string(), RunStatus::Running { started_at: old }),
            (
                "old".to_string(),
                RunStatus::Completed {
                    started_at: old,
                    finished_at: old,
                    artifact_key: "k".into(),
                },
            ),
            (
                "recent".to_string(),
                RunStatus::Failed {
                    started_at: old,
                    finished_at: now,
                    error: "boom".into(),
                    kind: FailureKind::SearchFailure,
                },
            ),
        ]);

        prune_finished(&mut runs, now - chrono::Duration::hours(1));

        let mut kept: Vec<_> = runs.keys().map(String::as_str).collect();
        kept.sort();
        assert_eq!(kept, vec!["recent", "running"]);
    }

    #[test]
    fn test_is_running() {
        let now = Utc::now();
        assert!(RunStatus::Running { started_at: now }.is_running());
        assert!(
            !RunStatus::Completed {
                started_at: now,
                finished_at: now,
                artifact_key: "k".into()
            }
            .is_running()
        );
    }
}
