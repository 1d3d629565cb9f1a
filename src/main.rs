mod config;
mod content;
mod error;
mod http;
mod jobs;
mod metrics;
mod models;
mod notify;
mod reconcile;
mod remote;
mod security;
mod store;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use config::SyncConfig;
use eyre::WrapErr;
use jobs::{JobQueue, RunKind};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, TaskRecord};
use notify::{LogNotifier, RelayNotifier, SharedNotifier};
use reconcile::Reconciler;
use remote::HttpCatalogSource;
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::{CatalogStore, MemoryStore};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "catalog.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(SyncConfig::from_env());
    let notifier: SharedNotifier = match &config.mail_relay_url {
        Some(url) => Arc::new(RelayNotifier::new(url.clone())),
        None => Arc::new(LogNotifier),
    };
    let reconciler = Reconciler::new(
        config.clone(),
        Arc::new(HttpCatalogSource::new(config.clone())),
        Arc::new(MemoryStore::new()),
        notifier,
    );
    let (queue, _worker) = JobQueue::spawn(reconciler.clone());
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        reconciler,
        queue,
        prometheus_handle: Some(prometheus_handle),
    };
    let app = router(state, AuthState::from_env());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "catalog.api", dealer = %config.dealer, "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    reconciler: Reconciler,
    queue: JobQueue,
    prometheus_handle: Option<PrometheusHandle>,
}

fn router(state: AppState, auth_state: AuthState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/runs/{kind}", post(enqueue_run))
        .route("/runs/{kind}/{id}", get(get_run_status))
        .route("/tasks", get(list_tasks))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-sync",
        "dealer": state.reconciler.dealer(),
    }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = state
        .prometheus_handle
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([("Content-Type", "text/plain; version=0.0.4")], body).into_response()
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
    kind: RunKind,
}

/// Queue a reconciliation run for the background worker.
///
/// - Method: `POST`
/// - Path: `/runs/{kind}` where kind is `categories`, `positions` or `full`
/// - Auth: `Authorization: Bearer <key>` or `X-Catalog-Key: <key>`
/// - Response: `{ job_id, kind }`
async fn enqueue_run(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(kind): Path<String>,
) -> Result<Json<EnqueueResponse>, AppError> {
    metrics::inc_requests("/runs");
    let kind = RunKind::parse(&kind).ok_or(AppError::InvalidInput("unknown_run_kind"))?;
    info!(
        target = "catalog.api",
        operator = %context.operator,
        kind = ?kind,
        "run requested",
    );
    let id = state
        .queue
        .enqueue(kind, context)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
        kind,
    }))
}

/// `GET /runs/{kind}/{id}`; `kind` is informational, lookup is by id.
async fn get_run_status(
    State(state): State<AppState>,
    Path((_kind, id)): Path<(String, String)>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidInput("invalid_job_id"));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

/// Audit records, newest first.
async fn list_tasks(State(state): State<AppState>) -> Result<Json<Vec<TaskRecord>>, AppError> {
    metrics::inc_requests("/tasks");
    state
        .reconciler
        .store()
        .tasks()
        .await
        .map(Json)
        .map_err(|err| AppError::Internal(err.to_string()))
}

#[derive(Debug)]
enum AppError {
    InvalidInput(&'static str),
    NotFound(&'static str),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, payload) = match self {
            AppError::InvalidInput(code) => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: code.to_string(),
                    detail: None,
                },
            ),
            AppError::NotFound(code) => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: code.to_string(),
                    detail: None,
                },
            ),
            AppError::Internal(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError {
                    error: "internal".to_string(),
                    detail: Some(detail),
                },
            ),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::testing::{Harness, harness};
    use crate::remote::Resource;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        let (queue, _worker) = JobQueue::spawn(h.reconciler.clone());
        let state = AppState {
            reconciler: h.reconciler.clone(),
            queue,
            prometheus_handle: None,
        };
        router(state, AuthState::from_pairs("scheduler:test-key"))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let h = harness();
        let response = app(&h)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["dealer"], "nl_dealer");
    }

    #[tokio::test]
    async fn runs_require_a_key() {
        let h = harness();
        let response = app(&h)
            .oneshot(
                Request::post("/runs/categories")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn unknown_run_kind_is_rejected() {
        let h = harness();
        let response = app(&h)
            .oneshot(
                Request::post("/runs/primes")
                    .header("X-Catalog-Key", "test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn enqueued_run_shows_up_in_audit_log() {
        let h = harness();
        h.source.respond(
            Resource::Categories,
            serde_json::json!({"category": [{"id": 1, "parentId": 0, "name": "Tools"}]}),
        );
        let app = app(&h);

        let response = app
            .clone()
            .oneshot(
                Request::post("/runs/categories")
                    .header("Authorization", "Bearer test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = body_json(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let mut state = Value::Null;
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::get(format!("/runs/categories/{job_id}"))
                        .header("X-Catalog-Key", "test-key")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            state = body_json(response).await["state"].clone();
            if state == "completed" {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state, "completed");

        let response = app
            .oneshot(
                Request::get("/tasks")
                    .header("X-Catalog-Key", "test-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let tasks = body_json(response).await;
        assert_eq!(tasks[0]["name"], "updating structure of catalog");
        assert_eq!(tasks[0]["success"], true);
    }
}
