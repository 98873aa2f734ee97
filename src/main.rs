mod engine;
mod http;
mod idempotency;
mod jobs;
mod metrics;
mod models;
mod normalize;
mod reconcile;
mod security;
mod shopee;
mod store;
mod tiktok;
mod tokens;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use engine::{EngineError, ErrorKind, SyncEngine};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, CycleResponse, SyncReport};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use store::Store;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "agni.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    init_tracing();

    let auth_state = AuthState::from_env();
    let store = Store::from_env()
        .ok_or("SUPABASE_URL and a service key are required to start the engine")?;
    let engine = SyncEngine::new(store, http::build_client());
    let (queue, _worker) = jobs::JobQueue::spawn(engine.clone());
    let prometheus_handle = PrometheusBuilder::new().install_recorder()?;
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());
    let state = AppState {
        engine,
        queue,
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .nest(
            "/cycles",
            Router::new()
                .route("/reconcile", post(run_reconcile_cycle))
                .route("/sync", post(run_sync_cycle)),
        )
        .nest(
            "/jobs",
            Router::new()
                .route("/cycles", post(enqueue_cycle_job))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "agni.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    engine: SyncEngine,
    queue: jobs::JobQueue,
    idempotency: Arc<Mutex<HashMap<String, CycleResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "agni-sync-rs",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap_or_default();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap_or_default()
}

/// Run a reconciliation cycle and return the classified stock master.
///
/// - Method: `POST`
/// - Path: `/cycles/reconcile`
/// - Auth: `Authorization: Bearer <key>` or `X-Sync-Key: <key>`
/// - `Idempotency-Key` header replays a recent identical cycle instead of
///   hitting the platforms again.
async fn run_reconcile_cycle(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    headers: axum::http::HeaderMap,
) -> Result<Json<CycleResponse>, AppError> {
    crate::metrics::inc_requests("/cycles/reconcile");
    info!(
        target = "agni.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        "reconcile cycle invoked",
    );

    if let Some(key) = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    {
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &key).await {
                return Ok(Json(existing));
            }
            let response = state.engine.run_reconcile().await?;
            let ttl = std::env::var("IDEMPOTENCY_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(3600);
            idempotency::redis_set(client, &key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&key).cloned() {
            return Ok(Json(existing));
        }
        let response = state.engine.run_reconcile().await?;
        state.idempotency.lock().await.insert(key, response.clone());
        return Ok(Json(response));
    }

    let response = state.engine.run_reconcile().await?;
    Ok(Json(response))
}

/// Push stock master quantities to the linked TikTok SKUs.
///
/// - Method: `POST`
/// - Path: `/cycles/sync`
async fn run_sync_cycle(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<SyncReport>, AppError> {
    crate::metrics::inc_requests("/cycles/sync");
    info!(
        target = "agni.api",
        org_id = %context.org_id,
        api_key = %context.api_key_id,
        "sync cycle invoked",
    );
    let report = state.engine.run_sync().await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_cycle_job(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/cycles");
    let id = state
        .queue
        .enqueue_cycle(context)
        .await
        .map_err(|err| AppError::Engine(EngineError::invalid_input("enqueue", err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Engine(EngineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::Engine(EngineError::invalid_input(
            "jobs",
            "not_found",
        )))
    }
}

#[derive(Debug)]
enum AppError {
    Engine(EngineError),
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        Self::Engine(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Engine(err) => {
                let status = match err.kind() {
                    ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    ErrorKind::Auth | ErrorKind::Transport | ErrorKind::Platform => {
                        StatusCode::BAD_GATEWAY
                    }
                    ErrorKind::Parse | ErrorKind::Persistence => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
