//! HTTP control surface.
//!
//! Triggers and inspects pipeline runs, serves the analytics summary and the
//! generated report files, and exposes stored records to the dashboard.
//! Run state is read from the `pipeline_runs` table; the server keeps no
//! run registry of its own.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Dashboard |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/pipeline/run` | Start a run in the background |
//! | `GET`  | `/pipeline/runs` | Recent runs, newest first (`?limit=N`) |
//! | `GET`  | `/pipeline/runs/{id}` | One run |
//! | `GET`  | `/analytics/summary` | Full analytics summary |
//! | `GET`  | `/analytics/users/stats` | User-centric slice of the summary |
//! | `GET`  | `/analytics/engagement` | Post/comment slice of the summary |
//! | `GET`  | `/reports` | Report files |
//! | `GET`  | `/reports/{filename}` | Download a report |
//! | `DELETE` | `/reports/{filename}` | Delete a report |
//! | `GET`  | `/data/dashboard/stats` | Stored totals and the 5 latest runs |
//! | `GET`  | `/data/users` | Stored users (`?limit=N&offset=M`) |
//! | `GET`  | `/data/users/{id}` | One user |
//! | `GET`  | `/data/users/{id}/posts` | A user's posts |
//! | `GET`  | `/data/posts` | Stored posts (`?limit=N&offset=M`) |
//! | `GET`  | `/data/posts/{id}` | One post |
//! | `GET`  | `/data/posts/{id}/comments` | A post's comments |
//! | `GET`  | `/data/comments` | Stored comments (`?limit=N&offset=M`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "run 42 not found" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # Concurrency
//!
//! `POST /pipeline/run` records the run and returns immediately. Execution
//! happens on a background task that holds the run lock, so at most one run
//! executes at a time; later triggers wait for the lock.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::analytics::{compute_summary, ActiveUser, AnalyticsSummary, PostEngagement};
use crate::browse;
use crate::config::Config;
use crate::db;
use crate::error::ReportError;
use crate::migrate::migrate_pool;
use crate::models::PipelineRun;
use crate::pipeline::Pipeline;
use crate::report::{self, ReportFormat, ReportInfo};
use crate::runlog;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
    pipeline: Arc<Pipeline>,
    /// Held for the whole execution of a run.
    run_lock: Arc<Mutex<()>>,
}

/// Starts the server with the HTTP extractor configured in `[api]`.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(Arc::new(config.clone()))?;
    run_server_with_pipeline(config, pipeline).await
}

/// Starts the server with a caller-supplied pipeline.
///
/// Connects to the database, creates the schema if needed, binds
/// `[server].bind` and serves until the process is terminated.
pub async fn run_server_with_pipeline(config: &Config, pipeline: Pipeline) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;

    let bind_addr = config.server.bind.clone();
    let app = router(config, pool, pipeline);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");
    println!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the application router over an already migrated pool.
pub fn router(config: &Config, pool: SqlitePool, pipeline: Pipeline) -> Router {
    let state = AppState {
        config: Arc::new(config.clone()),
        pool,
        pipeline: Arc::new(pipeline),
        run_lock: Arc::new(Mutex::new(())),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_dashboard))
        .route("/health", get(handle_health))
        .route("/pipeline/run", post(handle_trigger_run))
        .route("/pipeline/runs", get(handle_list_runs))
        .route("/pipeline/runs/{id}", get(handle_get_run))
        .route("/analytics/summary", get(handle_summary))
        .route("/analytics/users/stats", get(handle_user_stats))
        .route("/analytics/engagement", get(handle_engagement))
        .route("/reports", get(handle_list_reports))
        .route(
            "/reports/{filename}",
            get(handle_download_report).delete(handle_delete_report),
        )
        .route("/data/dashboard/stats", get(handle_dashboard_stats))
        .route("/data/users", get(handle_list_users))
        .route("/data/users/{id}", get(handle_get_user))
        .route("/data/users/{id}/posts", get(handle_user_posts))
        .route("/data/posts", get(handle_list_posts))
        .route("/data/posts/{id}", get(handle_get_post))
        .route("/data/posts/{id}/comments", get(handle_post_comments))
        .route("/data/comments", get(handle_list_comments))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

/// Logs the full error and answers with its top-level message only.
fn internal(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

impl From<ReportError> for AppError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::NotFound(name) => not_found(format!("report {} not found", name)),
            other => internal(other),
        }
    }
}

fn parse_id(raw: &str) -> Result<i64, AppError> {
    raw.parse::<i64>()
        .map_err(|_| bad_request(format!("invalid id: {}", raw)))
}

fn parse_param(
    params: &HashMap<String, String>,
    name: &str,
    default: i64,
    max: i64,
) -> Result<i64, AppError> {
    let Some(raw) = params.get(name) else {
        return Ok(default);
    };
    match raw.parse::<i64>() {
        Ok(n) if (0..=max).contains(&n) => Ok(n),
        _ => Err(bad_request(format!(
            "{} must be an integer between 0 and {}",
            name, max
        ))),
    }
}

// ============ GET / and /health ============

async fn handle_dashboard() -> Html<&'static str> {
    Html(include_str!("dashboard.html"))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    timestamp: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

// ============ Pipeline runs ============

#[derive(Serialize)]
struct TriggerResponse {
    run_id: i64,
    status: String,
}

/// Handler for `POST /pipeline/run`.
///
/// Records the run, then executes it on a background task. The response
/// carries the run id to poll with `GET /pipeline/runs/{id}`.
async fn handle_trigger_run(
    State(state): State<AppState>,
) -> Result<Json<TriggerResponse>, AppError> {
    let run = state.pipeline.start(&state.pool).await.map_err(internal)?;
    let run_id = run.id;

    tokio::spawn(async move {
        let _guard = state.run_lock.lock().await;
        if let Err(e) = state.pipeline.execute(&state.pool, run).await {
            error!(run_id, error = %e, "background run could not be recorded");
        }
    });

    Ok(Json(TriggerResponse {
        run_id,
        status: "running".to_string(),
    }))
}

#[derive(Serialize)]
struct RunsResponse {
    runs: Vec<PipelineRun>,
}

async fn handle_list_runs(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RunsResponse>, AppError> {
    let limit = parse_param(&params, "limit", state.config.server.recent_runs, 1000)?;
    let runs = runlog::list_pipeline_runs(&state.pool, limit)
        .await
        .map_err(internal)?;
    Ok(Json(RunsResponse { runs }))
}

async fn handle_get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PipelineRun>, AppError> {
    let id = parse_id(&id)?;
    runlog::get_pipeline_run(&state.pool, id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("run {} not found", id)))
}

// ============ Analytics ============

async fn summary(state: &AppState) -> Result<AnalyticsSummary, AppError> {
    compute_summary(&state.pool, state.config.analytics.top_posts)
        .await
        .map_err(internal)
}

async fn handle_summary(State(state): State<AppState>) -> Result<Json<AnalyticsSummary>, AppError> {
    Ok(Json(summary(&state).await?))
}

#[derive(Serialize)]
struct UserStatsResponse {
    total_users: i64,
    total_posts: i64,
    average_posts_per_user: f64,
    most_active_user: Option<ActiveUser>,
}

async fn handle_user_stats(
    State(state): State<AppState>,
) -> Result<Json<UserStatsResponse>, AppError> {
    let s = summary(&state).await?;
    Ok(Json(UserStatsResponse {
        total_users: s.total_users,
        total_posts: s.total_posts,
        average_posts_per_user: s.average_posts_per_user,
        most_active_user: s.most_active_user,
    }))
}

#[derive(Serialize)]
struct EngagementResponse {
    total_posts: i64,
    total_comments: i64,
    top_posts: Vec<PostEngagement>,
}

async fn handle_engagement(
    State(state): State<AppState>,
) -> Result<Json<EngagementResponse>, AppError> {
    let s = summary(&state).await?;
    Ok(Json(EngagementResponse {
        total_posts: s.total_posts,
        total_comments: s.total_comments,
        top_posts: s.top_posts,
    }))
}

// ============ Reports ============

#[derive(Serialize)]
struct ReportsResponse {
    reports: Vec<ReportInfo>,
}

async fn handle_list_reports(
    State(state): State<AppState>,
) -> Result<Json<ReportsResponse>, AppError> {
    let reports = report::list_reports(&state.config.storage.reports_dir)?;
    Ok(Json(ReportsResponse { reports }))
}

async fn handle_download_report(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response, AppError> {
    let path = report::report_path(&state.config.storage.reports_dir, &filename)?;
    let content_type = ReportFormat::from_path(&path)
        .map(|f| f.content_type())
        .unwrap_or("application/octet-stream");
    let bytes = tokio::fs::read(&path).await.map_err(internal)?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

async fn handle_delete_report(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    report::delete_report(&state.config.storage.reports_dir, &filename)?;
    info!(filename = %filename, "report deleted");
    Ok(Json(MessageResponse {
        message: format!("report {} deleted", filename),
    }))
}

// ============ Stored data ============

async fn handle_dashboard_stats(
    State(state): State<AppState>,
) -> Result<Json<browse::DashboardStats>, AppError> {
    let stats = browse::dashboard_stats(&state.pool)
        .await
        .map_err(internal)?;
    Ok(Json(stats))
}

/// `limit` (default 100, at most 1000) and `offset` query parameters.
fn page_params(params: &HashMap<String, String>) -> Result<(i64, i64), AppError> {
    let limit = parse_param(params, "limit", 100, 1000)?;
    let offset = parse_param(params, "offset", 0, i64::MAX)?;
    Ok((limit, offset))
}

async fn handle_list_users(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (limit, offset) = page_params(&params)?;

    let users = browse::list_users(&state.pool, limit, offset)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "users": users })))
}

async fn handle_get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let user = browse::get_user(&state.pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("user {} not found", id)))?;
    Ok(Json(serde_json::json!(user)))
}

async fn handle_user_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    if browse::get_user(&state.pool, id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(not_found(format!("user {} not found", id)));
    }
    let posts = browse::posts_by_user(&state.pool, id)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "user_id": id, "posts": posts })))
}

async fn handle_get_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    let post = browse::get_post(&state.pool, id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("post {} not found", id)))?;
    Ok(Json(serde_json::json!(post)))
}

async fn handle_post_comments(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_id(&id)?;
    if browse::get_post(&state.pool, id)
        .await
        .map_err(internal)?
        .is_none()
    {
        return Err(not_found(format!("post {} not found", id)));
    }
    let comments = browse::comments_by_post(&state.pool, id)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "post_id": id, "comments": comments })))
}

async fn handle_list_posts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (limit, offset) = page_params(&params)?;
    let posts = browse::list_posts(&state.pool, limit, offset)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "posts": posts })))
}

async fn handle_list_comments(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let (limit, offset) = page_params(&params)?;
    let comments = browse::list_comments(&state.pool, limit, offset)
        .await
        .map_err(internal)?;
    Ok(Json(serde_json::json!({ "comments": comments })))
}
