use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use shared::{
    domain::JobId,
    error::{ApiError, ApiException, ErrorCode},
    protocol::{self, HealthResponse, ProcessResponse, StatusResponse, UploadResponse, UPLOAD_FIELD},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;

use api::{job_not_found, run_stub_pipeline, sweep_expired_jobs, JobStore, PIPELINE_STAGES};
use app_state::AppState;
use config::load_settings;

const MAX_FILENAME_BYTES: usize = 180;

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    if let Some(path) = &settings.png_path {
        if !path.exists() {
            warn!(path = %path.display(), "configured PNG does not exist; PNG downloads will 404");
        }
    }
    let jobs = JobStore::default();
    if let Some(ttl) = settings.job_ttl() {
        tokio::spawn(sweep_expired_jobs(jobs.clone(), ttl));
    }
    let state = AppState {
        jobs,
        png_path: settings.png_path.clone(),
        step_delay: settings.step_delay(),
    };
    let app = build_router(Arc::new(state), settings.max_upload_bytes);

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, "stub diagram backend listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/upload", post(upload_image))
        .route("/api/v1/process/:job_id", post(start_processing))
        .route("/api/v1/status/:job_id", get(job_status))
        .route("/api/v1/results/:job_id/mermaid", get(mermaid_result))
        .route("/api/v1/results/:job_id/png", get(png_result))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(state)
}

fn api_error(err: ApiException) -> (StatusCode, Json<ApiError>) {
    let status = match err.code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Conflict => StatusCode::CONFLICT,
    };
    (status, Json(err.into()))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
    })
}

async fn upload_image(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(ApiException::validation(e.to_string())))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        if !content_type.starts_with("image/") {
            return Err(api_error(ApiException::validation("File must be an image")));
        }
        let file_name = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("upload")
            .to_string();
        if file_name.len() > MAX_FILENAME_BYTES {
            return Err(api_error(ApiException::validation("filename is too long")));
        }
        let file_name = sanitize_file_name(&file_name);

        let bytes = field.bytes().await.map_err(|e| {
            error!(error = %e, "failed to read upload body");
            api_error(ApiException::validation(e.to_string()))
        })?;
        if bytes.is_empty() {
            return Err(api_error(ApiException::validation("uploaded file is empty")));
        }

        let job_id = state
            .jobs
            .create(&file_name, &content_type, bytes.len())
            .await;
        return Ok(Json(UploadResponse {
            next_step: Some(protocol::process_path(&job_id)),
            job_id: Some(job_id),
            filename: Some(file_name),
            message: Some("Upload successful".into()),
        }));
    }

    Err(api_error(ApiException::validation(format!(
        "missing '{UPLOAD_FIELD}' field"
    ))))
}

/// Keeps only the last path component of a client-supplied name.
fn sanitize_file_name(raw: &str) -> String {
    raw.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "..")
        .unwrap_or("upload")
        .to_string()
}

async fn start_processing(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<ProcessResponse>> {
    let job_id = JobId::new(job_id);
    state.jobs.begin(&job_id).await.map_err(api_error)?;
    tokio::spawn(run_stub_pipeline(
        state.jobs.clone(),
        job_id.clone(),
        state.step_delay,
    ));
    Ok(Json(ProcessResponse {
        job_id,
        status: PIPELINE_STAGES[0].to_string(),
    }))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let status = state
        .jobs
        .status(&JobId::new(job_id))
        .await
        .map_err(api_error)?;
    Ok(Json(status))
}

async fn mermaid_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let job_id = JobId::new(job_id);
    if state.jobs.get(&job_id).await.is_none() {
        return Err(api_error(job_not_found(&job_id)));
    }
    let source = state.jobs.mermaid(&job_id).await.map_err(api_error)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"flowchart.mmd\"",
            ),
        ],
        source,
    ))
}

async fn png_result(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let not_generated = || api_error(ApiException::not_found("Diagram not found or not yet generated"));

    let job_id = JobId::new(job_id);
    let completed = state
        .jobs
        .get(&job_id)
        .await
        .is_some_and(|record| record.is_completed());
    let Some(path) = state.png_path.as_ref().filter(|_| completed) else {
        return Err(not_generated());
    };

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        warn!(%job_id, path = %path.display(), error = %e, "configured PNG could not be read");
        not_generated()
    })?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"flowchart.png\"",
            ),
        ],
        bytes,
    ))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
