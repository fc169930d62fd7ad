use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::signal;

use crate::{
    explain::{explain_or_placeholder, ExplanationProvider},
    extract::DocumentFormat,
    ranking::{
        Candidate, CandidateOutcome, OutcomeStatus, RankError, RankingReport, RankingService,
    },
    semantic::EmbeddingError,
};

#[derive(Clone)]
pub struct SharedState {
    pub service: Arc<RankingService>,
    pub explainer: Arc<dyn ExplanationProvider>,
}

pub fn router(state: SharedState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/rank", post(rank))
        .route("/api/explain", post(explain))
        .route("/api/index", get(index_stats))
        .route("/api/index/clear", post(clear_index))
        .route("/api/index/:id", delete(remove_entry))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(Arc::new(state))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::warn!("received Ctrl+C, shutting down"),
        _ = terminate => log::warn!("received SIGTERM, shutting down"),
    }
}

async fn start_app(state: SharedState, addr: &str, max_body_bytes: usize) -> anyhow::Result<()> {
    let app = router(state, max_body_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn start_daemon(state: SharedState, addr: &str, max_body_bytes: usize) -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { start_app(state, addr, max_body_bytes).await })
}

#[derive(Debug)]
struct HttpError(RankError);

// Tell axum how to convert `RankError` into a response.
impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self.0 {
            RankError::InvalidInput(_) => axum::http::StatusCode::BAD_REQUEST,
            RankError::NoUsableInput { .. } => axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            RankError::Provider(EmbeddingError::EmptyInput { .. }) => {
                axum::http::StatusCode::BAD_REQUEST
            }
            RankError::Provider(_) | RankError::Cancelled { .. } => {
                log::error!("{self:?}");
                axum::http::StatusCode::SERVICE_UNAVAILABLE
            }
            _ => {
                log::error!("{self:?}");
                axum::http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = match &self.0 {
            RankError::NoUsableInput { outcomes } => {
                json!({"error": self.0.to_string(), "outcomes": outcomes})
            }
            other => json!({"error": other.to_string()}),
        };

        (status, Json(body)).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<RankError>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    /// Base64 encoded file bytes
    pub content: String,
    /// Declared format, overrides detection from the filename
    pub format: Option<DocumentFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RankRequest {
    pub job_description: String,
    #[serde(default)]
    pub files: Vec<UploadedFile>,
    pub top_k: Option<usize>,
}

async fn rank(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<RankRequest>,
) -> Result<Json<RankingReport>, HttpError> {
    log::debug!(
        "rank request: {} files, top_k={:?}",
        payload.files.len(),
        payload.top_k
    );

    // files that cannot be decoded are reported like any other unusable
    // candidate, at their upload position
    let mut candidates = Vec::with_capacity(payload.files.len());
    let mut rejected = Vec::new();
    for (i, file) in payload.files.into_iter().enumerate() {
        let filename = if file.filename.trim().is_empty() {
            format!("resume_{i}")
        } else {
            file.filename
        };

        match STANDARD.decode(file.content.trim()) {
            Ok(bytes) => {
                let candidate = Candidate::new(filename, bytes);
                candidates.push(match file.format {
                    Some(format) => candidate.with_format(format),
                    None => candidate,
                });
            }
            Err(e) => {
                log::warn!("Skipping {}: invalid base64: {}", filename, e);
                rejected.push((
                    i,
                    CandidateOutcome {
                        id: filename,
                        status: OutcomeStatus::Skipped {
                            reason: format!("invalid base64: {e}"),
                        },
                    },
                ));
            }
        }
    }

    if candidates.is_empty() && !rejected.is_empty() {
        if payload.job_description.trim().is_empty() {
            return Err(RankError::invalid_input("job description cannot be empty").into());
        }
        return Err(RankError::NoUsableInput {
            outcomes: rejected.into_iter().map(|(_, outcome)| outcome).collect(),
        }
        .into());
    }

    let service = state.service.clone();
    let result = tokio::task::spawn_blocking(move || {
        service.rank_with(
            &payload.job_description,
            candidates,
            payload.top_k,
            &Default::default(),
        )
    })
    .await
    .map_err(|e| RankError::Internal(format!("ranking task failed: {e}")))?;

    let report = match result {
        Ok(mut report) => {
            merge_outcomes(&mut report.outcomes, rejected);
            report
        }
        Err(RankError::NoUsableInput { mut outcomes }) => {
            merge_outcomes(&mut outcomes, rejected);
            return Err(RankError::NoUsableInput { outcomes }.into());
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Json(report))
}

/// Put outcomes of files rejected before ranking back at their upload
/// positions. `rejected` is in ascending position order.
fn merge_outcomes(outcomes: &mut Vec<CandidateOutcome>, rejected: Vec<(usize, CandidateOutcome)>) {
    for (position, outcome) in rejected {
        let position = position.min(outcomes.len());
        outcomes.insert(position, outcome);
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainRequest {
    pub job_description: String,
    /// Resume text to explain. When absent, `resume_id` is looked up in the
    /// persistent index.
    pub resume_text: Option<String>,
    pub resume_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExplainResponse {
    pub explanation: String,
    pub degraded: bool,
}

async fn explain(
    State(state): State<Arc<SharedState>>,
    Json(payload): Json<ExplainRequest>,
) -> Result<Json<ExplainResponse>, HttpError> {
    if payload.job_description.trim().is_empty() {
        return Err(RankError::invalid_input("job description cannot be empty").into());
    }

    let resume_text = match (payload.resume_text, payload.resume_id) {
        (Some(text), _) if !text.trim().is_empty() => text,
        (_, Some(id)) => state.service.stored_text(&id).ok_or_else(|| {
            RankError::invalid_input(format!("no indexed resume with id '{id}'"))
        })?,
        _ => return Err(RankError::invalid_input("resume_text or resume_id is required").into()),
    };
    let job_description = payload.job_description;

    let explainer = state.explainer.clone();
    let explanation = tokio::task::spawn_blocking(move || {
        explain_or_placeholder(
            explainer.as_ref(),
            &job_description,
            &resume_text,
        )
    })
    .await
    .map_err(|e| RankError::Internal(format!("explanation task failed: {e}")))?;

    Ok(Json(ExplainResponse {
        explanation: explanation.text,
        degraded: explanation.degraded,
    }))
}

async fn index_stats(State(state): State<Arc<SharedState>>) -> impl IntoResponse {
    Json(state.service.stats())
}

async fn clear_index(
    State(state): State<Arc<SharedState>>,
) -> Result<impl IntoResponse, HttpError> {
    let service = state.service.clone();
    let removed = tokio::task::spawn_blocking(move || service.clear_index())
        .await
        .map_err(|e| RankError::Internal(format!("clear task failed: {e}")))??;

    Ok(Json(json!({ "removed": removed })))
}

async fn remove_entry(
    State(state): State<Arc<SharedState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, HttpError> {
    let service = state.service.clone();
    let lookup = id.clone();
    let removed = tokio::task::spawn_blocking(move || service.remove_entry(&lookup))
        .await
        .map_err(|e| RankError::Internal(format!("remove task failed: {e}")))??;

    if !removed {
        return Err(RankError::invalid_input(format!("no indexed resume with id '{id}'")).into());
    }

    Ok(Json(json!({ "removed": id })))
}
