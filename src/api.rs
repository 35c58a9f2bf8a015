//! HTTP surface over the [`Orchestrator`], mounted under `/api/v1`.
//!
//! | Method | Path | Returns |
//! |--------|------|---------|
//! | POST | `/upload` | `{session_id}` (multipart: `file`, `enable_vision`, `tts_provider`, `voice`) |
//! | GET | `/session/{id}/status` | [`SessionStatus`] |
//! | POST | `/session/{id}/cancel` | [`SessionStatus`], or 409 once terminal |
//! | GET | `/session/{id}/lecture` | [`crate::LectureBundle`] |
//! | GET | `/session/{id}/slide/{n}` | `image/png` |
//! | GET | `/session/{id}/audio/{n}` | audio bytes, content type per provider |
//! | GET | `/session/{id}/events` | SSE stream of [`SessionStatus`] |
//! | DELETE | `/session/{id}` | 204 |
//! | GET | `/sessions` | completed sessions, newest first |
//! | GET | `/tts/providers` | registered providers and voices |
//!
//! Errors are `{"error": "..."}` with a status from [`ErrorKind`]. Internal
//! failures are logged and answered with a generic message.

use crate::error::{ErrorKind, LectureError};
use crate::orchestrator::{Orchestrator, StartOptions, Upload};
use crate::session::SessionStatus;
use axum::extract::{
    ConnectInfo, DefaultBodyLimit, FromRef, FromRequestParts, Multipart, Path, State,
};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Multipart framing allowance on top of the file size limit.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Lecture(LectureError),
    BadRequest(String),
    PayloadTooLarge(String),
}

impl From<LectureError> for ApiError {
    fn from(e: LectureError) -> Self {
        ApiError::Lecture(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = match self {
            ApiError::BadRequest(msg) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::PayloadTooLarge(msg) => {
                return (StatusCode::PAYLOAD_TOO_LARGE, Json(json!({ "error": msg })))
                    .into_response()
            }
            ApiError::Lecture(err) => err,
        };

        let status = match err.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Pipeline | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", err);
            "Internal server error".to_string()
        } else {
            err.to_string()
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let LectureError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = err
        {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

// ── Client identity ──────────────────────────────────────────────────────────

/// The caller's IP.
///
/// The socket peer, unless the orchestrator's config trusts
/// `X-Forwarded-For`, in which case its first hop wins when present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity(pub String);

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .map(str::trim)
        .find(|hop| !hop.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    Orchestrator: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let trusted = Orchestrator::from_ref(state).config().trust_forwarded_for;
        let ip = trusted
            .then(|| forwarded_for(&parts.headers))
            .flatten()
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        Ok(ClientIdentity(ip))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
}

fn parse_flag(value: &str) -> Result<bool, ApiError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        other => Err(ApiError::BadRequest(format!(
            "enable_vision must be true or false, got '{other}'"
        ))),
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(format!("Multipart error: {}", e.body_text()))
    }
}

async fn upload(
    State(orchestrator): State<Orchestrator>,
    ClientIdentity(client): ClientIdentity,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut options = StartOptions::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((filename, bytes.to_vec()));
            }
            "enable_vision" => {
                let text = field.text().await.map_err(multipart_error)?;
                options.enable_vision = Some(parse_flag(&text)?);
            }
            "tts_provider" => {
                options.tts_provider = Some(field.text().await.map_err(multipart_error)?);
            }
            "voice" => {
                options.voice = Some(field.text().await.map_err(multipart_error)?);
            }
            _ => {}
        }
    }

    let (filename, bytes) =
        file.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;
    let session_id = orchestrator
        .start(
            Upload {
                filename,
                bytes,
                client,
            },
            options,
        )
        .await?;
    info!(session = %session_id, "Upload accepted");
    Ok(Json(UploadResponse { session_id }))
}

async fn status(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(orchestrator.get_status(&id)?))
}

async fn cancel(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatus>, ApiError> {
    Ok(Json(orchestrator.cancel(&id)?))
}

async fn lecture(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(orchestrator.get_lecture(&id)?).into_response())
}

async fn file_response(path: std::path::PathBuf, mime: &str) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| LectureError::io(path, e))?;
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}

async fn slide_image(
    State(orchestrator): State<Orchestrator>,
    Path((id, n)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let path = orchestrator.slide_image_path(&id, n).await?;
    file_response(path, "image/png").await
}

async fn slide_audio(
    State(orchestrator): State<Orchestrator>,
    Path((id, n)): Path<(String, usize)>,
) -> Result<Response, ApiError> {
    let (path, mime) = orchestrator.audio_path(&id, n)?;
    file_response(path, &mime).await
}

async fn events(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let stream = orchestrator.events(&id)?.map(|status| {
        let data = serde_json::to_string(&status).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().event("status").data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn delete_session(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    orchestrator.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sessions(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    Json(orchestrator.list_sessions())
}

async fn tts_providers(State(orchestrator): State<Orchestrator>) -> impl IntoResponse {
    Json(orchestrator.tts_providers())
}

/// The full router, with request tracing and an upload body limit.
pub fn router(orchestrator: Orchestrator) -> Router {
    let body_limit = usize::try_from(orchestrator.config().max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/upload", post(upload))
        .route("/session/{id}/status", get(status))
        .route("/session/{id}/cancel", post(cancel))
        .route("/session/{id}/lecture", get(lecture))
        .route("/session/{id}/slide/{n}", get(slide_image))
        .route("/session/{id}/audio/{n}", get(slide_audio))
        .route("/session/{id}/events", get(events))
        .route("/session/{id}", delete(delete_session))
        .route("/sessions", get(list_sessions))
        .route("/tts/providers", get(tts_providers));

    Router::new()
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}
