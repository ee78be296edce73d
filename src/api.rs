//! HTTP surface: audio ingress and job queries.
//!
//! `POST /` accepts `{lang, model, data}` with base64 audio, transcodes to
//! canonical 16 kHz mono s16le WAV via ffmpeg, registers the job, and
//! publishes the file into the day layout. `GET /<auid>` reports one job;
//! `GET /` lists the most recent ones. Transient files live in the process
//! working directory, named by the fresh auid, and are always removed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::job::{Lang, Tier};
use crate::layout;
use crate::store::JobStore;

/// Cap on the recent-jobs listing.
const FETCH_MANY: i64 = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: JobStore,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", post(submit).get(list_recent))
        .route("/{auid}", get(job_status))
        .with_state(state)
}

/// Error half of every handler: a status code plus an `{"error": ...}` body.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request() -> ApiError {
        ApiError { status: StatusCode::BAD_REQUEST, message: "bad arguments".into() }
    }

    fn unsupported(message: impl Into<String>) -> ApiError {
        ApiError { status: StatusCode::UNSUPPORTED_MEDIA_TYPE, message: message.into() }
    }

    fn not_found() -> ApiError {
        ApiError { status: StatusCode::NOT_FOUND, message: "auid not found".into() }
    }

    fn db(err: anyhow::Error) -> ApiError {
        warn!(vid = "db", "{err:#}");
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "[DB] connector unavailable".into(),
        }
    }

    fn sys(err: impl std::fmt::Display) -> ApiError {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("[SYS] {err}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    lang: Option<String>,
    model: Option<String>,
    data: Option<String>,
}

/// Validated submission: known language and tier, decoded audio bytes.
fn validate(req: &SubmitRequest) -> Result<(Lang, Tier, Vec<u8>), ApiError> {
    let lang = req
        .lang
        .as_deref()
        .and_then(Lang::parse)
        .ok_or_else(ApiError::bad_request)?;
    let tier = req
        .model
        .as_deref()
        .and_then(Tier::parse)
        .ok_or_else(ApiError::bad_request)?;
    let data = req.data.as_deref().ok_or_else(ApiError::bad_request)?;
    let bytes = BASE64
        .decode(data.as_bytes())
        .map_err(|_| ApiError::unsupported("invalid base64 payload"))?;
    Ok((lang, tier, bytes))
}

/// `POST /` — accept a submission.
async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<Response, ApiError> {
    let (lang, tier, bytes) = validate(&req)?;

    let auid = Uuid::new_v4();
    let raw = PathBuf::from(auid.to_string());
    tokio::fs::write(&raw, &bytes).await.map_err(ApiError::sys)?;

    let result = ingest(&state, auid, lang, tier, &raw).await;
    // The temp source is deleted on every path.
    let _ = tokio::fs::remove_file(&raw).await;
    result
}

/// Transcode, register, and publish one submission.
async fn ingest(
    state: &AppState,
    auid: Uuid,
    lang: Lang,
    tier: Tier,
    raw: &Path,
) -> Result<Response, ApiError> {
    let wav = PathBuf::from(layout::audio_name(auid, lang, tier));

    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-v", "error", "-i"])
        .arg(raw)
        .args(["-ar", "16000", "-ac", "1", "-c:a", "pcm_s16le"])
        .arg(&wav)
        .output()
        .await
        .map_err(ApiError::sys)?;
    if !output.status.success() {
        let _ = tokio::fs::remove_file(&wav).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ApiError::unsupported(format!("[FFMPEG] {}", stderr.trim())));
    }

    let loaded = match state.store.create(auid, lang, tier).await {
        Ok(loaded) => loaded,
        Err(err) => {
            let _ = tokio::fs::remove_file(&wav).await;
            warn!(vid = "db", "{err:#}");
            return Err(ApiError {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "[DB] auid not created".into(),
            });
        }
    };

    let dest = layout::audio_path(&state.config.data_dir, auid, lang, tier, loaded);
    if let Err(err) = publish(&wav, &dest).await {
        let _ = tokio::fs::remove_file(&wav).await;
        return Err(ApiError::sys(err));
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "auid": auid, "status": "loaded" }))).into_response())
}

/// Move an artifact into its day directory: rename when the destination is
/// on the same filesystem, otherwise copy to a partial file and rename so
/// the canonical name only ever appears complete.
async fn publish(src: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(dir) = dest.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    if tokio::fs::rename(src, dest).await.is_ok() {
        return Ok(());
    }
    let partial = dest.with_extension("part");
    tokio::fs::copy(src, &partial).await?;
    tokio::fs::rename(&partial, dest).await?;
    tokio::fs::remove_file(src).await
}

/// `GET /<auid>` — status and, when terminal, the transcript or log.
async fn job_status(
    State(state): State<AppState>,
    UrlPath(auid): UrlPath<Uuid>,
) -> Result<Response, ApiError> {
    let detail = state.store.get(auid).await.map_err(ApiError::db)?;
    let detail = detail.ok_or_else(ApiError::not_found)?;

    let response = if let Some(result) = detail.result {
        (
            StatusCode::OK,
            Json(json!({ "auid": auid, "status": "success", "result": result })),
        )
    } else if detail.failed.is_some() {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "auid": auid, "status": "failed", "log": detail.log })),
        )
    } else if detail.processing.is_some() {
        (StatusCode::OK, Json(json!({ "auid": auid, "status": "processing" })))
    } else {
        (StatusCode::OK, Json(json!({ "auid": auid, "status": "loaded" })))
    };
    Ok(response.into_response())
}

/// `GET /` — the most recent jobs, oldest first.
async fn list_recent(State(state): State<AppState>) -> Result<Response, ApiError> {
    let rows = state.store.recent(FETCH_MANY).await.map_err(ApiError::db)?;
    if rows.is_empty() {
        return Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: "no data".into(),
        });
    }
    let body: Vec<serde_json::Value> = rows
        .iter()
        .rev()
        .map(|row| json!({ "auid": row.auid, "status": row.status() }))
        .collect();
    Ok(Json(body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(lang: Option<&str>, model: Option<&str>, data: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            lang: lang.map(String::from),
            model: model.map(String::from),
            data: data.map(String::from),
        }
    }

    #[test]
    fn validate_accepts_known_fields() {
        let (lang, tier, bytes) = validate(&req(Some("en"), Some("lev0"), Some("AAA="))).unwrap();
        assert_eq!(lang, Lang::En);
        assert_eq!(tier, Tier::Lev0);
        assert_eq!(bytes, vec![0, 0]);
    }

    #[test]
    fn validate_rejects_unknown_model_with_400() {
        let err = validate(&req(Some("en"), Some("lev9"), Some("AA=="))).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn validate_rejects_missing_fields_with_400() {
        for request in [
            req(None, Some("lev0"), Some("AA==")),
            req(Some("en"), None, Some("AA==")),
            req(Some("en"), Some("lev0"), None),
        ] {
            assert_eq!(validate(&request).unwrap_err().status, StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn validate_rejects_bad_base64_with_415() {
        let err = validate(&req(Some("en"), Some("lev0"), Some("@@@"))).unwrap_err();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn publish_moves_into_day_dir() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a_en_lev0.wav");
        tokio::fs::write(&src, b"RIFF").await.unwrap();
        let dest = dir.path().join("250307").join("a_en_lev0.wav");

        publish(&src, &dest).await.unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"RIFF");
    }
}
