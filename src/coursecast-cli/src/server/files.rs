//! Storage housekeeping, uploads, user settings and course templates.

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use coursecast_core::settings::{UserSettings, course_templates, load_settings, save_settings};
use coursecast_core::store::{FileInfo, StorageStats, UploadedFile};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::error::ApiError;
use super::state::AppState;

const UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;
/// Conversations idle longer than this are closed by a cleanup request.
const CONVERSATION_MAX_AGE_HOURS: i64 = 24;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/files/stats", get(storage_stats))
        .route("/api/files/cleanup", post(cleanup))
        .route("/api/files/info", get(file_info))
        .route(
            "/api/upload",
            post(upload).layer(DefaultBodyLimit::max(UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/course-templates", get(templates))
}

async fn storage_stats(State(state): State<AppState>) -> Json<StorageStats> {
    Json(state.store.storage_stats())
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CleanupBody {
    #[serde(alias = "maxAge")]
    max_age: u64,
}

impl Default for CleanupBody {
    fn default() -> Self {
        Self { max_age: 30 }
    }
}

async fn cleanup(State(state): State<AppState>, body: Option<Json<CleanupBody>>) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let removed_files = state.store.cleanup_old_files(body.max_age)?;
    let closed_conversations = state.conversations.cleanup_older_than(CONVERSATION_MAX_AGE_HOURS);
    info!(removed_files, closed_conversations, "Storage cleanup finished");
    Ok(Json(json!({
        "removed_files": removed_files,
        "closed_conversations": closed_conversations,
        "max_age_days": body.max_age,
    })))
}

#[derive(Debug, Deserialize)]
pub struct FileInfoParams {
    #[serde(default)]
    path: String,
}

async fn file_info(State(state): State<AppState>, Query(params): Query<FileInfoParams>) -> Result<Json<FileInfo>, ApiError> {
    if params.path.trim().is_empty() {
        return Err(ApiError::bad_request("No file path provided"));
    }
    Ok(Json(state.store.file_info(&params.path)?))
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadedFile>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        if file_name.trim().is_empty() {
            return Err(ApiError::bad_request("No file selected"));
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?;
        return Ok(Json(state.store.upload_to_temp(&file_name, &bytes)?));
    }
    Err(ApiError::bad_request("No file provided"))
}

async fn get_settings(State(state): State<AppState>) -> Result<Json<UserSettings>, ApiError> {
    Ok(Json(load_settings(state.store.root())?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(settings): Json<UserSettings>,
) -> Result<Json<Value>, ApiError> {
    save_settings(state.store.root(), &settings)?;
    info!("User settings saved");
    Ok(Json(json!({
        "message": "Settings saved successfully",
        "settings": settings,
    })))
}

async fn templates() -> Json<Value> {
    let templates = course_templates();
    Json(json!({
        "total": templates.len(),
        "templates": templates,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::testing;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_settings_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());

        let Json(mut settings) = get_settings(State(state.clone())).await.unwrap();
        assert_eq!(settings, UserSettings::default());

        settings.tts.voice = "am_adam".to_string();
        update_settings(State(state.clone()), Json(settings)).await.unwrap();
        let Json(saved) = get_settings(State(state)).await.unwrap();
        assert_eq!(saved.tts.voice, "am_adam");
    }

    #[tokio::test]
    async fn test_file_info_requires_path() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let err = file_info(State(state.clone()), Query(FileInfoParams { path: " ".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let Json(info) = file_info(State(state), Query(FileInfoParams { path: "index.json".into() }))
            .await
            .unwrap();
        assert_eq!(info.name, "index.json");
    }

    #[tokio::test]
    async fn test_cleanup_defaults_to_thirty_days() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        std::fs::write(dir.path().join("temp").join("fresh.wav"), b"RIFF").unwrap();

        let Json(result) = cleanup(State(state), None).await.unwrap();
        assert_eq!(result["max_age_days"], 30);
        assert_eq!(result["removed_files"], 0);
        assert!(dir.path().join("temp").join("fresh.wav").exists());
    }

    #[tokio::test]
    async fn test_templates_are_listed() {
        let Json(body) = templates().await;
        assert!(body["total"].as_u64().unwrap() > 0);
        assert!(body["templates"][0]["id"].is_string());
    }
}
