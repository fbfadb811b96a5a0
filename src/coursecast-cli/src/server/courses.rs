//! Saved courses: listing, retrieval, deletion, export and import.

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use coursecast_core::CourseRecord;
use coursecast_core::store::{CourseMetadata, CourseQuery, CourseSort};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::error::ApiError;
use super::state::AppState;

const PPTX_MIME: &str = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
const IMPORT_LIMIT_BYTES: usize = 32 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/courses", get(list_courses))
        .route("/api/course/{session_id}", get(get_course).delete(delete_course))
        .route("/api/course/{session_id}/export", get(export_course))
        .route("/api/course/{session_id}/presentation", get(download_presentation))
        .route("/api/presentations", get(list_courses))
        .route("/api/presentation/{session_id}", get(download_presentation))
        .route("/api/presentation/{session_id}/metadata", get(course_metadata))
        .route(
            "/api/import-course",
            post(import_course).layer(DefaultBodyLimit::max(IMPORT_LIMIT_BYTES)),
        )
}

#[derive(Debug, Default, Deserialize)]
pub struct CourseListParams {
    sort_by: Option<String>,
    topic: Option<String>,
    complexity: Option<String>,
    /// Comma separated.
    tags: Option<String>,
    limit: Option<usize>,
}

impl CourseListParams {
    fn into_query(self) -> CourseQuery {
        CourseQuery {
            sort_by: self.sort_by.as_deref().map(CourseSort::parse).unwrap_or_default(),
            topic: self.topic.filter(|t| !t.trim().is_empty()),
            complexity: self.complexity.filter(|c| !c.trim().is_empty()),
            tags: self
                .tags
                .map(|tags| {
                    tags.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            limit: self.limit,
        }
    }
}

/// Attachment response for a file body.
pub(super) fn attachment(bytes: Vec<u8>, mime: &'static str, file_name: &str) -> Response {
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(mime));
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name.replace('"', ""))) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

/// A running session's course cannot be served until it completes.
fn ensure_finished(state: &AppState, session_id: &str) -> Result<(), ApiError> {
    match state.registry.get(session_id) {
        Some(record) if !record.status.is_terminal() => Err(ApiError::bad_request("Course generation not completed")),
        _ => Ok(()),
    }
}

fn load_course(state: &AppState, session_id: &str) -> Result<CourseRecord, ApiError> {
    ensure_finished(state, session_id)?;
    state
        .store
        .load_course_session(session_id)?
        .ok_or_else(|| ApiError::not_found("Course not found"))
}

async fn list_courses(State(state): State<AppState>, Query(params): Query<CourseListParams>) -> Json<Value> {
    let courses = state.store.list_courses(&params.into_query());
    Json(json!({
        "total": courses.len(),
        "courses": courses,
    }))
}

async fn get_course(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<CourseRecord>, ApiError> {
    load_course(&state, &session_id).map(Json)
}

async fn delete_course(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<Value>, ApiError> {
    // The conversation summary is written into the session dir, so close it first.
    state.conversations.end(&session_id);
    if !state.store.delete_course_session(&session_id)? {
        return Err(ApiError::not_found("Course not found"));
    }
    state.registry.remove(&session_id);
    state.hub.remove(&session_id);
    info!(session_id = %session_id, "Course deleted");

    Ok(Json(json!({
        "message": "Course deleted successfully",
        "session_id": session_id,
    })))
}

async fn course_metadata(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<CourseMetadata>, ApiError> {
    state
        .store
        .course_metadata(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Course not found"))
}

async fn export_course(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Response, ApiError> {
    load_course(&state, &session_id)?;
    let archive = state.store.export_course_zip(&session_id)?;
    let bytes = tokio::fs::read(&archive).await?;
    Ok(attachment(bytes, "application/zip", &format!("{}.zip", session_id)))
}

async fn download_presentation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, ApiError> {
    let course = load_course(&state, &session_id)?;
    let relative = course
        .presentation_file
        .as_deref()
        .ok_or_else(|| ApiError::not_found("No presentation file found"))?;
    let path = state.store.resolve_data_path(relative)?;
    if !path.is_file() {
        return Err(ApiError::not_found("Presentation file not found"));
    }

    let bytes = tokio::fs::read(&path).await?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("presentation.pptx")
        .to_string();
    Ok(attachment(bytes, PPTX_MIME, &file_name))
}

async fn import_course(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let mut payload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        if matches!(field.name(), Some("file") | Some("course")) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?;
            payload = Some(bytes);
        }
    }

    let bytes = payload.ok_or_else(|| ApiError::bad_request("No file provided"))?;
    let session_id = state.store.import_course_json(&bytes)?;
    Ok(Json(json!({
        "message": "Course imported successfully",
        "session_id": session_id,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::testing;
    use axum::http::StatusCode;
    use coursecast_core::request::{Complexity, LearningStyle};
    use coursecast_core::{CourseStore, GenerationRequest};

    fn save_course(store: &CourseStore, session_id: &str, topic: &str) {
        let record: CourseRecord = serde_json::from_value(json!({
            "session_id": session_id,
            "request": {
                "topic": topic,
                "complexity": "beginner",
                "duration": "10 minutes",
                "learning_style": "visual",
            },
            "course_structure": {"course_title": topic, "main_topics": []},
            "presentation_plan": {"presentation_title": topic, "slides": []},
            "slides": [],
            "created_at": "2026-01-05T10:00:00Z",
        }))
        .unwrap();
        store.save_course_session(&record).unwrap();
    }

    #[tokio::test]
    async fn test_presentation_metadata_route() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        save_course(&state.store, "m1", "Rust traits");

        let Json(metadata) = course_metadata(State(state.clone()), Path("m1".to_string())).await.unwrap();
        assert_eq!(metadata.session_id, "m1");

        let err = course_metadata(State(state), Path("missing".to_string())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_list_params_parse_tags_and_sort() {
        let params = CourseListParams {
            sort_by: Some("title".into()),
            tags: Some("ai, level-beginner,,".into()),
            topic: Some("  ".into()),
            ..CourseListParams::default()
        };
        let query = params.into_query();
        assert_eq!(query.sort_by, CourseSort::Title);
        assert_eq!(query.tags, vec!["ai".to_string(), "level-beginner".to_string()]);
        assert_eq!(query.topic, None);
    }

    #[tokio::test]
    async fn test_get_and_delete_course() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        save_course(&state.store, "c1", "Rust ownership");

        let Json(course) = get_course(State(state.clone()), Path("c1".to_string())).await.unwrap();
        assert_eq!(course.session_id, "c1");

        let Json(listed) = list_courses(State(state.clone()), Query(CourseListParams::default())).await;
        assert_eq!(listed["total"], 1);

        delete_course(State(state.clone()), Path("c1".to_string())).await.unwrap();
        let err = get_course(State(state.clone()), Path("c1".to_string())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = delete_course(State(state), Path("c1".to_string())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_running_course_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        state
            .registry
            .register(
                "busy",
                GenerationRequest::new("Rust", Complexity::Beginner, "5 minutes", LearningStyle::Visual),
            )
            .unwrap();

        let err = get_course(State(state), Path("busy".to_string())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_export_returns_zip_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        save_course(&state.store, "c2", "Databases");

        let response = export_course(State(state), Path("c2".to_string())).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert!(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .contains("c2.zip")
        );
    }
}
