//! Course generation and live session inspection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use coursecast_core::progress::ProgressStatus;
use coursecast_core::request::missing_fields;
use coursecast_core::sessions::{SessionRecord, lock_tracker};
use coursecast_core::store::log_summary;
use coursecast_core::{GenerationRequest, GenerationStarted};
use serde_json::{Value, json};
use tracing::info;

use super::error::ApiError;
use super::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/api/test-validation", post(test_validation))
        .route("/api/generate-course", post(generate_course))
        .route("/api/session/{session_id}/status", get(session_status))
        .route("/api/session/{session_id}/progress/detailed", get(detailed_progress))
        .route("/api/session/{session_id}/progress/statistics", get(progress_statistics))
        .route("/api/session/{session_id}/progress/stages", get(progress_stages))
        .route("/api/session/{session_id}/logs", get(session_logs))
        .route("/api/session/{session_id}/transcripts", get(session_transcripts))
}

async fn index(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "system": "coursecast",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.list().iter().filter(|s| !s.status.is_terminal()).count(),
        "active_conversations": state.conversations.active_count(),
        "timestamp": Utc::now(),
    }))
}

async fn test_validation(Json(body): Json<Value>) -> Response {
    let missing = missing_fields(&body);
    if missing.is_empty() {
        Json(json!({
            "valid": true,
            "message": "All required fields present",
            "received_data": body,
        }))
        .into_response()
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "valid": false,
                "missing_fields": missing,
                "received_data": body,
            })),
        )
            .into_response()
    }
}

async fn generate_course(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<GenerationStarted>, ApiError> {
    let request = GenerationRequest::from_json(body)?;
    info!(topic = %request.topic, complexity = %request.complexity.as_str(), "Received course generation request");
    Ok(Json(state.generation.start(request)?))
}

async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    state
        .registry
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Session not found"))
}

fn tracker_status(state: &AppState, session_id: &str) -> Result<ProgressStatus, ApiError> {
    let tracker = state
        .registry
        .tracker(session_id)
        .ok_or_else(|| ApiError::not_found("Progress tracker not found for session"))?;
    let status = lock_tracker(&tracker).status();
    Ok(status)
}

async fn detailed_progress(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = tracker_status(&state, &session_id)?;
    Ok(Json(serde_json::to_value(status).map_err(|e| ApiError::internal(e.to_string()))?))
}

async fn progress_statistics(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = tracker_status(&state, &session_id)?;
    let stats = &status.statistics;
    let tokens_per_second = stats.total_tokens_used as f64 / status.timing.elapsed_time_seconds.max(1.0);

    Ok(Json(json!({
        "session_id": session_id,
        "statistics": stats,
        "timing": status.timing,
        "performance_metrics": {
            "slides_per_minute": stats.avg_slides_per_minute,
            "images_per_minute": stats.avg_images_per_minute,
            "processing_speed": stats.processing_speed,
            "api_efficiency": {
                "total_calls": stats.api_calls_made,
                "tokens_per_second": tokens_per_second,
            },
        },
    })))
}

async fn progress_stages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = tracker_status(&state, &session_id)?;
    let breakdown: Vec<Value> = status
        .stages_summary
        .iter()
        .map(|stage| {
            let phase = if stage.completed {
                "completed"
            } else if stage.progress > 0.0 {
                "in_progress"
            } else {
                "pending"
            };
            json!({
                "stage_name": stage.name,
                "completed": stage.completed,
                "progress_percentage": stage.progress,
                "status": phase,
            })
        })
        .collect();

    Ok(Json(json!({
        "session_id": session_id,
        "current_stage": status.current_stage,
        "all_stages": status.stages_summary,
        "progress_breakdown": breakdown,
    })))
}

async fn session_logs(State(state): State<AppState>, Path(session_id): Path<String>) -> Result<Json<Value>, ApiError> {
    let logs = state.store.session_logs(&session_id)?;
    let summary = log_summary(&logs);
    Ok(Json(json!({
        "session_id": session_id,
        "logs": logs,
        "summary": summary,
    })))
}

async fn session_transcripts(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let transcripts = state.store.session_transcripts(&session_id)?;
    Ok(Json(json!({
        "session_id": session_id,
        "total_transcripts": transcripts.len(),
        "transcripts": transcripts,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::testing;

    fn request_body(session_id: &str) -> Value {
        json!({
            "session_id": session_id,
            "topic": "Rust closures",
            "complexity": "beginner",
            "duration": "10 minutes",
            "learningStyle": "visual",
        })
    }

    #[tokio::test]
    async fn test_validation_reports_missing_fields() {
        let response = test_validation(Json(json!({"topic": "Rust"}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = test_validation(Json(request_body("s1"))).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_generate_rejects_incomplete_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let err = generate_course(State(state), Json(json!({"topic": "Rust"})))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("complexity"));
    }

    #[tokio::test]
    async fn test_generate_registers_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let Json(started) = generate_course(State(state.clone()), Json(request_body("web-1")))
            .await
            .unwrap();
        assert_eq!(started.session_id, "web-1");
        assert_eq!(started.status, "started");

        let Json(record) = session_status(State(state.clone()), Path("web-1".to_string()))
            .await
            .unwrap();
        assert_eq!(record.request.topic, "Rust closures");

        let Json(stages) = progress_stages(State(state), Path("web-1".to_string())).await.unwrap();
        assert_eq!(stages["all_stages"].as_array().map(Vec::len), Some(8));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let err = session_status(State(state.clone()), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = detailed_progress(State(state), Path("missing".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
