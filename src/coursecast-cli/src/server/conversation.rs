//! Live Q&A about the slide on screen.

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use coursecast_core::conversation::{AnswerVoice, Conversation};
use coursecast_core::SlideContext;
use serde::Deserialize;
use serde_json::{Value, json};

use super::error::ApiError;
use super::state::AppState;

const VOICE_UPLOAD_LIMIT_BYTES: usize = 32 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/conversation/start", post(start_conversation))
        .route("/api/conversation/ask", post(ask_question))
        .route(
            "/api/conversation/{session_id}/voice",
            post(ask_by_voice).layer(DefaultBodyLimit::max(VOICE_UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/conversation/{session_id}/history", get(history))
        .route("/api/conversation/{session_id}/context", put(update_context))
        .route("/api/conversation/{session_id}/end", post(end_conversation))
}

/// Slide context as sent by the player. The screenshot itself is not kept.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SlideContextBody {
    transcript: Option<String>,
    title: Option<String>,
    #[serde(alias = "slideNumber")]
    slide_number: Option<u32>,
    screenshot: Option<String>,
    #[serde(alias = "slide_image_url")]
    image_url: Option<String>,
}

impl From<SlideContextBody> for SlideContext {
    fn from(body: SlideContextBody) -> Self {
        SlideContext {
            transcript: body.transcript,
            title: body.title,
            slide_number: body.slide_number,
            has_screenshot: body.screenshot.is_some_and(|s| !s.is_empty()) || body.image_url.is_some(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartBody {
    #[serde(alias = "sessionId")]
    session_id: String,
    #[serde(alias = "slideContext")]
    slide_context: SlideContextBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AskBody {
    #[serde(alias = "sessionId")]
    session_id: String,
    question: String,
    #[serde(alias = "slideContext")]
    slide_context: SlideContextBody,
}

fn require_session(session_id: &str) -> Result<(), ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::bad_request("No session_id provided"));
    }
    Ok(())
}

async fn start_conversation(State(state): State<AppState>, Json(body): Json<StartBody>) -> Result<Json<Value>, ApiError> {
    require_session(&body.session_id)?;
    let id = state.conversations.start(&body.session_id, body.slide_context.into());
    Ok(Json(json!({ "conversation_session_id": id })))
}

async fn ask_question(State(state): State<AppState>, Json(body): Json<AskBody>) -> Result<Json<Value>, ApiError> {
    if body.question.trim().is_empty() {
        return Err(ApiError::bad_request("No question provided"));
    }
    require_session(&body.session_id)?;
    let context: SlideContext = body.slide_context.into();
    let response = state
        .conversations
        .ask(&body.session_id, &body.question, &context)
        .await?;
    Ok(Json(json!({ "response": response })))
}

/// Multipart: `audio` (required), optional `slide_context` JSON, `voice` and `speed`.
async fn ask_by_voice(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let mut audio = None;
    let mut context = SlideContextBody::default();
    let mut voice = state.config.speech.default_voice.clone();
    let mut speed = 1.0_f32;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                let file_name = field.file_name().unwrap_or("question.webm").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed reading audio: {e}")))?;
                audio = Some((bytes.to_vec(), file_name));
            }
            "slide_context" | "slideContext" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed reading slide context: {e}")))?;
                context = serde_json::from_str(&text)
                    .map_err(|e| ApiError::bad_request(format!("Invalid slide context: {e}")))?;
            }
            "voice" => {
                if let Ok(text) = field.text().await
                    && !text.trim().is_empty()
                {
                    voice = text.trim().to_string();
                }
            }
            "speed" => {
                if let Ok(text) = field.text().await {
                    speed = text.trim().parse().unwrap_or(1.0);
                }
            }
            _ => {}
        }
    }

    let (bytes, file_name) = audio.ok_or_else(|| ApiError::bad_request("No audio file provided"))?;
    let audio_dir = state.store.temp_dir();
    let answer = state
        .conversations
        .ask_spoken(
            &session_id,
            bytes,
            &file_name,
            &context.into(),
            state.transcriber.as_ref(),
            &state.speech,
            AnswerVoice {
                audio_dir: &audio_dir,
                voice: &voice,
                speed,
            },
        )
        .await?;

    let audio_url = answer
        .audio_path
        .as_deref()
        .map(|p| format!("/api/audio/file/{}", state.store.relative_path(p)));
    Ok(Json(json!({
        "question": answer.question,
        "answer": answer.answer,
        "audio_url": audio_url,
    })))
}

async fn history(State(state): State<AppState>, Path(session_id): Path<String>) -> Json<Conversation> {
    Json(state.conversations.history(&session_id))
}

/// The player moved to another slide.
async fn update_context(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SlideContextBody>,
) -> Result<Json<Value>, ApiError> {
    let context: SlideContext = body.into();
    if !state.conversations.update_context(&session_id, &context) {
        return Err(ApiError::not_found("No active conversation"));
    }
    Ok(Json(json!({ "message": "Slide context updated" })))
}

async fn end_conversation(State(state): State<AppState>, Path(session_id): Path<String>) -> Json<Value> {
    let ended = state.conversations.end(&session_id);
    Json(json!({
        "message": if ended { "Conversation ended successfully" } else { "No active conversation" },
        "ended": ended,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::state::testing;
    use axum::http::StatusCode;

    fn ask_body(session_id: &str, question: &str) -> AskBody {
        serde_json::from_value(json!({
            "sessionId": session_id,
            "question": question,
            "slideContext": {"transcript": "Closures capture their environment.", "screenshot": "iVBORw0"},
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_context_update_needs_active_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let slide: SlideContextBody =
            serde_json::from_value(json!({"title": "Iterators", "slideNumber": 4})).unwrap();

        let err = update_context(State(state.clone()), Path("c9".to_string()), Json(slide))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        state.conversations.start("c9", SlideContext::default());
        let slide: SlideContextBody =
            serde_json::from_value(json!({"title": "Iterators", "slideNumber": 4})).unwrap();
        update_context(State(state.clone()), Path("c9".to_string()), Json(slide))
            .await
            .unwrap();
        let Json(conversation) = history(State(state), Path("c9".to_string())).await;
        assert_eq!(conversation.slide_context.title.as_deref(), Some("Iterators"));
        assert_eq!(conversation.slide_context.slide_number, Some(4));
    }

    #[test]
    fn test_screenshot_only_sets_flag() {
        let body: SlideContextBody = serde_json::from_value(json!({"slideNumber": 3, "screenshot": "abc"})).unwrap();
        let context = SlideContext::from(body);
        assert!(context.has_screenshot);
        assert_eq!(context.slide_number, Some(3));
    }

    #[tokio::test]
    async fn test_ask_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());

        let Json(reply) = ask_question(State(state.clone()), Json(ask_body("c1", "What is a closure?")))
            .await
            .unwrap();
        assert!(reply["response"].as_str().unwrap().contains("closure"));

        let Json(conversation) = history(State(state.clone()), Path("c1".to_string())).await;
        assert_eq!(conversation.messages.len(), 2);
        assert!(conversation.slide_context.has_screenshot);

        let Json(ended) = end_conversation(State(state.clone()), Path("c1".to_string())).await;
        assert_eq!(ended["ended"], true);
        let Json(ended) = end_conversation(State(state), Path("c1".to_string())).await;
        assert_eq!(ended["ended"], false);
    }

    #[tokio::test]
    async fn test_empty_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let err = ask_question(State(state), Json(ask_body("c1", "   "))).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_start_requires_session() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(dir.path());
        let err = start_conversation(State(state.clone()), Json(StartBody::default()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let body: StartBody = serde_json::from_value(json!({"sessionId": "c2"})).unwrap();
        let Json(reply) = start_conversation(State(state), Json(body)).await.unwrap();
        assert_eq!(reply["conversation_session_id"], "c2");
    }
}
