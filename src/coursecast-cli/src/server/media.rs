//! Speech synthesis, transcription and media file serving.

use std::path::{Path as FsPath, PathBuf};

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderValue, header};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use coursecast_core::speech::slide_audio_file_name;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::error::ApiError;
use super::state::AppState;

const AUDIO_UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/tts/voices", get(list_voices))
        .route("/api/audio/voices", get(list_voices))
        .route("/api/tts/synthesize", post(synthesize))
        .route("/api/audio/generate", post(generate_slide_audio))
        .route(
            "/api/stt/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(AUDIO_UPLOAD_LIMIT_BYTES)),
        )
        .route(
            "/api/audio/transcribe",
            post(transcribe).layer(DefaultBodyLimit::max(AUDIO_UPLOAD_LIMIT_BYTES)),
        )
        .route("/api/audio/file/{*path}", get(serve_audio))
        .route("/api/images/{*path}", get(serve_image))
}

/// Read an uploaded audio field out of a multipart body.
pub(super) async fn read_audio_field(multipart: &mut Multipart) -> Result<Option<(Vec<u8>, String)>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() == Some("audio") {
            let file_name = field.file_name().unwrap_or("recording.webm").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::bad_request(format!("Failed reading multipart field: {e}")))?;
            return Ok(Some((bytes.to_vec(), file_name)));
        }
    }
    Ok(None)
}

fn mime_for(path: &FsPath) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "webm" => "audio/webm",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn file_response(path: &FsPath) -> Result<Response, ApiError> {
    let bytes = tokio::fs::read(path).await?;
    let mut response = Response::new(Body::from(bytes));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(mime_for(path)));
    Ok(response)
}

/// Resolve a client path inside the data dir and require an existing file.
fn data_file(state: &AppState, raw: &str, what: &str) -> Result<PathBuf, ApiError> {
    let path = state.store.resolve_data_path(&raw.replace('\\', "/"))?;
    if !path.is_file() {
        return Err(ApiError::not_found(format!("{what} not found")));
    }
    Ok(path)
}

async fn list_voices(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let voices = state.speech.voices().await?;
    Ok(Json(json!({
        "voices": voices,
        "default_voice": state.config.speech.default_voice,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SynthesizeBody {
    #[serde(default)]
    text: String,
    voice: Option<String>,
    speed: Option<f32>,
}

async fn synthesize(State(state): State<AppState>, Json(body): Json<SynthesizeBody>) -> Result<Response, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::bad_request("No text provided"));
    }
    let voice = body.voice.unwrap_or_else(|| state.config.speech.default_voice.clone());
    let path = state
        .speech
        .synthesize_adhoc(&state.store.temp_dir(), &body.text, &voice, body.speed.unwrap_or(1.0))
        .await?;
    file_response(&path).await
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SlideAudioData {
    #[serde(alias = "narration", alias = "transcript")]
    text: String,
    #[serde(alias = "slideNumber")]
    slide_number: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AudioOptions {
    voice: Option<String>,
    speed: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateAudioBody {
    #[serde(default, alias = "sessionId")]
    session_id: Option<String>,
    #[serde(alias = "slideData")]
    slide_data: Option<SlideAudioData>,
    #[serde(default)]
    options: AudioOptions,
}

/// Narrate one slide. With a session and slide number the WAV lands in the
/// session's audio folder, otherwise in the temp cache.
async fn generate_slide_audio(
    State(state): State<AppState>,
    Json(body): Json<GenerateAudioBody>,
) -> Result<Response, ApiError> {
    let slide = body
        .slide_data
        .filter(|s| !s.text.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("No slide data provided"))?;
    let voice = body
        .options
        .voice
        .unwrap_or_else(|| state.config.speech.default_voice.clone());
    let speed = body.options.speed.unwrap_or(1.0);

    let path = match (body.session_id.as_deref(), slide.slide_number) {
        (Some(session_id), Some(number)) if !session_id.is_empty() => {
            let dirs = state.store.session_dirs(session_id)?;
            let target = dirs.audio.join(slide_audio_file_name(number));
            info!(session_id, slide = number, "Generating slide audio");
            state.speech.synthesize_to_file(&slide.text, &voice, speed, &target).await?
        }
        _ => {
            state
                .speech
                .synthesize_adhoc(&state.store.temp_dir(), &slide.text, &voice, speed)
                .await?
        }
    };
    file_response(&path).await
}

async fn transcribe(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<Value>, ApiError> {
    let (audio, file_name) = read_audio_field(&mut multipart)
        .await?
        .ok_or_else(|| ApiError::bad_request("No audio file provided"))?;
    debug!(bytes = audio.len(), file_name = %file_name, "Transcribing upload");
    let transcription = state.transcriber.transcribe(audio, &file_name).await?;
    Ok(Json(json!({ "transcription": transcription })))
}

async fn serve_audio(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response, ApiError> {
    let path = data_file(&state, &path, "Audio file")?;
    file_response(&path).await
}

async fn serve_image(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response, ApiError> {
    let path = data_file(&state, &path, "Image")?;
    file_response(&path).await
}
