//! Error types for the course generation system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CourseError {
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid request: {0}")]
    ValidationError(String),

    #[error("Could not parse model output: {0}")]
    ParseError(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("TTS error: {0}")]
    TtsError(String),

    #[error("Transcription error: {0}")]
    SttError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Session {0} is already running")]
    SessionConflict(String),
}

impl CourseError {
    /// Whether the error is caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            CourseError::ValidationError(_) | CourseError::SessionConflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CourseError>;
