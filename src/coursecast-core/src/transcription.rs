//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::TranscriptionConfig;
use crate::error::CourseError;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, CourseError>;
}

/// Whisper served by Groq (or any compatible provider).
pub struct WhisperTranscriber {
    client: reqwest::Client,
    config: TranscriptionConfig,
}

impl WhisperTranscriber {
    pub fn new(config: TranscriptionConfig) -> Result<Self, CourseError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CourseError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.config.api_base.trim_end_matches('/'))
    }
}

/// MIME type guessed from the upload's extension.
pub fn audio_mime_type(file_name: &str) -> &'static str {
    let ext = file_name.rsplit('.').next().unwrap_or_default().to_lowercase();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "flac" => "audio/flac",
        _ => "audio/webm",
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String, CourseError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| CourseError::SttError("Speech-to-text is not configured (set STT_API_KEY)".to_string()))?;
        if audio.is_empty() {
            return Err(CourseError::ValidationError("Audio upload is empty".to_string()));
        }

        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name.to_string())
            .mime_str(audio_mime_type(file_name))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("language", self.config.language.clone())
            .text("response_format", "text")
            .text("temperature", "0");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CourseError::SttError(format!("{}: {}", status, body.trim())));
        }

        let text = body.trim().to_string();
        debug!(chars = text.len(), "transcription received");
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub struct FixedTranscript(pub String);

    #[async_trait]
    impl Transcriber for FixedTranscript {
        async fn transcribe(&self, _audio: Vec<u8>, _file_name: &str) -> Result<String, CourseError> {
            Ok(self.0.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_and_mime() {
        let transcriber = WhisperTranscriber::new(TranscriptionConfig {
            api_base: "https://api.groq.com/openai/v1/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(transcriber.endpoint(), "https://api.groq.com/openai/v1/audio/transcriptions");
        assert_eq!(audio_mime_type("question.WAV"), "audio/wav");
        assert_eq!(audio_mime_type("recording"), "audio/webm");
    }

    #[tokio::test]
    async fn test_missing_key_is_reported() {
        let transcriber = WhisperTranscriber::new(TranscriptionConfig::default()).unwrap();
        let err = transcriber.transcribe(vec![1, 2, 3], "a.wav").await.unwrap_err();
        assert!(matches!(err, CourseError::SttError(_)));
    }
}
