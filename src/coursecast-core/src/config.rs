//! Configuration module for loading TOML config files.
//!
//! Every section is optional in the file. Secrets are never read from TOML:
//! API keys come from the environment through [`Config::apply_env`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CourseError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub images: ImagesConfig,
    pub speech: SpeechConfig,
    pub transcription: TranscriptionConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Chat completion endpoint and per-stage models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    #[serde(skip)]
    pub api_key: String,
    pub structure_model: String,
    pub planning_model: String,
    pub slides_model: String,
    pub conversation_model: String,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            structure_model: "gpt-4o".to_string(),
            planning_model: "gpt-4o".to_string(),
            slides_model: "gpt-4o-mini".to_string(),
            conversation_model: "gpt-4o-mini".to_string(),
            max_tokens: 8192,
            request_timeout_secs: 180,
        }
    }
}

/// Batch and pacing settings for slide generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub batch_size: usize,
    pub requests_per_minute: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            requests_per_minute: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://image.pollinations.ai".to_string(),
            model: "flux".to_string(),
            width: 1024,
            height: 768,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

/// Voice configuration for TTS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub default_voice: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_voice: "af_sky".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub api_base: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    pub model: String,
    pub language: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.groq.com/openai/v1".to_string(),
            api_key: None,
            model: "whisper-large-v3-turbo".to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            heartbeat_secs: 10,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CourseError> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| CourseError::ConfigError(format!("Failed to read config: {}", e)))?;

        Self::from_str(&content)
    }

    /// Load configuration from string content.
    pub fn from_str(content: &str) -> Result<Self, CourseError> {
        toml::from_str(content)
            .map_err(|e| CourseError::ConfigError(format!("Failed to parse config: {}", e)))
    }

    /// Load from `path` when it exists, otherwise use the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, CourseError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(default_config()),
        }
    }

    /// Fill secrets and overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Fill secrets and overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            self.llm.api_key = key;
        }
        if let Some(base) = non_empty("OPENAI_API_BASE").or_else(|| non_empty("OPENAI_BASE_URL")) {
            self.llm.api_base = base;
        }
        if let Some(key) = non_empty("STT_API_KEY").or_else(|| non_empty("GROQ_API_KEY")) {
            self.transcription.api_key = Some(key);
        }
        if let Some(host) = non_empty("COURSECAST_HOST") {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = non_empty("COURSECAST_PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Invalid COURSECAST_PORT='{}', keeping {}", port, self.server.port),
            }
        }
        if let Some(dir) = non_empty("COURSECAST_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), CourseError> {
        if self.llm.api_base.trim().is_empty() {
            return Err(CourseError::ConfigError("llm.api_base cannot be empty".to_string()));
        }
        if self.generation.batch_size == 0 || self.generation.batch_size > 10 {
            return Err(CourseError::ConfigError(format!(
                "generation.batch_size must be between 1 and 10, got {}",
                self.generation.batch_size
            )));
        }
        if self.generation.requests_per_minute == 0 {
            return Err(CourseError::ConfigError(
                "generation.requests_per_minute must be positive".to_string(),
            ));
        }
        if self.server.heartbeat_secs == 0 {
            return Err(CourseError::ConfigError(
                "server.heartbeat_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default configuration embedded in the binary.
pub fn default_config() -> Config {
    Config::default()
}
